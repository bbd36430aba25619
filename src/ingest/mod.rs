// src/ingest/mod.rs
pub mod config;
pub mod content;
pub mod providers;
pub mod rate_limit;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::StreamExt;
use metrics::{counter, histogram};
use once_cell::sync::Lazy;
use regex::Regex;
use tokio_util::sync::CancellationToken;

use crate::error::SourceError;
use crate::ingest::rate_limit::RateLimiter;
use crate::ingest::types::{DateRange, SourceFetcher};
use crate::metrics::ensure_metrics_described;
use crate::model::{Article, SourceConfig};

const MAX_TEXT_CHARS: usize = 5_000;

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").unwrap());
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// Normalize text: decode entities, strip tags, ASCII quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    let out = RE_TAGS.replace_all(&out, " ");

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    let out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    let mut out = RE_WS.replace_all(&out, " ").trim().to_string();

    // 5) Length cap
    if out.chars().count() > MAX_TEXT_CHARS {
        out = out.chars().take(MAX_TEXT_CHARS).collect();
    }
    out
}

/// Split the comma-separated `keywords` input into lowercase terms.
pub fn parse_keywords(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect()
}

/// True when any keyword occurs in the title or text. No keywords keeps everything.
pub fn matches_keywords(article: &Article, keywords: &[String]) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let title = article.title().to_lowercase();
    let text = article.raw_text().to_lowercase();
    keywords
        .iter()
        .any(|k| title.contains(k.as_str()) || text.contains(k.as_str()))
}

/// Outcome of fetching one source.
#[derive(Debug, Clone)]
pub struct SourceReport {
    pub source_id: String,
    pub fetched: usize,
    pub invalid: usize,
    pub error: Option<SourceError>,
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    /// Articles in source order; within a source, in fetch order.
    pub articles: Vec<Article>,
    pub reports: Vec<SourceReport>,
}

/// Fetch every source concurrently. A failing source is reported, never fatal.
#[allow(clippy::too_many_arguments)]
pub async fn fetch_all(
    sources: &[SourceConfig],
    fetchers: &HashMap<String, Arc<dyn SourceFetcher>>,
    limiter: &RateLimiter,
    keywords: &[String],
    range: DateRange,
    max_articles: usize,
    fetched_at: DateTime<Utc>,
    cancel: &CancellationToken,
) -> FetchOutcome {
    ensure_metrics_described();

    let tasks = sources.iter().map(|source| async move {
        let Some(fetcher) = fetchers.get(&source.id) else {
            let report = SourceReport {
                source_id: source.id.clone(),
                fetched: 0,
                invalid: 0,
                error: Some(SourceError::unavailable(&source.id, "no fetcher registered")),
            };
            return (report, Vec::new());
        };
        fetch_source(
            fetcher.as_ref(),
            source,
            limiter,
            keywords,
            range,
            max_articles,
            fetched_at,
            cancel,
        )
        .await
    });

    let mut outcome = FetchOutcome::default();
    for (report, mut articles) in futures::future::join_all(tasks).await {
        if let Some(err) = &report.error {
            tracing::warn!(target: "ingest", source = %report.source_id, error = %err, "source skipped");
            counter!("news_source_errors_total").increment(1);
        }
        outcome.articles.append(&mut articles);
        outcome.reports.push(report);
    }
    outcome
}

#[allow(clippy::too_many_arguments)]
async fn fetch_source(
    fetcher: &dyn SourceFetcher,
    source: &SourceConfig,
    limiter: &RateLimiter,
    keywords: &[String],
    range: DateRange,
    max_articles: usize,
    fetched_at: DateTime<Utc>,
    cancel: &CancellationToken,
) -> (SourceReport, Vec<Article>) {
    let t0 = Instant::now();
    let mut report = SourceReport {
        source_id: source.id.clone(),
        fetched: 0,
        invalid: 0,
        error: None,
    };
    let cancelled = || SourceError::Cancelled {
        source_id: source.id.clone(),
    };

    let mut articles = Vec::new();
    let mut stream = fetcher.fetch(source, keywords, range, max_articles, limiter);
    while articles.len() < max_articles {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                report.error = Some(cancelled());
                break;
            }
            n = stream.next() => n,
        };
        match next {
            None => break,
            Some(Ok(raw)) => match Article::ingest(raw, source, fetched_at) {
                Ok(a) => articles.push(a),
                Err(e) => {
                    tracing::debug!(target: "ingest", source = %source.id, error = %e, "dropping item");
                    counter!("news_invalid_articles_total").increment(1);
                    report.invalid += 1;
                }
            },
            Some(Err(e)) => {
                if articles.is_empty() {
                    report.error = Some(e);
                } else {
                    tracing::warn!(target: "ingest", source = %source.id, error = %e, kept = articles.len(), "source ended early; keeping partial results");
                }
                break;
            }
        }
    }

    report.fetched = articles.len();
    counter!("news_fetch_articles_total").increment(articles.len() as u64);
    histogram!("news_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    tracing::info!(target: "ingest", source = %source.id, fetched = report.fetched, invalid = report.invalid, "source fetched");
    (report, articles)
}
