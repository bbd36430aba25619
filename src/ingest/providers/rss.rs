use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::error::SourceError;
use crate::ingest::rate_limit::RateLimiter;
use crate::ingest::types::{ArticleStream, DateRange, SourceFetcher};
use crate::model::{RawArticle, SourceConfig};

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}
#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}
#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts.trim(), &Rfc2822)
        .ok()
        .and_then(|dt| DateTime::from_timestamp(dt.unix_timestamp(), 0))
}

/// RSS 2.0 adapter for one outlet. In HTTP mode every feed listed on the
/// source is fetched in turn. `from_fixture` serves one stored document as a
/// single feed; `from_feed_fixtures` serves one document per feed URL.
pub struct RssFetcher {
    mode: Mode,
}

enum Mode {
    Fixture(String),
    Feeds(HashMap<String, String>),
    Http { client: reqwest::Client },
}

impl RssFetcher {
    pub fn from_fixture(xml: &str) -> Self {
        Self {
            mode: Mode::Fixture(xml.to_string()),
        }
    }

    pub fn from_feed_fixtures<I, K, V>(feeds: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            mode: Mode::Feeds(feeds.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }

    pub fn http() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("news-intel/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .context("building rss http client")?;
        Ok(Self {
            mode: Mode::Http { client },
        })
    }

    async fn load(&self, feed_url: &str) -> Result<String> {
        match &self.mode {
            Mode::Fixture(s) => Ok(s.clone()),
            Mode::Feeds(docs) => docs
                .get(feed_url)
                .cloned()
                .with_context(|| format!("no fixture for {feed_url}")),
            Mode::Http { client } => {
                let resp = client
                    .get(feed_url)
                    .send()
                    .await
                    .with_context(|| format!("GET {feed_url}"))?
                    .error_for_status()
                    .with_context(|| format!("GET {feed_url}"))?;
                resp.text().await.context("rss body .text()")
            }
        }
    }

    fn feed_urls(&self, source: &SourceConfig) -> Vec<String> {
        match &self.mode {
            Mode::Fixture(_) => vec![format!("fixture://{}", source.id)],
            Mode::Feeds(_) | Mode::Http { .. } => source.feeds.clone(),
        }
    }
}

/// Parse an RSS document into raw items, skipping entries without title or link.
pub fn parse_items(xml: &str) -> Result<Vec<RawArticle>> {
    let t0 = std::time::Instant::now();
    let xml_clean = scrub_html_entities_for_xml(xml);
    let rss: Rss = from_str(&xml_clean).context("parsing rss xml")?;

    let mut out = Vec::with_capacity(rss.channel.item.len());
    for it in rss.channel.item {
        let (Some(title), Some(link)) = (it.title, it.link) else {
            continue;
        };
        out.push(RawArticle {
            title,
            url: link.trim().to_string(),
            published_at: it.pub_date.as_deref().and_then(parse_rfc2822),
            text: it.description.unwrap_or_default(),
        });
    }

    histogram!("news_fetch_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    Ok(out)
}

impl SourceFetcher for RssFetcher {
    fn fetch<'a>(
        &'a self,
        source: &'a SourceConfig,
        _keywords: &'a [String],
        range: DateRange,
        max_articles: usize,
        limiter: &'a RateLimiter,
    ) -> ArticleStream<'a> {
        Box::pin(async_stream::stream! {
            let feeds = self.feed_urls(source);
            let mut emitted = 0usize;
            let mut failed = 0usize;
            let mut last_err = String::from("no feeds configured");

            'feeds: for feed in &feeds {
                if emitted >= max_articles {
                    break;
                }
                if let Err(e) = limiter.acquire(&source.id).await {
                    tracing::warn!(target: "ingest", source = %source.id, feed = %feed, emitted, "rate limit refused feed request");
                    yield Err(e);
                    break;
                }
                let items = match self.load(feed).await.and_then(|body| parse_items(&body)) {
                    Ok(items) => items,
                    Err(e) => {
                        tracing::warn!(target: "ingest", source = %source.id, feed = %feed, error = ?e, "feed failed");
                        counter!("news_source_errors_total").increment(1);
                        failed += 1;
                        last_err = format!("{e:#}");
                        continue;
                    }
                };
                for item in items {
                    if emitted >= max_articles {
                        break 'feeds;
                    }
                    if item.published_at.is_some_and(|ts| !range.contains(ts)) {
                        continue;
                    }
                    emitted += 1;
                    yield Ok(item);
                }
            }

            if emitted == 0 && failed == feeds.len() {
                yield Err(SourceError::unavailable(&source.id, last_err));
            }
        })
    }

    fn name(&self) -> &str {
        "rss"
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}
