//! Full-page content for ingested articles.
//!
//! Feeds usually carry a one-line teaser. Before AI analysis the orchestrator
//! can download each article page and attach its main text, which the
//! sentiment and summary prompts then read instead of the teaser. Enrichment
//! never changes an article's id or fingerprint; a page that cannot be loaded
//! leaves the article as ingested.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use metrics::counter;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tokio_util::sync::CancellationToken;

use crate::ingest::normalize_text;
use crate::model::Article;

/// Main-content containers, tried in order.
static CONTENT_SELECTORS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "article",
        ".article-content",
        ".story-content",
        ".post-content",
        ".entry-content",
        r#"[data-component="ArticleBody"]"#,
        ".article-body",
        ".story-body",
    ]
    .iter()
    .filter_map(|s| Selector::parse(s).ok())
    .collect()
});

static PARAGRAPH: Lazy<Option<Selector>> = Lazy::new(|| Selector::parse("p").ok());

/// Downloads article pages. `from_fixtures` serves stored HTML by URL.
pub struct ContentFetcher {
    mode: Mode,
}

enum Mode {
    Fixtures(HashMap<String, String>),
    Http { client: reqwest::Client },
}

impl ContentFetcher {
    pub fn from_fixtures<I, K, V>(pages: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            mode: Mode::Fixtures(pages.into_iter().map(|(k, v)| (k.into(), v.into())).collect()),
        }
    }

    pub fn http() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("news-intel/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(20))
            .build()
            .context("building article http client")?;
        Ok(Self {
            mode: Mode::Http { client },
        })
    }

    /// Main text of the page at `url`. `Ok(None)` for a non-success status or
    /// a page without text.
    pub async fn fetch(&self, url: &str) -> Result<Option<String>> {
        let html = match &self.mode {
            Mode::Fixtures(pages) => match pages.get(url) {
                Some(html) => html.clone(),
                None => return Ok(None),
            },
            Mode::Http { client } => {
                let resp = client
                    .get(url)
                    .send()
                    .await
                    .with_context(|| format!("GET {url}"))?;
                if !resp.status().is_success() {
                    tracing::warn!(target: "ingest", %url, status = %resp.status(), "article page not fetched");
                    return Ok(None);
                }
                resp.text().await.context("article body .text()")?
            }
        };
        Ok(extract_content(&html))
    }
}

/// Main text of an HTML page, normalized and capped like feed text.
///
/// Script and style contents are ignored. The first matching content
/// container wins; otherwise all paragraphs are joined; otherwise the whole
/// page text is used.
pub fn extract_content(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);

    let from_container = CONTENT_SELECTORS
        .iter()
        .find_map(|sel| doc.select(sel).next())
        .map(visible_text);

    let text = from_container.or_else(|| {
        let sel = (*PARAGRAPH).as_ref()?;
        let paragraphs: Vec<String> = doc.select(sel).map(visible_text).collect();
        (!paragraphs.is_empty()).then(|| paragraphs.join(" "))
    });

    let text = normalize_text(&text.unwrap_or_else(|| visible_text(doc.root_element())));
    (!text.is_empty()).then_some(text)
}

fn visible_text(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in el.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| matches!(e.name(), "script" | "style" | "noscript"))
        });
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    out
}

/// Result of one enrichment pass.
#[derive(Debug, Default)]
pub struct Enrichment {
    /// Same order as the input.
    pub articles: Vec<Article>,
    pub enriched: usize,
    pub failed: usize,
}

/// Attach page text to every article, at most `max_concurrent` downloads at a
/// time. Articles that already carry content are passed through.
pub async fn enrich_articles(
    articles: Vec<Article>,
    fetcher: &ContentFetcher,
    max_concurrent: usize,
    cancel: &CancellationToken,
) -> Enrichment {
    let outcomes: Vec<(Article, Option<bool>)> = futures::stream::iter(articles)
        .map(|article| async move {
            if article.content().is_some() || cancel.is_cancelled() {
                return (article, None);
            }
            let url = article.url().to_string();
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                r = fetcher.fetch(&url) => Some(r),
            };
            match fetched {
                None | Some(Ok(None)) => (article, None),
                Some(Ok(Some(text))) => (article.with_content(text), Some(true)),
                Some(Err(e)) => {
                    tracing::warn!(target: "ingest", article = %article.id(), error = ?e, "article content fetch failed");
                    (article, Some(false))
                }
            }
        })
        .buffered(max_concurrent.max(1))
        .collect()
        .await;

    let mut out = Enrichment::default();
    for (article, outcome) in outcomes {
        match outcome {
            Some(true) => out.enriched += 1,
            Some(false) => out.failed += 1,
            None => {}
        }
        out.articles.push(article);
    }
    counter!("news_content_enriched_total").increment(out.enriched as u64);
    counter!("news_content_errors_total").increment(out.failed as u64);
    out
}
