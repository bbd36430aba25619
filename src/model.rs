//! Core data model: articles, sources and analysis requests/results.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cost::CostUnits;
use crate::dedup;
use crate::error::{AnalysisFailure, InvalidArticle};
use crate::ingest::normalize_text;

/// Static per-run configuration of one news source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    /// Stable source id used in run input (`cnn`, `bbc`, ...).
    pub id: String,
    pub name: String,
    pub domain: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_minute: u32,
    pub credibility_score: f64,
    #[serde(default)]
    pub feeds: Vec<String>,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_enabled() -> bool {
    true
}
fn default_rate_limit() -> u32 {
    30
}
fn default_language() -> String {
    "en".to_string()
}

/// An item as produced by a [`crate::ingest::types::SourceFetcher`], before ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct RawArticle {
    pub title: String,
    pub url: String,
    pub published_at: Option<DateTime<Utc>>,
    pub text: String,
}

/// An ingested article. `id` and `fingerprint` are fixed at ingestion; the
/// struct exposes no mutators. Full page text may be attached later with
/// [`Article::with_content`].
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    id: String,
    title: String,
    url: String,
    published_at: DateTime<Utc>,
    source_id: String,
    source_name: String,
    source_domain: String,
    credibility_score: f64,
    raw_text: String,
    fingerprint: String,
    content: Option<String>,
}

impl Article {
    /// Validate and normalize a raw item fetched from `source`.
    ///
    /// Items without a publication date are stamped with `fetched_at`.
    pub fn ingest(
        raw: RawArticle,
        source: &SourceConfig,
        fetched_at: DateTime<Utc>,
    ) -> Result<Self, InvalidArticle> {
        let title = normalize_text(&raw.title);
        if title.is_empty() {
            return Err(InvalidArticle(format!("empty title from {}", source.id)));
        }
        let parsed = url::Url::parse(raw.url.trim())
            .map_err(|e| InvalidArticle(format!("bad url {:?}: {e}", raw.url)))?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(InvalidArticle(format!("unsupported url {:?}", raw.url)));
        }
        let url = parsed.to_string();
        let raw_text = normalize_text(&raw.text);
        let published_at = raw.published_at.unwrap_or(fetched_at);
        let fingerprint = dedup::fingerprint_parts(&title, &url, &raw_text);
        let id = article_id(&source.id, &url, &title);

        Ok(Self {
            id,
            title,
            url,
            published_at,
            source_id: source.id.clone(),
            source_name: source.name.clone(),
            source_domain: source.domain.clone(),
            credibility_score: source.credibility_score.clamp(0.0, 1.0),
            raw_text,
            fingerprint,
            content: None,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }
    pub fn title(&self) -> &str {
        &self.title
    }
    pub fn url(&self) -> &str {
        &self.url
    }
    pub fn published_at(&self) -> DateTime<Utc> {
        self.published_at
    }
    pub fn source_id(&self) -> &str {
        &self.source_id
    }
    pub fn source_name(&self) -> &str {
        &self.source_name
    }
    pub fn source_domain(&self) -> &str {
        &self.source_domain
    }
    pub fn credibility_score(&self) -> f64 {
        self.credibility_score
    }
    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    /// The same article carrying the downloaded page text. Id and fingerprint
    /// keep their ingestion values.
    pub fn with_content(mut self, content: String) -> Self {
        let content = normalize_text(&content);
        self.content = (!content.is_empty()).then_some(content);
        self
    }

    /// Page text when enriched, otherwise the feed text.
    pub fn body(&self) -> &str {
        self.content.as_deref().unwrap_or(&self.raw_text)
    }

    /// Text sent to the AI backend: title plus body, falling back to the title alone.
    pub fn analysis_text(&self) -> String {
        let body = self.body();
        if body.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n\n{}", self.title, body)
        }
    }
}

fn article_id(source_id: &str, url: &str, title: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hasher.update(b"\n");
    hasher.update(title.as_bytes());
    let digest = hasher.finalize();
    digest[..8].iter().map(|b| format!("{b:02x}")).collect()
}

/// One analysis kind that can be requested per article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    Sentiment,
    Summary,
    Classification,
    Entities,
    Trend,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 5] = [
        AnalysisKind::Sentiment,
        AnalysisKind::Summary,
        AnalysisKind::Classification,
        AnalysisKind::Entities,
        AnalysisKind::Trend,
    ];

    /// Trend is scored locally; every other kind goes through the AI backend.
    pub fn is_ai(self) -> bool {
        !matches!(self, AnalysisKind::Trend)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisKind::Sentiment => "sentiment",
            AnalysisKind::Summary => "summary",
            AnalysisKind::Classification => "classification",
            AnalysisKind::Entities => "entities",
            AnalysisKind::Trend => "trend",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Created per article once it survives dedup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalysisRequest {
    pub article_id: String,
    pub kinds: BTreeSet<AnalysisKind>,
}

impl AnalysisRequest {
    pub fn new(article_id: impl Into<String>, kinds: impl IntoIterator<Item = AnalysisKind>) -> Self {
        Self {
            article_id: article_id.into(),
            kinds: kinds.into_iter().collect(),
        }
    }

    /// Kinds that need an AI call (and therefore budget).
    pub fn ai_kinds(&self) -> BTreeSet<AnalysisKind> {
        self.kinds.iter().copied().filter(|k| k.is_ai()).collect()
    }
}

/// Lifecycle of one analysis request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    InFlight,
    Complete,
    Partial,
    Failed,
}

impl AnalysisStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            AnalysisStatus::Complete | AnalysisStatus::Partial | AnalysisStatus::Failed
        )
    }

    /// pending → in-flight → terminal; pending may also go straight to failed
    /// (moderation rejection, budget denial, cancellation).
    pub fn can_transition_to(self, next: AnalysisStatus) -> bool {
        use AnalysisStatus::*;
        match (self, next) {
            (Pending, InFlight) => true,
            (Pending, Failed) => true,
            (InFlight, n) => n.is_terminal(),
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub score: f64,
    pub label: SentimentLabel,
    pub confidence: f64,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summarization {
    pub summary: String,
    #[serde(default)]
    pub key_points: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities {
    #[serde(default)]
    pub companies: Vec<String>,
    #[serde(default)]
    pub people: Vec<String>,
    #[serde(default)]
    pub locations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicTags {
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// One successful AI answer for a single kind.
#[derive(Debug, Clone, PartialEq)]
pub enum AnalysisPayload {
    Sentiment(Sentiment),
    Summary(Summarization),
    Classification(TopicTags),
    Entities(Entities),
}

impl AnalysisPayload {
    pub fn kind(&self) -> AnalysisKind {
        match self {
            AnalysisPayload::Sentiment(_) => AnalysisKind::Sentiment,
            AnalysisPayload::Summary(_) => AnalysisKind::Summary,
            AnalysisPayload::Classification(_) => AnalysisKind::Classification,
            AnalysisPayload::Entities(_) => AnalysisKind::Entities,
        }
    }
}

/// Per-article analysis outcome. Only the scheduler moves its status.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisResult {
    pub article_id: String,
    pub sentiment: Option<Sentiment>,
    pub summarization: Option<Summarization>,
    pub topics: Option<TopicTags>,
    pub entities: Option<Entities>,
    pub trending_score: Option<f64>,
    pub cost: CostUnits,
    pub backend_cost_usd: f64,
    pub failures: Vec<AnalysisFailure>,
    status: AnalysisStatus,
}

impl AnalysisResult {
    pub fn pending(article_id: impl Into<String>) -> Self {
        Self {
            article_id: article_id.into(),
            sentiment: None,
            summarization: None,
            topics: None,
            entities: None,
            trending_score: None,
            cost: CostUnits::ZERO,
            backend_cost_usd: 0.0,
            failures: Vec::new(),
            status: AnalysisStatus::Pending,
        }
    }

    pub fn status(&self) -> AnalysisStatus {
        self.status
    }

    /// Move to `next` if the lifecycle allows it. Terminal states never change.
    pub(crate) fn advance(&mut self, next: AnalysisStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }

    /// Fail a request that never reached the backend.
    pub(crate) fn fail(&mut self, failure: AnalysisFailure) {
        self.failures.push(failure);
        self.advance(AnalysisStatus::Failed);
    }

    pub(crate) fn apply(&mut self, payload: AnalysisPayload) {
        match payload {
            AnalysisPayload::Sentiment(s) => self.sentiment = Some(s),
            AnalysisPayload::Summary(s) => self.summarization = Some(s),
            AnalysisPayload::Classification(t) => self.topics = Some(t),
            AnalysisPayload::Entities(e) => self.entities = Some(e),
        }
    }

    pub fn succeeded_kinds(&self) -> BTreeSet<AnalysisKind> {
        let mut out = BTreeSet::new();
        if self.sentiment.is_some() {
            out.insert(AnalysisKind::Sentiment);
        }
        if self.summarization.is_some() {
            out.insert(AnalysisKind::Summary);
        }
        if self.topics.is_some() {
            out.insert(AnalysisKind::Classification);
        }
        if self.entities.is_some() {
            out.insert(AnalysisKind::Entities);
        }
        out
    }

    /// The denial that kept this article from being analyzed, if any.
    pub fn denial(&self) -> Option<crate::error::DenialReason> {
        self.failures.iter().find_map(|f| match f {
            AnalysisFailure::Denied(r) => Some(*r),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> SourceConfig {
        SourceConfig {
            id: "bbc".into(),
            name: "BBC News".into(),
            domain: "bbc.com".into(),
            enabled: true,
            rate_limit_per_minute: 30,
            credibility_score: 0.92,
            feeds: vec![],
            language: "en".into(),
        }
    }

    #[test]
    fn ingest_rejects_empty_title_and_bad_url() {
        let now = Utc::now();
        let empty = RawArticle {
            title: "  <b></b> ".into(),
            url: "https://bbc.com/a".into(),
            published_at: None,
            text: String::new(),
        };
        assert!(Article::ingest(empty, &source(), now).is_err());

        let bad_url = RawArticle {
            title: "Headline".into(),
            url: "ftp://bbc.com/a".into(),
            published_at: None,
            text: String::new(),
        };
        assert!(Article::ingest(bad_url, &source(), now).is_err());
    }

    #[test]
    fn ingest_assigns_stable_id_and_fingerprint() {
        let now = Utc::now();
        let raw = RawArticle {
            title: "Markets rally on rate hopes".into(),
            url: "https://www.bbc.com/news/markets-1".into(),
            published_at: None,
            text: "Stocks rose sharply.".into(),
        };
        let a = Article::ingest(raw.clone(), &source(), now).unwrap();
        let b = Article::ingest(raw, &source(), now).unwrap();
        assert_eq!(a.id(), b.id());
        assert_eq!(a.id().len(), 16);
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.published_at(), now);
    }

    #[test]
    fn status_is_monotonic() {
        let mut r = AnalysisResult::pending("x");
        assert!(r.advance(AnalysisStatus::InFlight));
        assert!(r.advance(AnalysisStatus::Partial));
        assert!(!r.advance(AnalysisStatus::Pending));
        assert!(!r.advance(AnalysisStatus::Complete));
        assert_eq!(r.status(), AnalysisStatus::Partial);
    }
}
