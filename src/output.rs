//! Per-article output record.
//!
//! Fields for analysis kinds that were disabled or failed are omitted, never
//! filled with placeholders.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::model::{AnalysisResult, AnalysisStatus, Article, Entities, Sentiment, Summarization};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OutputRecord {
    pub title: String,
    pub url: String,
    /// RFC 3339 / ISO-8601, UTC.
    pub published_at: String,
    pub source: SourceInfo,
    pub analysis: AnalysisBlock,
    pub processing_session: ProcessingSession,
    pub processed_at: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceInfo {
    pub name: String,
    pub domain: String,
    pub credibility_score: f64,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AnalysisBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AnalysisStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summarization: Option<Summarization>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationBlock>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trending_score: Option<f64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ClassificationBlock {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entities: Option<Entities>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keywords: Option<Vec<String>>,
}

/// Run-level context repeated on every record.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProcessingSession {
    pub sources: Vec<String>,
    pub keywords: Vec<String>,
    pub ai_enabled: bool,
    pub date_range: String,
}

impl AnalysisBlock {
    pub fn from_result(result: &AnalysisResult) -> Self {
        let classification = match (&result.topics, &result.entities) {
            (None, None) => None,
            (topics, entities) => Some(ClassificationBlock {
                categories: topics.as_ref().map(|t| t.categories.clone()),
                entities: entities.clone(),
                keywords: topics.as_ref().map(|t| t.keywords.clone()),
            }),
        };
        Self {
            status: (result.status() != AnalysisStatus::Pending).then_some(result.status()),
            sentiment: result.sentiment.clone(),
            summarization: result.summarization.clone(),
            classification,
            trending_score: result.trending_score,
        }
    }
}

impl OutputRecord {
    pub fn new(
        article: &Article,
        result: &AnalysisResult,
        session: &ProcessingSession,
        processed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            title: article.title().to_string(),
            url: article.url().to_string(),
            published_at: article
                .published_at()
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            source: SourceInfo {
                name: article.source_name().to_string(),
                domain: article.source_domain().to_string(),
                credibility_score: article.credibility_score(),
            },
            analysis: AnalysisBlock::from_result(result),
            processing_session: session.clone(),
            processed_at: processed_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}
