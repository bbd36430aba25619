//! Error taxonomy for the aggregation pipeline.
//!
//! Only [`PipelineError`] ever surfaces as a run failure. Everything else is
//! contained at the source or article level and counted in the run summary.

use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::model::AnalysisKind;

/// Per-source fetch failures. Never fatal on their own.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("source {source_id} unavailable: {reason}")]
    Unavailable { source_id: String, reason: String },

    #[error("rate limit wait for {source_id} exceeded {waited:?}")]
    RateLimitTimeout { source_id: String, waited: Duration },

    #[error("fetch for {source_id} cancelled")]
    Cancelled { source_id: String },
}

impl SourceError {
    pub fn unavailable(source_id: impl Into<String>, reason: impl ToString) -> Self {
        SourceError::Unavailable {
            source_id: source_id.into(),
            reason: reason.to_string(),
        }
    }
}

/// Why the cost controller refused to approve an analysis request.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    #[error("free tier monthly quota exceeded")]
    TierQuotaExceeded,
    #[error("daily budget exceeded")]
    DailyBudgetExceeded,
    #[error("per-run article cap exceeded")]
    ArticleCapExceeded,
}

/// Failures reported by the AI backend or the moderation endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AiError {
    #[error("AI request timed out")]
    Timeout,
    #[error("AI backend error (status {0})")]
    Server(u16),
    #[error("AI backend rate limited the request")]
    RateLimited,
    #[error("network error: {0}")]
    Network(String),
    #[error("malformed input: {0}")]
    MalformedInput(String),
    #[error("rejected by provider policy: {0}")]
    PolicyRejection(String),
    #[error("unparseable AI response: {0}")]
    InvalidResponse(String),
}

impl AiError {
    /// Transient errors are retried with backoff; the rest fail the kind at once.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            AiError::Timeout | AiError::Server(_) | AiError::RateLimited | AiError::Network(_)
        )
    }
}

impl From<reqwest::Error> for AiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            AiError::Timeout
        } else if let Some(status) = err.status() {
            AiError::Server(status.as_u16())
        } else {
            AiError::Network(err.to_string())
        }
    }
}

/// An article that cannot be ingested or scored.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid article: {0}")]
pub struct InvalidArticle(pub String);

/// Why (part of) an analysis did not produce a result.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AnalysisFailure {
    #[error("content rejected by moderation")]
    ContentRejected,
    #[error("request denied: {0}")]
    Denied(DenialReason),
    #[error("{kind} failed: {error}")]
    Kind { kind: AnalysisKind, error: AiError },
    #[error("analysis cancelled")]
    Cancelled,
}

/// Run-level failures.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("no sources available ({attempted} attempted, none produced articles)")]
    NoSourcesAvailable { attempted: usize },
    #[error("invalid run input: {0}")]
    InvalidInput(String),
    #[error("run cancelled before any article was fetched")]
    Cancelled,
}
