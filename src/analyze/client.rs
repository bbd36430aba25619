//! Capability interfaces for the AI backend and content moderation.
//!
//! The scheduler only ever sees these traits; concrete backends live next to
//! them (`openai.rs`) and tests plug in their own.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::AiError;
use crate::model::{AnalysisKind, AnalysisPayload, Article};

/// One successful backend answer plus what the provider charged for it.
#[derive(Debug, Clone, PartialEq)]
pub struct AiOutput {
    pub payload: AnalysisPayload,
    pub backend_cost_usd: f64,
}

impl AiOutput {
    pub fn free(payload: AnalysisPayload) -> Self {
        Self {
            payload,
            backend_cost_usd: 0.0,
        }
    }
}

/// Wraps whichever LLM backend is configured.
#[async_trait]
pub trait AiAnalysisClient: Send + Sync {
    /// Run one analysis kind. `Trend` is never passed here.
    async fn analyze(&self, kind: AnalysisKind, article: &Article) -> Result<AiOutput, AiError>;

    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModerationVerdict {
    Allowed,
    Flagged { categories: Vec<String> },
}

/// Pre-check run before any budget is spent on an article.
#[async_trait]
pub trait ContentModerator: Send + Sync {
    async fn check(&self, text: &str) -> Result<ModerationVerdict, AiError>;
}

pub type DynAiClient = Arc<dyn AiAnalysisClient>;
pub type DynModerator = Arc<dyn ContentModerator>;

/// Lets everything through; used when no moderation backend is configured.
pub struct AllowAllModerator;

#[async_trait]
impl ContentModerator for AllowAllModerator {
    async fn check(&self, _text: &str) -> Result<ModerationVerdict, AiError> {
        Ok(ModerationVerdict::Allowed)
    }
}
