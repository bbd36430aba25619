// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod analyze;
pub mod config;
pub mod cost;
pub mod credibility;
pub mod dedup;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod trend;

// ---- Re-exports for stable public API ----
pub use crate::analyze::{
    AiAnalysisClient, AiOutput, AnalysisScheduler, ContentModerator, ModerationVerdict,
    OpenAiClient, RetryPolicy,
};
pub use crate::config::{AiConfig, RunInput};
pub use crate::cost::{Approval, CostController, CostSettings, CostUnits, Reservation, Tier};
pub use crate::dedup::Deduplicator;
pub use crate::error::{AiError, AnalysisFailure, DenialReason, InvalidArticle, PipelineError, SourceError};
pub use crate::ingest::config::SourceCatalog;
pub use crate::ingest::rate_limit::RateLimiter;
pub use crate::ingest::types::{DateRange, SourceFetcher};
pub use crate::model::{AnalysisKind, AnalysisRequest, AnalysisResult, AnalysisStatus, Article};
pub use crate::output::OutputRecord;
pub use crate::pipeline::{PipelineOrchestrator, PipelineSettings, RunReport, RunSummary};
pub use crate::trend::TrendScorer;
