// src/analyze/mod.rs
//! AI analysis scheduling.
//!
//! Per article: moderation pre-check → budget approval → every requested AI
//! kind in parallel (each with its own retry loop) → commit of the succeeded
//! kinds. A semaphore bounds how many articles are in flight at once.

pub mod client;
pub mod openai;
pub mod retry;

use std::collections::BTreeSet;
use std::sync::Arc;

use metrics::counter;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cost::{Approval, CostController};
use crate::error::AnalysisFailure;
use crate::model::{AnalysisKind, AnalysisRequest, AnalysisResult, AnalysisStatus, Article};

pub use client::{
    AiAnalysisClient, AiOutput, AllowAllModerator, ContentModerator, DynAiClient, DynModerator,
    ModerationVerdict,
};
pub use openai::OpenAiClient;
pub use retry::RetryPolicy;

pub struct AnalysisScheduler {
    ai: DynAiClient,
    moderator: DynModerator,
    cost: Arc<CostController>,
    permits: Arc<Semaphore>,
    retry: RetryPolicy,
}

impl AnalysisScheduler {
    pub fn new(
        ai: DynAiClient,
        moderator: DynModerator,
        cost: Arc<CostController>,
        max_in_flight: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            ai,
            moderator,
            cost,
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            retry,
        }
    }

    pub fn cost(&self) -> &Arc<CostController> {
        &self.cost
    }

    /// Analyze every article for `kinds`. Results come back in input order.
    pub async fn run_batch(
        &self,
        articles: &[Article],
        kinds: &BTreeSet<AnalysisKind>,
        cancel: &CancellationToken,
    ) -> Vec<AnalysisResult> {
        let tasks = articles.iter().map(|article| {
            let request = AnalysisRequest::new(article.id(), kinds.iter().copied());
            async move { self.analyze(article, &request, cancel).await }
        });
        let results = futures::future::join_all(tasks).await;

        let complete = results
            .iter()
            .filter(|r| r.status() == AnalysisStatus::Complete)
            .count();
        info!(
            articles = articles.len(),
            complete,
            provider = self.ai.provider_name(),
            "analysis batch finished"
        );
        results
    }

    /// Drive one request to a terminal state. Trend is not handled here.
    pub async fn analyze(
        &self,
        article: &Article,
        request: &AnalysisRequest,
        cancel: &CancellationToken,
    ) -> AnalysisResult {
        let mut result = AnalysisResult::pending(article.id());
        let ai_kinds = request.ai_kinds();
        if ai_kinds.is_empty() {
            return result;
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            p = self.permits.acquire() => p.ok(),
        };
        let Some(_permit) = permit else {
            result.fail(AnalysisFailure::Cancelled);
            return result;
        };

        // Moderation is skipped once the budget is gone; approval will deny anyway.
        if !self.cost.is_exhausted() {
            let text = article.analysis_text();
            let verdict = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    result.fail(AnalysisFailure::Cancelled);
                    return result;
                }
                v = self.moderator.check(&text) => v,
            };
            match verdict {
                Ok(ModerationVerdict::Allowed) => {}
                Ok(ModerationVerdict::Flagged { categories }) => {
                    counter!("news_ai_rejected_total").increment(1);
                    info!(article = %article.id(), ?categories, "content rejected by moderation");
                    result.fail(AnalysisFailure::ContentRejected);
                    return result;
                }
                Err(e) => {
                    warn!(article = %article.id(), error = %e, "moderation check failed; continuing");
                }
            }
        }

        let reservation = match self.cost.approve(request) {
            Approval::Approved(r) => r,
            Approval::Denied(reason) => {
                result.fail(AnalysisFailure::Denied(reason));
                return result;
            }
        };
        result.advance(AnalysisStatus::InFlight);

        let calls = ai_kinds.iter().map(|&kind| async move {
            let out = self
                .retry
                .run(kind, cancel, || {
                    counter!("news_ai_calls_total").increment(1);
                    self.ai.analyze(kind, article)
                })
                .await;
            (kind, out)
        });

        for (kind, out) in futures::future::join_all(calls).await {
            match out {
                Ok(output) if output.payload.kind() == kind => {
                    result.backend_cost_usd += output.backend_cost_usd;
                    result.apply(output.payload);
                }
                Ok(output) => {
                    warn!(%kind, got = %output.payload.kind(), "backend answered with the wrong kind");
                    result.failures.push(AnalysisFailure::Kind {
                        kind,
                        error: crate::error::AiError::InvalidResponse(format!(
                            "expected {kind}, got {}",
                            output.payload.kind()
                        )),
                    });
                }
                Err(failure) => result.failures.push(failure),
            }
        }

        let succeeded = result.succeeded_kinds();
        result.cost = reservation.commit(&succeeded);

        let status = if succeeded.is_empty() {
            AnalysisStatus::Failed
        } else if succeeded.len() == ai_kinds.len() {
            AnalysisStatus::Complete
        } else {
            AnalysisStatus::Partial
        };
        result.advance(status);
        debug!(article = %article.id(), ?status, cost = %result.cost, "analysis settled");
        result
    }
}
