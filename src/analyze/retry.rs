//! Exponential backoff for AI calls.
//!
//! delay = min(base_delay * 2^(attempt-1), max_delay). Only transient
//! [`AiError`]s are retried; the wait observes the run's cancellation token.

use std::future::Future;
use std::time::{Duration, Instant};

use metrics::counter;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::{AiError, AnalysisFailure};
use crate::model::AnalysisKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails terminally, runs out of retries, or
    /// the token is cancelled.
    pub async fn run<T, F, Fut>(
        &self,
        kind: AnalysisKind,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, AnalysisFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AiError>>,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0u32;

        loop {
            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AnalysisFailure::Cancelled),
                r = op() => r,
            };
            let err = match outcome {
                Ok(v) => return Ok(v),
                Err(e) => e,
            };

            attempt += 1;
            if !err.is_transient() || attempt > self.max_retries {
                warn!(
                    %kind,
                    attempt,
                    max = self.max_retries,
                    elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                    error = %err,
                    "AI call failed"
                );
                return Err(AnalysisFailure::Kind { kind, error: err });
            }

            let delay = self.delay_for(attempt);
            counter!("news_ai_retries_total").increment(1);
            warn!(%kind, attempt, max = self.max_retries, ?delay, error = %err, "AI call failed; backing off");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AnalysisFailure::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_double_and_cap() {
        let p = RetryPolicy::default();
        assert_eq!(p.delay_for(1), Duration::from_millis(500));
        assert_eq!(p.delay_for(2), Duration::from_secs(1));
        assert_eq!(p.delay_for(3), Duration::from_secs(2));
        assert_eq!(p.delay_for(5), Duration::from_secs(8));
        assert_eq!(p.delay_for(40), Duration::from_secs(8));
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_error_is_not_retried() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let out: Result<(), _> = RetryPolicy::default()
            .run(AnalysisKind::Sentiment, &CancellationToken::new(), || {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err(AiError::MalformedInput("bad".into())) }
            })
            .await;
        assert!(matches!(out, Err(AnalysisFailure::Kind { .. })));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_exhaust_after_three_retries() {
        let calls = std::sync::atomic::AtomicU32::new(0);
        let started = tokio::time::Instant::now();
        let out: Result<(), _> = RetryPolicy::default()
            .run(AnalysisKind::Summary, &CancellationToken::new(), || {
                calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                async { Err(AiError::Timeout) }
            })
            .await;
        assert!(out.is_err());
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 4);
        // 0.5 + 1 + 2 seconds of backoff
        assert_eq!(started.elapsed(), Duration::from_millis(3_500));
    }
}
