//! Per-source outbound throttle.
//!
//! Each source gets its own GCRA bucket (`governor`) with a burst of one and a
//! replenish period of `60s / rate_limit_per_minute`, so any sliding minute
//! sees at most `rate_limit_per_minute` grants. Waiting on one source never
//! blocks another.
//!
//! Grants are per outbound request, not per source fetch: adapters acquire
//! before each feed they download.

use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as Gcra};

use crate::error::SourceError;
use crate::model::SourceConfig;

type Bucket = Arc<Gcra<NotKeyed, InMemoryState, DefaultClock>>;

const DEFAULT_PER_MINUTE: u32 = 30;

pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    max_wait: Duration,
}

impl RateLimiter {
    pub fn new(max_wait: Duration) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            max_wait,
        }
    }

    pub fn from_sources(sources: &[SourceConfig], max_wait: Duration) -> Self {
        let limiter = Self::new(max_wait);
        for s in sources {
            limiter.register(&s.id, s.rate_limit_per_minute);
        }
        limiter
    }

    /// (Re)configure the bucket for `source_id`.
    pub fn register(&self, source_id: &str, per_minute: u32) {
        let bucket = Arc::new(Gcra::direct(quota_per_minute(per_minute)));
        let mut g = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        g.insert(source_id.to_string(), bucket);
    }

    /// Wait for a token for `source_id`, up to the configured max wait.
    pub async fn acquire(&self, source_id: &str) -> Result<(), SourceError> {
        let bucket = self.bucket_for(source_id);
        if bucket.check().is_ok() {
            return Ok(());
        }
        tracing::debug!(target: "ingest", source = source_id, "waiting for rate limit token");
        tokio::time::timeout(self.max_wait, bucket.until_ready())
            .await
            .map_err(|_| SourceError::RateLimitTimeout {
                source_id: source_id.to_string(),
                waited: self.max_wait,
            })
    }

    fn bucket_for(&self, source_id: &str) -> Bucket {
        let mut g = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        g.entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Gcra::direct(quota_per_minute(DEFAULT_PER_MINUTE))))
            .clone()
    }
}

fn quota_per_minute(per_minute: u32) -> Quota {
    let per_minute = per_minute.max(1);
    let period = Duration::from_secs(60) / per_minute;
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_minute(NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN)))
        .allow_burst(NonZeroU32::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_call_times_out_for_slow_source() {
        let rl = RateLimiter::new(Duration::from_millis(50));
        rl.register("slow", 1);
        assert!(rl.acquire("slow").await.is_ok());
        let err = rl.acquire("slow").await.unwrap_err();
        assert!(matches!(err, SourceError::RateLimitTimeout { .. }));
    }

    #[tokio::test]
    async fn sources_do_not_share_buckets() {
        let rl = RateLimiter::new(Duration::from_millis(50));
        rl.register("a", 1);
        rl.register("b", 1);
        assert!(rl.acquire("a").await.is_ok());
        assert!(rl.acquire("b").await.is_ok());
    }
}
