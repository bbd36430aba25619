// src/ingest/types.rs
use chrono::{DateTime, Duration, Utc};
use futures::stream::BoxStream;

use crate::error::SourceError;
use crate::ingest::rate_limit::RateLimiter;
use crate::model::{RawArticle, SourceConfig};

/// Lazy, finite, non-restartable sequence of fetched items.
pub type ArticleStream<'a> = BoxStream<'a, Result<RawArticle, SourceError>>;

/// Inclusive publication window for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    /// The window ending at `now` and reaching back `span`, clamped at the
    /// earliest representable instant.
    pub fn last(span: Duration, now: DateTime<Utc>) -> Self {
        Self::try_last(span, now).unwrap_or(Self {
            from: DateTime::<Utc>::MIN_UTC,
            to: now,
        })
    }

    /// Like [`DateRange::last`], but `None` when the start would underflow.
    pub fn try_last(span: Duration, now: DateTime<Utc>) -> Option<Self> {
        let from = now.checked_sub_signed(span)?;
        Some(Self { from, to: now })
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.from && ts <= self.to
    }

    pub fn span(&self) -> Duration {
        self.to - self.from
    }
}

/// One outlet adapter. Each variant implements the same contract on its own:
/// a fetch yields at most `max_articles` items; fewer is not an error. The
/// stream yields a single `SourceError::Unavailable` when nothing could be
/// retrieved at all.
///
/// Adapters take a token from `limiter` before every outbound request, so a
/// source with several feeds spends one token per feed. A refused token ends
/// the stream with `SourceError::RateLimitTimeout`.
pub trait SourceFetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        source: &'a SourceConfig,
        keywords: &'a [String],
        range: DateRange,
        max_articles: usize,
        limiter: &'a RateLimiter,
    ) -> ArticleStream<'a>;

    fn name(&self) -> &str;
}
