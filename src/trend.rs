//! # Trend Scoring
//! Within-run trending score in `[0, 1]` for a story.
//!
//! Three terms, weighted:
//! - repetition: share of the run's sources that carry the same story cluster,
//! - velocity: how recent the article is relative to the run's date range,
//! - cluster size: `1 - 1/n` for a cluster of `n` copies.
//!
//! Scoring is a pure function of the article and the run snapshot. Pass the
//! pre-dedup article set so cross-source copies still count.

use std::collections::BTreeSet;

use crate::dedup::{StoryKey, DEFAULT_SIMILARITY_THRESHOLD};
use crate::error::InvalidArticle;
use crate::ingest::types::DateRange;
use crate::model::Article;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrendWeights {
    pub repetition: f64,
    pub velocity: f64,
    pub cluster: f64,
}

impl Default for TrendWeights {
    fn default() -> Self {
        Self {
            repetition: 0.45,
            velocity: 0.35,
            cluster: 0.20,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrendScorer {
    range: DateRange,
    threshold: f64,
    weights: TrendWeights,
}

/// Precomputed comparison keys for a run's articles.
#[derive(Debug, Clone)]
pub struct TrendSnapshot {
    entries: Vec<(StoryKey, String)>,
    run_sources: usize,
}

impl TrendSnapshot {
    pub fn new(all: &[Article]) -> Self {
        let entries: Vec<_> = all
            .iter()
            .map(|a| (StoryKey::of(a), a.source_id().to_string()))
            .collect();
        let run_sources = entries
            .iter()
            .map(|(_, s)| s.as_str())
            .collect::<BTreeSet<_>>()
            .len();
        Self {
            entries,
            run_sources,
        }
    }
}

impl TrendScorer {
    pub fn new(range: DateRange) -> Self {
        Self {
            range,
            threshold: DEFAULT_SIMILARITY_THRESHOLD,
            weights: TrendWeights::default(),
        }
    }

    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn with_weights(mut self, weights: TrendWeights) -> Self {
        self.weights = weights;
        self
    }

    /// Score one article against every article in the run.
    pub fn score(&self, article: &Article, all: &[Article]) -> Result<f64, InvalidArticle> {
        self.score_in(article, &TrendSnapshot::new(all))
    }

    /// Same as [`TrendScorer::score`] with the snapshot built once.
    pub fn score_in(&self, article: &Article, snapshot: &TrendSnapshot) -> Result<f64, InvalidArticle> {
        let key = StoryKey::of(article);
        if key.tokens.is_empty() {
            return Err(InvalidArticle(format!(
                "article {} has no scorable title tokens",
                article.id()
            )));
        }

        let mut sources: BTreeSet<&str> = BTreeSet::new();
        let mut copies = 0usize;
        let mut contains_self = false;
        for (k, src) in &snapshot.entries {
            if k.same_story(&key, self.threshold) {
                copies += 1;
                sources.insert(src.as_str());
                contains_self |= k.fingerprint == key.fingerprint && src == article.source_id();
            }
        }
        if !contains_self {
            copies += 1;
            sources.insert(article.source_id());
        }
        let run_sources = snapshot.run_sources.max(sources.len());

        let repetition = if run_sources > 1 {
            (sources.len() - 1) as f64 / (run_sources - 1) as f64
        } else {
            0.0
        };

        let span = self.range.span().num_seconds().max(1) as f64;
        let age = (self.range.to - article.published_at()).num_seconds().max(0) as f64;
        let velocity = 1.0 - (age / span).min(1.0);

        let cluster = 1.0 - 1.0 / copies as f64;

        let w = self.weights;
        let total = w.repetition + w.velocity + w.cluster;
        if total <= 0.0 || !total.is_finite() {
            return Ok(0.0);
        }
        let score = (w.repetition * repetition + w.velocity * velocity + w.cluster * cluster) / total;
        Ok(score.clamp(0.0, 1.0))
    }
}
