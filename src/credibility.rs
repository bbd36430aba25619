//! # Source Credibility
//!
//! Maps outlet names and domains (e.g. "BBC News", "feeds.bbci.co.uk",
//! "reuters.com") to a credibility score in `[0.0, 1.0]`. Catalog sources
//! carry their own score; this table covers user-supplied feeds.
//!
//! - Loads from JSON config (scores + aliases).
//! - Case-insensitive lookup with normalization of punctuation, dashes, `www.`.
//! - Fallback order: aliases → exact match → substring match → default.

use serde::Deserialize;
use std::{collections::HashMap, fs, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct CredibilityTable {
    /// Score used when nothing matches.
    #[serde(default = "default_default_score")]
    pub default_score: f64,
    /// Scores for canonical outlet keys.
    #[serde(default)]
    pub scores: HashMap<String, f64>,
    /// Alternative names/domains → canonical keys.
    #[serde(default)]
    pub aliases: HashMap<String, String>,
}

fn default_default_score() -> f64 {
    0.5
}

impl CredibilityTable {
    /// Load from a JSON file; falls back to `default_seed()` on error.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|_| Self::default_seed()),
            Err(_) => Self::default_seed(),
        }
    }

    pub fn score_for(&self, outlet: &str) -> f64 {
        let s = normalize(outlet);

        if let Some(canon) = self.aliases.get(&s) {
            if let Some(&w) = self.scores.get(&normalize(canon)) {
                return w.clamp(0.0, 1.0);
            }
        }

        if let Some(&w) = self.scores.get(&s) {
            return w.clamp(0.0, 1.0);
        }

        // Longest key wins so "financial times" beats "times".
        let mut best: Option<(&str, f64)> = None;
        for (k, &w) in &self.scores {
            if s.contains(k.as_str()) && best.map_or(true, |(bk, _)| k.len() > bk.len()) {
                best = Some((k.as_str(), w));
            }
        }
        if let Some((_, w)) = best {
            return w.clamp(0.0, 1.0);
        }

        self.default_score.clamp(0.0, 1.0)
    }

    /// Built-in seed covering the catalog outlets.
    pub fn default_seed() -> Self {
        let mut scores = HashMap::new();
        let mut aliases = HashMap::new();

        for (k, v) in [
            ("reuters", 0.95),
            ("associated press", 0.93),
            ("bbc", 0.92),
            ("financial times", 0.90),
            ("bloomberg", 0.88),
            ("cnn", 0.85),
            ("techcrunch", 0.82),
        ] {
            scores.insert(k.to_string(), v);
        }

        for (a, c) in [
            ("ap", "associated press"),
            ("apnews com", "associated press"),
            ("ap news", "associated press"),
            ("bbci co uk", "bbc"),
            ("feeds bbci co uk", "bbc"),
            ("bbc co uk", "bbc"),
            ("ft", "financial times"),
            ("ft com", "financial times"),
            ("feeds feedburner com", "techcrunch"),
            ("rss cnn com", "cnn"),
        ] {
            aliases.insert(a.to_string(), c.to_string());
        }

        Self {
            default_score: 0.5,
            scores,
            aliases,
        }
    }
}

impl Default for CredibilityTable {
    fn default() -> Self {
        Self::default_seed()
    }
}

/// Lowercase, drop a leading `www.`, turn separators into spaces, collapse.
fn normalize(s: &str) -> String {
    let lower = s.trim().to_ascii_lowercase();
    let mut out = lower.strip_prefix("www.").unwrap_or(&lower).to_string();

    for ch in ['—', '–', '-', '_', '/', '\\'] {
        out = out.replace(ch, " ");
    }
    out = out.replace(['\n', '\r', '\t', '.', ',', '’', '\''], " ");

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> CredibilityTable {
        CredibilityTable::default_seed()
    }

    #[test]
    fn exact_match() {
        assert!((table().score_for("Reuters") - 0.95).abs() < 1e-9);
    }

    #[test]
    fn alias_match() {
        let t = table();
        assert!((t.score_for("feeds.bbci.co.uk") - 0.92).abs() < 1e-9);
        assert!((t.score_for("www.ft.com") - 0.90).abs() < 1e-9);
    }

    #[test]
    fn substring_match() {
        assert!((table().score_for("reuters.com") - 0.95).abs() < 1e-9);
        assert!((table().score_for("The Financial Times") - 0.90).abs() < 1e-9);
    }

    #[test]
    fn default_score_used() {
        let t = table();
        assert!((t.score_for("my-blog.example") - 0.5).abs() < 1e-9);
    }
}
