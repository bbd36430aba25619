//! Run input as supplied by the host (JSON), and the validated [`RunPlan`]
//! derived from it.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::cost::Tier;
use crate::credibility::CredibilityTable;
use crate::error::PipelineError;
use crate::ingest::config::SourceCatalog;
use crate::ingest::parse_keywords;
use crate::ingest::types::DateRange;
use crate::model::{AnalysisKind, SourceConfig};

fn yes() -> bool {
    true
}
fn default_sources() -> Vec<String> {
    vec!["cnn".into(), "bbc".into(), "reuters".into()]
}
fn default_date_range() -> String {
    "1d".to_string()
}
fn default_max_articles() -> usize {
    1_000
}
fn default_languages() -> Vec<String> {
    vec!["en".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunInput {
    #[serde(default = "default_sources")]
    pub news_sources: Vec<String>,
    /// Comma-separated free text.
    #[serde(default)]
    pub keywords: String,
    #[serde(default = "yes")]
    pub enable_ai_analysis: bool,
    #[serde(default = "yes")]
    pub sentiment_analysis: bool,
    #[serde(default = "yes")]
    pub summarization: bool,
    #[serde(default = "yes")]
    pub topic_classification: bool,
    #[serde(default = "yes")]
    pub entity_extraction: bool,
    #[serde(default = "yes")]
    pub trend_scoring: bool,
    #[serde(default = "default_date_range")]
    pub date_range: String,
    #[serde(default = "default_max_articles")]
    pub max_articles: usize,
    #[serde(default = "default_languages")]
    pub languages: Vec<String>,
    #[serde(default)]
    pub industry_focus: Vec<String>,
    /// Presence switches the run to BYOK.
    #[serde(default)]
    pub openai_api_key: Option<String>,
    #[serde(default)]
    pub tier: Option<Tier>,
    #[serde(default)]
    pub free_tier_used_this_month: u32,
    #[serde(default)]
    pub custom_feeds: Vec<String>,
}

impl Default for RunInput {
    fn default() -> Self {
        Self {
            news_sources: default_sources(),
            keywords: String::new(),
            enable_ai_analysis: true,
            sentiment_analysis: true,
            summarization: true,
            topic_classification: true,
            entity_extraction: true,
            trend_scoring: true,
            date_range: default_date_range(),
            max_articles: default_max_articles(),
            languages: default_languages(),
            industry_focus: Vec::new(),
            openai_api_key: None,
            tier: None,
            free_tier_used_this_month: 0,
            custom_feeds: Vec::new(),
        }
    }
}

/// Validated, resolved form of a [`RunInput`].
#[derive(Debug, Clone)]
pub struct RunPlan {
    pub sources: Vec<SourceConfig>,
    /// Requested ids as given, for the output session block.
    pub requested_sources: Vec<String>,
    pub keywords: Vec<String>,
    pub range: DateRange,
    pub date_range_label: String,
    pub max_articles: usize,
    pub kinds: BTreeSet<AnalysisKind>,
    pub ai_enabled: bool,
    pub tier: Tier,
    pub byok_key: Option<String>,
    pub industry_focus: Option<String>,
    pub free_tier_used_this_month: u32,
}

impl RunPlan {
    pub fn ai_kinds(&self) -> BTreeSet<AnalysisKind> {
        self.kinds.iter().copied().filter(|k| k.is_ai()).collect()
    }
}

/// `<n><unit>` with unit `m`, `h`, `d` or `w` (e.g. `30m`, `6h`, `7d`).
pub fn parse_date_range(s: &str) -> Result<Duration, PipelineError> {
    let s = s.trim();
    let bad = || PipelineError::InvalidInput(format!("date_range {s:?}: expected <n><m|h|d|w>"));
    let unit = s.chars().last().ok_or_else(bad)?;
    let n: i64 = s[..s.len() - unit.len_utf8()].parse().map_err(|_| bad())?;
    if n <= 0 {
        return Err(bad());
    }
    let span = match unit.to_ascii_lowercase() {
        'm' => Duration::try_minutes(n),
        'h' => Duration::try_hours(n),
        'd' => Duration::try_days(n),
        'w' => Duration::try_weeks(n),
        _ => None,
    };
    span.ok_or_else(bad)
}

impl RunInput {
    pub fn from_json(s: &str) -> Result<Self, PipelineError> {
        serde_json::from_str(s).map_err(|e| PipelineError::InvalidInput(e.to_string()))
    }

    pub fn requested_kinds(&self) -> BTreeSet<AnalysisKind> {
        let mut kinds = BTreeSet::new();
        if self.enable_ai_analysis {
            for (on, k) in [
                (self.sentiment_analysis, AnalysisKind::Sentiment),
                (self.summarization, AnalysisKind::Summary),
                (self.topic_classification, AnalysisKind::Classification),
                (self.entity_extraction, AnalysisKind::Entities),
            ] {
                if on {
                    kinds.insert(k);
                }
            }
        }
        if self.trend_scoring {
            kinds.insert(AnalysisKind::Trend);
        }
        kinds
    }

    /// Resolve sources, window, kinds and tier.
    pub fn plan(
        &self,
        catalog: &SourceCatalog,
        credibility: &CredibilityTable,
        now: DateTime<Utc>,
    ) -> Result<RunPlan, PipelineError> {
        if self.max_articles == 0 {
            return Err(PipelineError::InvalidInput("max_articles must be positive".into()));
        }
        let span = parse_date_range(&self.date_range)?;
        let range = DateRange::try_last(span, now).ok_or_else(|| {
            PipelineError::InvalidInput(format!(
                "date_range {:?} reaches before the earliest representable time",
                self.date_range.trim()
            ))
        })?;

        let languages: BTreeSet<String> = self
            .languages
            .iter()
            .map(|l| l.trim().to_ascii_lowercase())
            .filter(|l| !l.is_empty())
            .collect();

        let mut sources: Vec<SourceConfig> = Vec::new();
        let mut seen = BTreeSet::new();
        for id in &self.news_sources {
            let Some(src) = catalog.get(id) else {
                tracing::warn!(source = %id, "unknown news source; skipping");
                continue;
            };
            if !src.enabled {
                tracing::info!(source = %src.id, "source disabled in catalog; skipping");
                continue;
            }
            if !languages.is_empty() && !languages.contains(&src.language.to_ascii_lowercase()) {
                tracing::info!(source = %src.id, language = %src.language, "source language not requested; skipping");
                continue;
            }
            if seen.insert(src.id.clone()) {
                sources.push(src.clone());
            }
        }
        for url in &self.custom_feeds {
            let src = SourceCatalog::custom_feed(url, credibility)
                .map_err(|e| PipelineError::InvalidInput(format!("{e:#}")))?;
            if seen.insert(src.id.clone()) {
                sources.push(src);
            }
        }
        if sources.is_empty() {
            return Err(PipelineError::InvalidInput(
                "no usable news sources selected".into(),
            ));
        }

        let byok_key = self
            .openai_api_key
            .as_deref()
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(str::to_string);
        let tier = match (&byok_key, self.tier) {
            (Some(_), _) => Tier::Byok,
            (None, Some(Tier::Byok)) => {
                return Err(PipelineError::InvalidInput(
                    "tier byok requires openai_api_key".into(),
                ))
            }
            (None, Some(t)) => t,
            (None, None) => Tier::Free,
        };

        let kinds = self.requested_kinds();
        let ai_enabled = kinds.iter().any(|k| k.is_ai());
        let industry_focus = (!self.industry_focus.is_empty()).then(|| {
            self.industry_focus
                .iter()
                .map(|t| t.trim())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join(", ")
        });

        Ok(RunPlan {
            sources,
            requested_sources: self.news_sources.clone(),
            keywords: parse_keywords(&self.keywords),
            range,
            date_range_label: self.date_range.trim().to_string(),
            max_articles: self.max_articles,
            kinds,
            ai_enabled,
            tier,
            byok_key,
            industry_focus,
            free_tier_used_this_month: self.free_tier_used_this_month,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(input: &RunInput) -> Result<RunPlan, PipelineError> {
        input.plan(
            &SourceCatalog::default_seed(),
            &CredibilityTable::default_seed(),
            Utc::now(),
        )
    }

    #[test]
    fn defaults_cover_three_outlets_and_all_kinds() {
        let input = RunInput::default();
        assert_eq!(input.news_sources, vec!["cnn", "bbc", "reuters"]);
        assert_eq!(input.max_articles, 1_000);
        assert_eq!(input.date_range, "1d");
        assert_eq!(input.requested_kinds().len(), 5);

        let p = plan(&input).unwrap();
        assert_eq!(p.tier, Tier::Free);
        assert_eq!(p.sources.len(), 3);
        assert_eq!(p.range.span(), Duration::days(1));
    }

    #[test]
    fn date_ranges() {
        assert_eq!(parse_date_range("6h").unwrap(), Duration::hours(6));
        assert_eq!(parse_date_range("30d").unwrap(), Duration::days(30));
        assert_eq!(parse_date_range("2w").unwrap(), Duration::weeks(2));
        assert!(parse_date_range("").is_err());
        assert!(parse_date_range("d").is_err());
        assert!(parse_date_range("0d").is_err());
        assert!(parse_date_range("5y").is_err());
    }

    #[test]
    fn oversized_date_ranges_are_invalid_input() {
        assert!(matches!(
            parse_date_range("9999999999999999d"),
            Err(PipelineError::InvalidInput(_))
        ));
        assert!(matches!(
            parse_date_range("9223372036854775807w"),
            Err(PipelineError::InvalidInput(_))
        ));

        // Representable as a span, but the window start underflows.
        let input = RunInput {
            date_range: "99999999999d".into(),
            ..RunInput::default()
        };
        assert!(matches!(plan(&input), Err(PipelineError::InvalidInput(_))));
    }

    #[test]
    fn api_key_switches_to_byok() {
        let input = RunInput {
            openai_api_key: Some("sk-user".into()),
            tier: Some(Tier::Builtin),
            ..RunInput::default()
        };
        let p = plan(&input).unwrap();
        assert_eq!(p.tier, Tier::Byok);
        assert_eq!(p.byok_key.as_deref(), Some("sk-user"));

        let blank = RunInput {
            openai_api_key: Some("  ".into()),
            ..RunInput::default()
        };
        assert_eq!(plan(&blank).unwrap().tier, Tier::Free);

        let byok_without_key = RunInput {
            tier: Some(Tier::Byok),
            ..RunInput::default()
        };
        assert!(matches!(
            plan(&byok_without_key),
            Err(PipelineError::InvalidInput(_))
        ));
    }

    #[test]
    fn ai_toggles_and_custom_feeds() {
        let input: RunInput = serde_json::from_str(
            r#"{"news_sources":["nope"],"enable_ai_analysis":false,
                "custom_feeds":["https://www.example.org/feed.xml"],"industry_focus":["fintech"," banking "]}"#,
        )
        .unwrap();
        let p = plan(&input).unwrap();
        assert!(!p.ai_enabled);
        assert_eq!(p.kinds, [AnalysisKind::Trend].into());
        assert_eq!(p.sources.len(), 1);
        assert_eq!(p.sources[0].name, "Custom");
        assert_eq!(p.sources[0].domain, "example.org");
        assert_eq!(p.industry_focus.as_deref(), Some("fintech, banking"));
    }

    #[test]
    fn language_filter_can_empty_the_source_set() {
        let input = RunInput {
            languages: vec!["de".into()],
            ..RunInput::default()
        };
        assert!(matches!(plan(&input), Err(PipelineError::InvalidInput(_))));
    }
}
