// src/ingest/config.rs
use anyhow::{anyhow, Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::credibility::CredibilityTable;
use crate::model::SourceConfig;

const ENV_PATH: &str = "NEWS_SOURCES_PATH";

/// Known outlets keyed by source id.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceCatalog {
    sources: BTreeMap<String, SourceConfig>,
}

impl SourceCatalog {
    pub fn new(sources: impl IntoIterator<Item = SourceConfig>) -> Self {
        Self {
            sources: sources.into_iter().map(|s| (s.id.clone(), s)).collect(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&SourceConfig> {
        self.sources.get(&id.trim().to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = &SourceConfig> {
        self.sources.values()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Synthetic source for a user-supplied feed URL.
    pub fn custom_feed(url: &str, credibility: &CredibilityTable) -> Result<SourceConfig> {
        let parsed = url::Url::parse(url).with_context(|| format!("custom feed url {url:?}"))?;
        let host = parsed
            .host_str()
            .ok_or_else(|| anyhow!("custom feed url {url:?} has no host"))?;
        let domain = host.trim_start_matches("www.").to_string();
        Ok(SourceConfig {
            id: format!("custom:{domain}"),
            name: "Custom".to_string(),
            credibility_score: credibility.score_for(&domain),
            domain,
            enabled: true,
            rate_limit_per_minute: 30,
            feeds: vec![url.to_string()],
            language: "en".to_string(),
        })
    }

    /// Built-in outlets with their RSS feeds and credibility scores.
    pub fn default_seed() -> Self {
        fn src(
            id: &str,
            name: &str,
            domain: &str,
            credibility: f64,
            feeds: &[&str],
        ) -> SourceConfig {
            SourceConfig {
                id: id.to_string(),
                name: name.to_string(),
                domain: domain.to_string(),
                enabled: true,
                rate_limit_per_minute: 30,
                credibility_score: credibility,
                feeds: feeds.iter().map(|f| f.to_string()).collect(),
                language: "en".to_string(),
            }
        }

        Self::new([
            src(
                "cnn",
                "CNN",
                "cnn.com",
                0.85,
                &[
                    "http://rss.cnn.com/rss/edition.rss",
                    "http://rss.cnn.com/rss/edition_world.rss",
                    "http://rss.cnn.com/rss/edition_us.rss",
                    "http://rss.cnn.com/rss/money_latest.rss",
                ],
            ),
            src(
                "bbc",
                "BBC News",
                "bbc.com",
                0.92,
                &[
                    "http://feeds.bbci.co.uk/news/rss.xml",
                    "http://feeds.bbci.co.uk/news/world/rss.xml",
                    "http://feeds.bbci.co.uk/news/business/rss.xml",
                    "http://feeds.bbci.co.uk/news/technology/rss.xml",
                ],
            ),
            src(
                "reuters",
                "Reuters",
                "reuters.com",
                0.95,
                &[
                    "https://feeds.reuters.com/reuters/topNews",
                    "https://feeds.reuters.com/reuters/worldNews",
                    "https://feeds.reuters.com/reuters/businessNews",
                    "https://feeds.reuters.com/reuters/technologyNews",
                ],
            ),
            src(
                "ap_news",
                "Associated Press",
                "apnews.com",
                0.93,
                &[
                    "https://feeds.apnews.com/rss/apf-topnews",
                    "https://feeds.apnews.com/rss/apf-usnews",
                    "https://feeds.apnews.com/rss/apf-worldnews",
                    "https://feeds.apnews.com/rss/apf-business",
                ],
            ),
            src(
                "tech_crunch",
                "TechCrunch",
                "techcrunch.com",
                0.82,
                &[
                    "https://feeds.feedburner.com/TechCrunch",
                    "https://feeds.feedburner.com/techcrunch/startups",
                    "https://feeds.feedburner.com/techcrunch/fundings-exits",
                ],
            ),
            src(
                "bloomberg",
                "Bloomberg",
                "bloomberg.com",
                0.88,
                &[
                    "https://feeds.bloomberg.com/markets/news.rss",
                    "https://feeds.bloomberg.com/technology/news.rss",
                    "https://feeds.bloomberg.com/politics/news.rss",
                ],
            ),
            src(
                "financial_times",
                "Financial Times",
                "ft.com",
                0.90,
                &[
                    "https://www.ft.com/rss/home",
                    "https://www.ft.com/rss/companies",
                    "https://www.ft.com/rss/markets",
                ],
            ),
        ])
    }
}

/// Load a catalog from an explicit path. Supports TOML or JSON formats.
pub fn load_catalog_from(path: &Path) -> Result<SourceCatalog> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading source catalog from {}", path.display()))?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    parse_catalog(&content, ext.as_str())
}

/// Load the catalog using env var + fallbacks:
/// 1) $NEWS_SOURCES_PATH
/// 2) config/sources.toml
/// 3) config/sources.json
/// 4) built-in seed
pub fn load_catalog_default() -> Result<SourceCatalog> {
    if let Ok(p) = std::env::var(ENV_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return load_catalog_from(&pb);
        } else {
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
    }
    let toml_p = PathBuf::from("config/sources.toml");
    if toml_p.exists() {
        return load_catalog_from(&toml_p);
    }
    let json_p = PathBuf::from("config/sources.json");
    if json_p.exists() {
        return load_catalog_from(&json_p);
    }
    Ok(SourceCatalog::default_seed())
}

fn parse_catalog(s: &str, hint_ext: &str) -> Result<SourceCatalog> {
    let try_toml = hint_ext == "toml" || s.contains("[[sources]]");
    if try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    if let Ok(v) = parse_json(s) {
        return Ok(v);
    }
    if !try_toml {
        if let Ok(v) = parse_toml(s) {
            return Ok(v);
        }
    }
    Err(anyhow!("unsupported source catalog format"))
}

#[derive(serde::Deserialize)]
struct CatalogFile {
    sources: Vec<SourceConfig>,
}

fn parse_toml(s: &str) -> Result<SourceCatalog> {
    let v: CatalogFile = toml::from_str(s)?;
    Ok(clean(v.sources))
}

fn parse_json(s: &str) -> Result<SourceCatalog> {
    let v: CatalogFile = serde_json::from_str(s)?;
    Ok(clean(v.sources))
}

fn clean(items: Vec<SourceConfig>) -> SourceCatalog {
    SourceCatalog::new(items.into_iter().filter_map(|mut s| {
        s.id = s.id.trim().to_ascii_lowercase();
        if s.id.is_empty() {
            return None;
        }
        s.credibility_score = s.credibility_score.clamp(0.0, 1.0);
        Some(s)
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs};

    #[test]
    fn toml_and_json_formats_work() {
        let toml = r#"
[[sources]]
id = " Wire "
name = "Wire"
domain = "wire.test"
credibility_score = 1.7
feeds = ["https://wire.test/rss"]

[[sources]]
id = ""
name = "blank"
domain = "x"
credibility_score = 0.1
"#;
        let json = r#"{"sources":[{"id":"blog","name":"Blog","domain":"blog.test","credibility_score":0.4,"enabled":false}]}"#;

        let t = parse_toml(toml).unwrap();
        assert_eq!(t.len(), 1);
        let wire = t.get("wire").unwrap();
        assert_eq!(wire.credibility_score, 1.0);
        assert_eq!(wire.rate_limit_per_minute, 30);

        let j = parse_json(json).unwrap();
        assert!(!j.get("blog").unwrap().enabled);
    }

    #[test]
    fn seed_contains_builtin_outlets() {
        let c = SourceCatalog::default_seed();
        assert_eq!(c.len(), 7);
        assert!((c.get("Reuters").unwrap().credibility_score - 0.95).abs() < 1e-9);
    }

    #[serial_test::serial]
    #[test]
    fn default_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();

        env::remove_var(ENV_PATH);

        // No files in the temp CWD → built-in seed
        let v = load_catalog_default().unwrap();
        assert_eq!(v, SourceCatalog::default_seed());

        // Env wins
        let p_json = tmp.path().join("sources.json");
        fs::write(
            &p_json,
            r#"{"sources":[{"id":"x","name":"X","domain":"x.test","credibility_score":0.5}]}"#,
        )
        .unwrap();
        env::set_var(ENV_PATH, p_json.display().to_string());
        let v2 = load_catalog_default().unwrap();
        assert_eq!(v2.len(), 1);
        env::remove_var(ENV_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
