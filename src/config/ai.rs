// src/config/ai.rs
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

use crate::analyze::openai::DEFAULT_MODEL;

fn default_provider() -> String {
    "openai".to_string()
}
fn default_max_in_flight() -> usize {
    3
}
fn default_request_timeout_secs() -> u64 {
    30
}

/// Built-in AI backend settings, loaded from `config/ai.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiConfig {
    pub enabled: bool,
    /// Only "openai" is supported.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    /// "ENV" means: read from OPENAI_API_KEY.
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: default_provider(),
            model: None,
            api_key: "ENV".to_string(),
            max_in_flight: default_max_in_flight(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl AiConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let cfg: AiConfig = serde_json::from_str(&data)?;
        cfg.resolved()
    }

    /// `config/ai.json` if present, else defaults (key from the environment).
    pub fn load_default() -> anyhow::Result<Self> {
        let p = Path::new("config/ai.json");
        if p.exists() {
            Self::load_from_file(p)
        } else {
            Self::default().resolved()
        }
    }

    fn resolved(mut self) -> anyhow::Result<Self> {
        self.provider = self.provider.to_lowercase();
        if self.provider != "openai" {
            anyhow::bail!("Unsupported provider in config: {}", self.provider);
        }

        // A missing key leaves AI unavailable rather than failing the load.
        if self.api_key.trim().eq_ignore_ascii_case("env") {
            self.api_key = env::var("OPENAI_API_KEY").unwrap_or_default();
        }

        if self.max_in_flight == 0 {
            self.max_in_flight = default_max_in_flight();
        }
        if self.request_timeout_secs == 0 {
            self.request_timeout_secs = default_request_timeout_secs();
        }
        Ok(self)
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// True when the built-in backend can actually be called.
    pub fn is_usable(&self) -> bool {
        self.enabled && !self.api_key.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[serial_test::serial]
    #[test]
    fn env_key_is_resolved_and_zeroes_defaulted() {
        env::set_var("OPENAI_API_KEY", "sk-test");
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(
            f,
            r#"{{"enabled":true,"provider":"OpenAI","api_key":"ENV","max_in_flight":0,"model":"gpt-4o-mini"}}"#
        )
        .unwrap();
        let cfg = AiConfig::load_from_file(f.path()).unwrap();
        env::remove_var("OPENAI_API_KEY");

        assert_eq!(cfg.provider, "openai");
        assert_eq!(cfg.api_key, "sk-test");
        assert_eq!(cfg.max_in_flight, 3);
        assert_eq!(cfg.model(), "gpt-4o-mini");
        assert!(cfg.is_usable());
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        write!(f, r#"{{"enabled":true,"provider":"claude","api_key":"x"}}"#).unwrap();
        assert!(AiConfig::load_from_file(f.path()).is_err());
    }
}
