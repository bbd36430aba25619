//! OpenAI backend (Chat Completions + Moderations).
//!
//! Each analysis kind is one chat request asking for a JSON object. The first
//! `{...}` span of the reply is parsed, so chatty answers still work.

use std::time::Duration;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use crate::analyze::client::{AiAnalysisClient, AiOutput, ContentModerator, ModerationVerdict};
use crate::error::AiError;
use crate::model::{
    AnalysisKind, AnalysisPayload, Article, Entities, Sentiment, SentimentLabel, Summarization,
    TopicTags,
};

pub const DEFAULT_MODEL: &str = "gpt-3.5-turbo";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Roughly four characters per token; used to cap prompt size.
const CHARS_PER_TOKEN: usize = 4;

pub const CATEGORIES: [&str; 19] = [
    "Politics",
    "Business",
    "Technology",
    "Healthcare",
    "Sports",
    "Entertainment",
    "Science",
    "Environment",
    "Education",
    "Crime",
    "International",
    "Economy",
    "Finance",
    "Startup",
    "AI/ML",
    "Cybersecurity",
    "Energy",
    "Transportation",
    "Real Estate",
];

static RE_JSON_OBJECT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

/// USD per 1K (input, output) tokens. Unknown models cost nothing.
pub fn price_per_1k(model: &str) -> (f64, f64) {
    match model {
        "gpt-3.5-turbo" => (0.0005, 0.0015),
        "gpt-4" | "gpt-4-turbo" => (0.01, 0.03),
        "gpt-4o-mini" => (0.00015, 0.0006),
        _ => (0.0, 0.0),
    }
}

pub fn usage_cost_usd(model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
    let (pin, pout) = price_per_1k(model);
    input_tokens as f64 / 1000.0 * pin + output_tokens as f64 / 1000.0 * pout
}

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    industry_focus: Option<String>,
}

impl OpenAiClient {
    pub fn new(api_key: impl Into<String>, model: Option<&str>, timeout: Duration) -> Result<Self, AiError> {
        let http = reqwest::Client::builder()
            .user_agent("news-intel/0.1")
            .connect_timeout(Duration::from_secs(4))
            .timeout(timeout)
            .build()
            .map_err(AiError::from)?;
        Ok(Self {
            http,
            api_key: api_key.into(),
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
            base_url: DEFAULT_BASE_URL.to_string(),
            industry_focus: None,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Industry hint folded into the classification prompt.
    pub fn with_industry_focus(mut self, focus: Option<String>) -> Self {
        self.industry_focus = focus.filter(|f| !f.trim().is_empty());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn chat(&self, prompt: &str, max_tokens: u32, temperature: f32) -> Result<(String, f64), AiError> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
            #[serde(default)]
            usage: Option<Usage>,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
            #[serde(default)]
            finish_reason: Option<String>,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            #[serde(default)]
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct Usage {
            prompt_tokens: u32,
            completion_tokens: u32,
        }

        let req = Req {
            model: &self.model,
            messages: vec![Msg {
                role: "user",
                content: prompt,
            }],
            temperature,
            max_tokens,
        };

        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&req)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }

        let body: Resp = resp
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(e.to_string()))?;
        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AiError::InvalidResponse("no choices".into()))?;
        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(AiError::PolicyRejection("content_filter".into()));
        }

        let (input, output) = match body.usage {
            Some(u) => (u.prompt_tokens, u.completion_tokens),
            None => ((prompt.len() / CHARS_PER_TOKEN) as u32, 0),
        };
        let cost = usage_cost_usd(&self.model, input, output);
        Ok((choice.message.content.unwrap_or_default(), cost))
    }

    fn prompt_for(&self, kind: AnalysisKind, article: &Article) -> (String, u32, f32) {
        let body = if article.body().is_empty() {
            article.title()
        } else {
            article.body()
        };
        match kind {
            AnalysisKind::Sentiment => (
                format!(
                    "Analyze the sentiment of this news article text. Provide your analysis in JSON format:\n\n\
                     Text: \"{}\"\n\n\
                     Return JSON with:\n\
                     - score: float between -1.0 (very negative) and 1.0 (very positive)\n\
                     - label: \"positive\", \"negative\", or \"neutral\"\n\
                     - confidence: float between 0.0 and 1.0\n\
                     - reasoning: brief explanation of the sentiment\n\nJSON:",
                    truncate_tokens(&article.analysis_text(), 2000)
                ),
                200,
                0.1,
            ),
            AnalysisKind::Summary => (
                format!(
                    "Summarize this news article in 2-3 sentences and extract 3-5 key points. Return JSON format:\n\n\
                     Title: {}\n\nContent: {}\n\n\
                     Return JSON with:\n\
                     - summary: 2-3 sentence summary\n\
                     - key_points: array of 3-5 key points (each 1 sentence)\n\nJSON:",
                    article.title(),
                    truncate_tokens(body, 2500)
                ),
                300,
                0.2,
            ),
            AnalysisKind::Classification => {
                let focus = match &self.industry_focus {
                    Some(f) => format!("\nThe reader follows the {f} industry; prefer categories relevant to it.\n"),
                    None => String::new(),
                };
                (
                    format!(
                        "Classify this news article into relevant categories. Return JSON format:\n\n\
                         Title: {}\n\nContent: {}\n\n\
                         Available categories: {}\n{focus}\n\
                         Return JSON with:\n\
                         - categories: array of 1-3 most relevant categories from the list above\n\
                         - keywords: array of 5-10 most important keywords/phrases\n\nJSON:",
                        article.title(),
                        truncate_tokens(body, 2000),
                        CATEGORIES.join(", ")
                    ),
                    300,
                    0.1,
                )
            }
            AnalysisKind::Entities => (
                format!(
                    "Extract the named entities from this news article. Return JSON format:\n\n\
                     Title: {}\n\nContent: {}\n\n\
                     Return JSON with arrays \"people\", \"companies\", \"locations\".\n\nJSON:",
                    article.title(),
                    truncate_tokens(body, 2000)
                ),
                300,
                0.1,
            ),
            AnalysisKind::Trend => (String::new(), 0, 0.0),
        }
    }
}

#[async_trait]
impl AiAnalysisClient for OpenAiClient {
    async fn analyze(&self, kind: AnalysisKind, article: &Article) -> Result<AiOutput, AiError> {
        if !kind.is_ai() {
            return Err(AiError::MalformedInput(format!("{kind} is not an AI analysis")));
        }
        let (prompt, max_tokens, temperature) = self.prompt_for(kind, article);
        let (text, backend_cost_usd) = self.chat(&prompt, max_tokens, temperature).await?;
        let payload = parse_payload(kind, &text)?;
        Ok(AiOutput {
            payload,
            backend_cost_usd,
        })
    }

    fn provider_name(&self) -> &'static str {
        "openai"
    }
}

#[async_trait]
impl ContentModerator for OpenAiClient {
    async fn check(&self, text: &str) -> Result<ModerationVerdict, AiError> {
        #[derive(Serialize)]
        struct Req<'a> {
            input: &'a str,
        }
        #[derive(Deserialize)]
        struct Resp {
            results: Vec<ModResult>,
        }
        #[derive(Deserialize)]
        struct ModResult {
            flagged: bool,
            #[serde(default)]
            categories: std::collections::BTreeMap<String, bool>,
        }

        let input: String = text.chars().take(1_000).collect();
        let resp = self
            .http
            .post(format!("{}/moderations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&Req { input: &input })
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }
        let body: Resp = resp
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(e.to_string()))?;
        match body.results.into_iter().next() {
            Some(r) if r.flagged => Ok(ModerationVerdict::Flagged {
                categories: r
                    .categories
                    .into_iter()
                    .filter_map(|(k, v)| v.then_some(k))
                    .collect(),
            }),
            _ => Ok(ModerationVerdict::Allowed),
        }
    }
}

/// HTTP status → error taxonomy.
pub fn map_status(status: StatusCode, body: &str) -> AiError {
    match status.as_u16() {
        408 | 504 => AiError::Timeout,
        429 => AiError::RateLimited,
        s @ 500..=599 => AiError::Server(s),
        400 | 422 if body.contains("content_policy") || body.contains("content_filter") => {
            AiError::PolicyRejection(snippet(body))
        }
        400 | 422 => AiError::MalformedInput(snippet(body)),
        s => AiError::Server(s),
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(200).collect()
}

fn truncate_tokens(text: &str, max_tokens: usize) -> String {
    text.chars().take(max_tokens * CHARS_PER_TOKEN).collect()
}

/// First `{...}` span of a model reply.
pub fn extract_json(text: &str) -> Option<&str> {
    RE_JSON_OBJECT.find(text).map(|m| m.as_str())
}

/// Parse a model reply into the payload for `kind`.
pub fn parse_payload(kind: AnalysisKind, text: &str) -> Result<AnalysisPayload, AiError> {
    let json = extract_json(text)
        .ok_or_else(|| AiError::InvalidResponse("no JSON object in reply".into()))?;
    let bad = |e: serde_json::Error| AiError::InvalidResponse(format!("{kind}: {e}"));

    match kind {
        AnalysisKind::Sentiment => {
            #[derive(Deserialize)]
            struct Raw {
                score: f64,
                label: String,
                #[serde(default)]
                confidence: f64,
                #[serde(default)]
                reasoning: String,
            }
            let r: Raw = serde_json::from_str(json).map_err(bad)?;
            let label = match r.label.trim().to_ascii_lowercase().as_str() {
                "positive" => SentimentLabel::Positive,
                "negative" => SentimentLabel::Negative,
                "neutral" => SentimentLabel::Neutral,
                other => {
                    return Err(AiError::InvalidResponse(format!("unknown sentiment label {other:?}")))
                }
            };
            Ok(AnalysisPayload::Sentiment(Sentiment {
                score: r.score.clamp(-1.0, 1.0),
                label,
                confidence: r.confidence.clamp(0.0, 1.0),
                reasoning: r.reasoning,
            }))
        }
        AnalysisKind::Summary => {
            let s: Summarization = serde_json::from_str(json).map_err(bad)?;
            if s.summary.trim().is_empty() {
                return Err(AiError::InvalidResponse("empty summary".into()));
            }
            Ok(AnalysisPayload::Summary(s))
        }
        AnalysisKind::Classification => {
            let mut t: TopicTags = serde_json::from_str(json).map_err(bad)?;
            if t.categories.is_empty() {
                t.categories.push("General".to_string());
            }
            Ok(AnalysisPayload::Classification(t))
        }
        AnalysisKind::Entities => {
            // Older prompts nest entities under "entities".
            let v: serde_json::Value = serde_json::from_str(json).map_err(bad)?;
            let inner = v.get("entities").cloned().unwrap_or(v);
            let e: Entities = serde_json::from_value(inner).map_err(bad)?;
            Ok(AnalysisPayload::Entities(e))
        }
        AnalysisKind::Trend => Err(AiError::MalformedInput("trend is scored locally".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_json_from_chatty_reply() {
        let reply = "Sure! Here you go:\n{\"score\": 0.4, \"label\": \"Positive\", \"confidence\": 1.3, \"reasoning\": \"good\"}\nThanks";
        match parse_payload(AnalysisKind::Sentiment, reply).unwrap() {
            AnalysisPayload::Sentiment(s) => {
                assert_eq!(s.label, SentimentLabel::Positive);
                assert_eq!(s.confidence, 1.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_json_is_invalid_response() {
        assert!(matches!(
            parse_payload(AnalysisKind::Summary, "no idea"),
            Err(AiError::InvalidResponse(_))
        ));
    }

    #[test]
    fn entities_accept_nested_shape() {
        let reply = r#"{"entities":{"people":["Ada"],"companies":["Acme"],"locations":[]}}"#;
        let AnalysisPayload::Entities(e) = parse_payload(AnalysisKind::Entities, reply).unwrap() else {
            panic!("wrong payload");
        };
        assert_eq!(e.people, vec!["Ada".to_string()]);
        assert_eq!(e.companies, vec!["Acme".to_string()]);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(map_status(StatusCode::TOO_MANY_REQUESTS, ""), AiError::RateLimited);
        assert_eq!(map_status(StatusCode::GATEWAY_TIMEOUT, ""), AiError::Timeout);
        assert_eq!(map_status(StatusCode::BAD_GATEWAY, ""), AiError::Server(502));
        assert!(matches!(
            map_status(StatusCode::BAD_REQUEST, "{\"code\":\"content_policy_violation\"}"),
            AiError::PolicyRejection(_)
        ));
        assert!(matches!(
            map_status(StatusCode::UNPROCESSABLE_ENTITY, "bad"),
            AiError::MalformedInput(_)
        ));
    }

    #[test]
    fn usage_cost_uses_price_table() {
        let c = usage_cost_usd("gpt-4", 1000, 500);
        assert!((c - 0.025).abs() < 1e-12);
        assert_eq!(usage_cost_usd("unknown-model", 1000, 1000), 0.0);
    }
}
