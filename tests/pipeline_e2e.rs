// tests/pipeline_e2e.rs
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures::stream;
use tokio_util::sync::CancellationToken;

use news_intel::analyze::{AiAnalysisClient, AiOutput};
use news_intel::cost::{CostSettings, CostUnits, Tier};
use news_intel::error::{AiError, DenialReason, PipelineError, SourceError};
use news_intel::ingest::config::SourceCatalog;
use news_intel::ingest::content::ContentFetcher;
use news_intel::ingest::rate_limit::RateLimiter;
use news_intel::ingest::types::{ArticleStream, DateRange, SourceFetcher};
use news_intel::model::{
    AnalysisKind, AnalysisPayload, Article, RawArticle, Sentiment, SentimentLabel, SourceConfig,
    Summarization, TopicTags,
};
use news_intel::{PipelineOrchestrator, PipelineSettings, RunInput};

const COMPANIES: [&str; 12] = [
    "Acme", "Globex", "Initech", "Umbrella", "Hooli", "Stark", "Wayne", "Tyrell", "Cyberdyne",
    "Soylent", "Oscorp", "Massive",
];

fn src(id: &str, credibility: f64) -> SourceConfig {
    SourceConfig {
        id: id.into(),
        name: id.to_uppercase(),
        domain: format!("{id}.test"),
        enabled: true,
        rate_limit_per_minute: 600,
        credibility_score: credibility,
        feeds: vec![],
        language: "en".into(),
    }
}

fn catalog() -> SourceCatalog {
    SourceCatalog::new([src("alpha", 0.9), src("beta", 0.8), src("gamma", 0.7)])
}

fn earnings(host: &str, range: std::ops::Range<usize>) -> Vec<RawArticle> {
    range
        .map(|i| RawArticle {
            title: format!("{} reports quarterly earnings", COMPANIES[i]),
            url: format!("https://{host}/earnings/{i}"),
            published_at: Some(Utc::now() - Duration::minutes(i as i64 + 1)),
            text: format!("{} beat expectations.", COMPANIES[i]),
        })
        .collect()
}

enum Feed {
    Items(Vec<RawArticle>),
    Down,
}

struct StaticFetcher(Feed);

impl SourceFetcher for StaticFetcher {
    fn fetch<'a>(
        &'a self,
        source: &'a SourceConfig,
        _keywords: &'a [String],
        _range: DateRange,
        max_articles: usize,
        _limiter: &'a RateLimiter,
    ) -> ArticleStream<'a> {
        match &self.0 {
            Feed::Items(items) => Box::pin(stream::iter(
                items.iter().take(max_articles).cloned().map(Ok),
            )),
            Feed::Down => Box::pin(stream::iter(vec![Err(SourceError::unavailable(
                &source.id,
                "connection refused",
            ))])),
        }
    }

    fn name(&self) -> &str {
        "static"
    }
}

struct MockAi {
    fail_sentiment: bool,
}

#[async_trait]
impl AiAnalysisClient for MockAi {
    async fn analyze(&self, kind: AnalysisKind, article: &Article) -> Result<AiOutput, AiError> {
        let payload = match kind {
            AnalysisKind::Sentiment if self.fail_sentiment => return Err(AiError::Timeout),
            AnalysisKind::Sentiment => AnalysisPayload::Sentiment(Sentiment {
                score: 0.3,
                label: SentimentLabel::Positive,
                confidence: 0.8,
                reasoning: "beat expectations".into(),
            }),
            AnalysisKind::Summary => AnalysisPayload::Summary(Summarization {
                summary: article.title().to_string(),
                key_points: vec!["earnings".into()],
            }),
            AnalysisKind::Classification => AnalysisPayload::Classification(TopicTags {
                categories: vec!["Business".into()],
                keywords: vec!["earnings".into()],
            }),
            _ => AnalysisPayload::Entities(Default::default()),
        };
        Ok(AiOutput::free(payload))
    }

    fn provider_name(&self) -> &'static str {
        "mock"
    }
}

fn orchestrator(feeds: Vec<(&str, Feed)>) -> PipelineOrchestrator {
    let mut o = PipelineOrchestrator::new(catalog());
    for (id, feed) in feeds {
        o = o.with_fetcher(id, Arc::new(StaticFetcher(feed)));
    }
    o
}

fn input(sources: &[&str]) -> RunInput {
    RunInput {
        news_sources: sources.iter().map(|s| s.to_string()).collect(),
        ..RunInput::default()
    }
}

#[tokio::test]
async fn one_empty_and_one_failing_source_do_not_fail_the_run() {
    let o = orchestrator(vec![
        ("alpha", Feed::Items(earnings("alpha.test", 0..2))),
        ("beta", Feed::Items(vec![])),
        ("gamma", Feed::Down),
    ]);
    let mut inp = input(&["alpha", "beta", "gamma"]);
    inp.enable_ai_analysis = false;

    let report = o.run(&inp, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.records.len(), 2);
    assert_eq!(report.summary.sources_requested, 3);
    assert_eq!(report.summary.sources_succeeded, 1);
    assert_eq!(report.summary.source_failures.len(), 1);
    assert_eq!(report.summary.source_failures[0].source_id, "gamma");
}

#[tokio::test]
async fn all_sources_empty_is_no_sources_available() {
    let o = orchestrator(vec![
        ("alpha", Feed::Items(vec![])),
        ("beta", Feed::Down),
        ("gamma", Feed::Items(vec![])),
    ]);
    let err = o
        .run(&input(&["alpha", "beta", "gamma"]), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::NoSourcesAvailable { attempted: 3 }));
}

#[tokio::test]
async fn free_tier_quota_limits_analysis_and_omits_fields() {
    let o = orchestrator(vec![("alpha", Feed::Items(earnings("alpha.test", 0..10)))])
        .with_ai(Arc::new(MockAi {
            fail_sentiment: false,
        }));
    let mut inp = input(&["alpha"]);
    inp.max_articles = 10;
    inp.tier = Some(Tier::Free);
    inp.free_tier_used_this_month = 45;

    let report = o.run(&inp, &CancellationToken::new()).await.unwrap();
    let s = &report.summary;
    assert_eq!(report.records.len(), 10);
    assert_eq!(s.complete, 5);
    assert_eq!(s.skipped, 5);
    assert_eq!(s.denials.get(&DenialReason::TierQuotaExceeded), Some(&5));
    assert_eq!(s.total_cost_usd, CostUnits::ZERO);

    let json: Vec<serde_json::Value> = report
        .records
        .iter()
        .map(|r| serde_json::to_value(r).unwrap())
        .collect();
    let analyzed = json
        .iter()
        .filter(|v| v["analysis"].get("sentiment").is_some())
        .count();
    assert_eq!(analyzed, 5);
    for v in json.iter().filter(|v| v["analysis"]["status"] == "failed") {
        let analysis = v["analysis"].as_object().unwrap();
        assert!(analysis.get("sentiment").is_none());
        assert!(analysis.get("summarization").is_none());
        assert!(analysis.get("classification").is_none());
        assert!(analysis.contains_key("trending_score"));
    }
}

#[tokio::test(start_paused = true)]
async fn failing_kind_yields_partial_records() {
    let o = orchestrator(vec![("alpha", Feed::Items(earnings("alpha.test", 0..1)))])
        .with_ai(Arc::new(MockAi {
            fail_sentiment: true,
        }));
    let mut inp = input(&["alpha"]);
    inp.tier = Some(Tier::Builtin);
    inp.topic_classification = false;
    inp.entity_extraction = false;

    let report = o.run(&inp, &CancellationToken::new()).await.unwrap();
    let v = serde_json::to_value(&report.records[0]).unwrap();
    assert_eq!(v["analysis"]["status"], "partial");
    assert!(v["analysis"].get("sentiment").is_none());
    assert_eq!(
        v["analysis"]["summarization"]["summary"],
        "Acme reports quarterly earnings"
    );
    assert_eq!(report.summary.partial, 1);
    assert_eq!(report.summary.total_cost_usd, CostUnits::from_micros(1_500));
    assert_eq!(
        report.summary.cost_by_kind.get(&AnalysisKind::Summary),
        Some(&CostUnits::from_micros(1_500))
    );
}

#[tokio::test]
async fn byok_key_uses_flat_fee_without_article_cap() {
    let settings = PipelineSettings {
        cost: CostSettings {
            article_cap: 1,
            ..CostSettings::default()
        },
        ..PipelineSettings::default()
    };
    let o = orchestrator(vec![("alpha", Feed::Items(earnings("alpha.test", 0..3)))])
        .with_byok_ai(Arc::new(MockAi {
            fail_sentiment: false,
        }))
        .with_settings(settings);
    let mut inp = input(&["alpha"]);
    inp.openai_api_key = Some("sk-user".into());

    let report = o.run(&inp, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.summary.tier, Tier::Byok);
    assert_eq!(report.summary.complete, 3);
    assert_eq!(report.summary.total_cost_usd, CostUnits::from_micros(6_000));
    assert!(report.summary.billing.starts_with("BYOK tier"));
}

#[tokio::test]
async fn keyword_filter_dedup_and_session_block() {
    let mut alpha = earnings("alpha.test", 0..3);
    alpha.push(RawArticle {
        title: "Weather turns colder".into(),
        url: "https://alpha.test/weather".into(),
        published_at: None,
        text: String::new(),
    });
    // beta carries the same Acme story under the same URL path on its own host.
    let mut beta = earnings("beta.test", 0..1);
    beta[0].url = "https://alpha.test/earnings/0".into();

    let o = orchestrator(vec![
        ("alpha", Feed::Items(alpha)),
        ("beta", Feed::Items(beta)),
    ]);
    let mut inp = input(&["alpha", "beta"]);
    inp.keywords = "earnings, merger".into();
    inp.enable_ai_analysis = false;

    let report = o.run(&inp, &CancellationToken::new()).await.unwrap();
    let s = &report.summary;
    assert_eq!(s.articles_fetched, 5);
    assert_eq!(s.keyword_filtered, 1);
    assert_eq!(s.duplicates_dropped, 1);
    assert_eq!(report.records.len(), 3);
    assert_eq!(s.not_analyzed, 3);

    let acme = report
        .records
        .iter()
        .find(|r| r.title.starts_with("Acme"))
        .unwrap();
    assert_eq!(acme.source.name, "ALPHA");

    let v = serde_json::to_value(acme).unwrap();
    assert!(v["analysis"].get("status").is_none());
    let trend = v["analysis"]["trending_score"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&trend));
    assert_eq!(v["processing_session"]["ai_enabled"], false);
    assert_eq!(v["processing_session"]["date_range"], "1d");
    assert_eq!(
        v["processing_session"]["sources"],
        serde_json::json!(["alpha", "beta"])
    );
}

#[tokio::test]
async fn untokenizable_titles_are_counted_when_trend_drops_them() {
    let mut alpha = earnings("alpha.test", 0..2);
    alpha.push(RawArticle {
        title: "? !".into(),
        url: "https://alpha.test/punctuation".into(),
        published_at: None,
        text: "Only punctuation in the headline.".into(),
    });
    let o = orchestrator(vec![("alpha", Feed::Items(alpha))]);
    let mut inp = input(&["alpha"]);
    inp.enable_ai_analysis = false;

    let report = o.run(&inp, &CancellationToken::new()).await.unwrap();
    let s = &report.summary;
    assert_eq!(s.articles_fetched, 3);
    assert_eq!(s.trend_invalid, 1);
    assert_eq!(s.records_emitted, 2);
    assert!(report.records.iter().all(|r| r.title != "? !"));
    assert_eq!(
        s.articles_fetched,
        s.keyword_filtered + s.duplicates_dropped + s.capped + s.trend_invalid + s.records_emitted
    );
}

/// Echoes whatever body the article carries as its summary.
struct BodyEchoAi;

#[async_trait]
impl AiAnalysisClient for BodyEchoAi {
    async fn analyze(&self, kind: AnalysisKind, article: &Article) -> Result<AiOutput, AiError> {
        let payload = match kind {
            AnalysisKind::Summary => AnalysisPayload::Summary(Summarization {
                summary: article.body().to_string(),
                key_points: vec![],
            }),
            _ => return Err(AiError::MalformedInput("unexpected kind".into())),
        };
        Ok(AiOutput::free(payload))
    }

    fn provider_name(&self) -> &'static str {
        "body-echo"
    }
}

#[tokio::test]
async fn page_content_feeds_summaries_when_enrichment_is_configured() {
    let page = "<html><body><nav><p>Menu</p></nav>\
        <article><p>Acme beat expectations on cloud revenue.</p></article></body></html>";
    let o = orchestrator(vec![("alpha", Feed::Items(earnings("alpha.test", 0..2)))])
        .with_ai(Arc::new(BodyEchoAi))
        .with_content_fetcher(Arc::new(ContentFetcher::from_fixtures([(
            "https://alpha.test/earnings/0",
            page,
        )])));
    let mut inp = input(&["alpha"]);
    inp.tier = Some(Tier::Builtin);
    inp.sentiment_analysis = false;
    inp.topic_classification = false;
    inp.entity_extraction = false;

    let report = o.run(&inp, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.summary.articles_enriched, 1);
    assert_eq!(report.summary.complete, 2);

    let summary_of = |title: &str| {
        let record = report
            .records
            .iter()
            .find(|r| r.title.starts_with(title))
            .unwrap();
        serde_json::to_value(record).unwrap()["analysis"]["summarization"]["summary"].clone()
    };
    assert_eq!(summary_of("Acme"), "Acme beat expectations on cloud revenue.");
    assert_eq!(summary_of("Globex"), "Globex beat expectations.");
}

#[tokio::test]
async fn enrichment_is_skipped_without_body_reading_kinds() {
    let o = orchestrator(vec![("alpha", Feed::Items(earnings("alpha.test", 0..1)))])
        .with_content_fetcher(Arc::new(ContentFetcher::from_fixtures([(
            "https://alpha.test/earnings/0",
            "<article><p>Never read.</p></article>",
        )])));
    let mut inp = input(&["alpha"]);
    inp.enable_ai_analysis = false;

    let report = o.run(&inp, &CancellationToken::new()).await.unwrap();
    assert_eq!(report.summary.articles_enriched, 0);
}

#[tokio::test]
async fn cancelled_before_fetch_is_reported() {
    let o = orchestrator(vec![("alpha", Feed::Items(earnings("alpha.test", 0..2)))]);
    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = o.run(&input(&["alpha"]), &cancel).await.unwrap_err();
    assert!(matches!(err, PipelineError::Cancelled));
}

#[tokio::test]
async fn unknown_only_sources_are_invalid_input() {
    let o = orchestrator(vec![]);
    let err = o
        .run(&input(&["nowhere"]), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PipelineError::InvalidInput(_)));
}
