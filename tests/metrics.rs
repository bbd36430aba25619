// tests/metrics.rs
#![cfg(feature = "strict-metrics")]
use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusBuilder;
use tokio_util::sync::CancellationToken;

use news_intel::ingest::config::SourceCatalog;
use news_intel::ingest::providers::RssFetcher;
use news_intel::{PipelineOrchestrator, RunInput};

#[tokio::test]
async fn pipeline_metrics_are_exported() {
    let handle = PrometheusBuilder::new().install_recorder().expect("recorder");

    let xml = std::fs::read_to_string("tests/fixtures/bbc_rss.xml").expect("fixture");
    let orchestrator = PipelineOrchestrator::new(SourceCatalog::default_seed())
        .with_fetcher("bbc", Arc::new(RssFetcher::from_fixture(&xml)));
    let input = RunInput {
        news_sources: vec!["bbc".into()],
        // Wide window so the fixture dates stay in range.
        date_range: "5200w".into(),
        enable_ai_analysis: false,
        ..RunInput::default()
    };
    orchestrator
        .run(&input, &CancellationToken::new())
        .await
        .expect("run");

    let out = handle.render();
    assert!(out.contains("news_fetch_articles_total"));
    assert!(out.contains("news_invalid_articles_total"));
    assert!(out.contains("news_fetch_ms"));
    assert!(out.contains("news_pipeline_last_run_ts"));
}
