//! News aggregation CLI.
//! Reads a run input (JSON), fetches the selected outlets' RSS feeds, runs
//! the analysis pipeline and writes one JSON record per line followed by the
//! run summary.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use news_intel::analyze::{DynAiClient, DynModerator};
use news_intel::credibility::CredibilityTable;
use news_intel::ingest::config::{load_catalog_default, load_catalog_from};
use news_intel::ingest::content::ContentFetcher;
use news_intel::ingest::providers::RssFetcher;
use news_intel::{
    AiConfig, CostSettings, OpenAiClient, PipelineOrchestrator, PipelineSettings, RunInput,
};

#[derive(Debug, Parser)]
#[command(name = "news-intel", version, about = "Multi-source news aggregation with AI analysis")]
struct Cli {
    /// Run input as JSON. Reads stdin when omitted.
    #[arg(long)]
    input: Option<PathBuf>,
    /// Source catalog (TOML or JSON). Defaults to $NEWS_SOURCES_PATH / config/.
    #[arg(long)]
    sources: Option<PathBuf>,
    /// Built-in AI backend config. Defaults to config/ai.json.
    #[arg(long)]
    ai_config: Option<PathBuf>,
    /// Credibility table for custom feeds (JSON).
    #[arg(long)]
    credibility: Option<PathBuf>,
    /// Output file for JSON lines. Writes stdout when omitted.
    #[arg(long)]
    out: Option<PathBuf>,
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("news_intel=info,warn"));
    let json = std::env::var("NEWS_INTEL_LOG_JSON")
        .ok()
        .is_some_and(|v| v == "1");

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();

    let raw = match &cli.input {
        Some(p) => std::fs::read_to_string(p)
            .with_context(|| format!("reading run input from {}", p.display()))?,
        None => io::read_to_string(io::stdin()).context("reading run input from stdin")?,
    };
    let input = RunInput::from_json(&raw)?;

    let catalog = match &cli.sources {
        Some(p) => load_catalog_from(p)?,
        None => load_catalog_default()?,
    };
    let credibility = cli
        .credibility
        .as_ref()
        .map(CredibilityTable::load_from_file)
        .unwrap_or_default();

    let ai_cfg = match &cli.ai_config {
        Some(p) => AiConfig::load_from_file(p)
            .with_context(|| format!("loading AI config from {}", p.display()))?,
        None => AiConfig::load_default()?,
    };

    let settings = PipelineSettings {
        max_in_flight: ai_cfg.max_in_flight,
        cost: CostSettings::from_env(),
        ai_model: ai_cfg.model.clone(),
        ai_request_timeout: Duration::from_secs(ai_cfg.request_timeout_secs),
        ..PipelineSettings::default()
    };

    let mut orchestrator = PipelineOrchestrator::new(catalog)
        .with_credibility(credibility)
        .with_default_fetcher(Arc::new(RssFetcher::http()?))
        .with_content_fetcher(Arc::new(ContentFetcher::http()?))
        .with_settings(settings);

    if ai_cfg.is_usable() {
        let industry_focus = (!input.industry_focus.is_empty()).then(|| input.industry_focus.join(", "));
        let client = Arc::new(
            OpenAiClient::new(
                ai_cfg.api_key.clone(),
                Some(ai_cfg.model()),
                Duration::from_secs(ai_cfg.request_timeout_secs),
            )?
            .with_industry_focus(industry_focus),
        );
        let ai: DynAiClient = client.clone();
        let moderator: DynModerator = client;
        orchestrator = orchestrator.with_ai(ai).with_moderator(moderator);
    } else {
        tracing::info!("built-in AI backend not configured; only BYOK runs get AI analysis");
    }

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received; cancelling run");
                cancel.cancel();
            }
        });
    }

    let report = orchestrator.run(&input, &cancel).await?;

    let mut out: Box<dyn Write> = match &cli.out {
        Some(p) => Box::new(BufWriter::new(
            File::create(p).with_context(|| format!("creating {}", p.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    for record in &report.records {
        serde_json::to_writer(&mut out, record)?;
        out.write_all(b"\n")?;
    }
    serde_json::to_writer(&mut out, &report.summary)?;
    out.write_all(b"\n")?;
    out.flush()?;

    tracing::info!(billing = %report.summary.billing, "done");
    Ok(())
}
