//! # Pipeline Orchestrator
//! One run: plan → fetch (per-source, rate limited) → keyword filter →
//! dedup → cap → trend → page content → AI analysis under budget → output
//! records.
//!
//! All run-wide mutable state (budget, dedup set) is created per run and
//! dropped with it. Only [`PipelineError`] aborts a run; source, article and
//! analysis failures are counted in the [`RunSummary`].

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analyze::{
    AllowAllModerator, AnalysisScheduler, DynAiClient, DynModerator, OpenAiClient, RetryPolicy,
};
use crate::config::input::{RunInput, RunPlan};
use crate::cost::{CostController, CostSettings, CostUnits, Tier};
use crate::credibility::CredibilityTable;
use crate::dedup::{dedup_batch, DEFAULT_SIMILARITY_THRESHOLD};
use crate::error::{AnalysisFailure, DenialReason, PipelineError};
use crate::ingest::config::SourceCatalog;
use crate::ingest::content::{enrich_articles, ContentFetcher};
use crate::ingest::rate_limit::RateLimiter;
use crate::ingest::types::SourceFetcher;
use crate::ingest::{fetch_all, matches_keywords};
use crate::metrics::ensure_metrics_described;
use crate::model::{AnalysisKind, AnalysisResult, AnalysisStatus, Article};
use crate::output::{OutputRecord, ProcessingSession};
use crate::trend::{TrendScorer, TrendSnapshot};

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Articles analyzed concurrently.
    pub max_in_flight: usize,
    pub rate_limit_max_wait: Duration,
    pub similarity_threshold: f64,
    pub retry: RetryPolicy,
    pub cost: CostSettings,
    /// Model and timeout for the per-run BYOK client.
    pub ai_model: Option<String>,
    pub ai_request_timeout: Duration,
    /// Article pages downloaded concurrently during enrichment.
    pub content_concurrency: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            max_in_flight: 3,
            rate_limit_max_wait: Duration::from_secs(30),
            similarity_threshold: DEFAULT_SIMILARITY_THRESHOLD,
            retry: RetryPolicy::default(),
            cost: CostSettings::default(),
            ai_model: None,
            ai_request_timeout: Duration::from_secs(30),
            content_concurrency: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SourceFailure {
    pub source_id: String,
    pub reason: String,
}

/// Run-level metrics and cost report.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RunSummary {
    pub tier: Tier,
    pub sources_requested: usize,
    pub sources_succeeded: usize,
    pub source_failures: Vec<SourceFailure>,
    pub articles_fetched: usize,
    pub invalid_articles: usize,
    pub keyword_filtered: usize,
    /// Dropped by trend scoring (no scorable title tokens).
    pub trend_invalid: usize,
    /// Articles whose page text was attached before analysis.
    pub articles_enriched: usize,
    pub duplicates_dropped: usize,
    pub capped: usize,
    pub records_emitted: usize,
    pub ai_available: bool,
    pub complete: usize,
    pub partial: usize,
    pub failed: usize,
    /// Denied by the cost controller; emitted without AI fields.
    pub skipped: usize,
    pub content_rejected: usize,
    pub not_analyzed: usize,
    pub denials: BTreeMap<DenialReason, u32>,
    pub hard_cap_reached: bool,
    pub total_cost_usd: CostUnits,
    pub backend_cost_usd: f64,
    pub kinds_succeeded: BTreeMap<AnalysisKind, u32>,
    pub cost_by_kind: BTreeMap<AnalysisKind, CostUnits>,
    pub cancelled: bool,
    pub billing: String,
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub records: Vec<OutputRecord>,
    pub summary: RunSummary,
}

pub struct PipelineOrchestrator {
    catalog: SourceCatalog,
    credibility: CredibilityTable,
    fetchers: HashMap<String, Arc<dyn SourceFetcher>>,
    default_fetcher: Option<Arc<dyn SourceFetcher>>,
    ai: Option<DynAiClient>,
    byok_ai: Option<DynAiClient>,
    moderator: Option<DynModerator>,
    content: Option<Arc<ContentFetcher>>,
    settings: PipelineSettings,
}

impl PipelineOrchestrator {
    pub fn new(catalog: SourceCatalog) -> Self {
        Self {
            catalog,
            credibility: CredibilityTable::default(),
            fetchers: HashMap::new(),
            default_fetcher: None,
            ai: None,
            byok_ai: None,
            moderator: None,
            content: None,
            settings: PipelineSettings::default(),
        }
    }

    pub fn with_credibility(mut self, credibility: CredibilityTable) -> Self {
        self.credibility = credibility;
        self
    }

    /// Adapter for one source id.
    pub fn with_fetcher(mut self, source_id: &str, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetchers
            .insert(source_id.trim().to_ascii_lowercase(), fetcher);
        self
    }

    /// Adapter for every source without a dedicated one.
    pub fn with_default_fetcher(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.default_fetcher = Some(fetcher);
        self
    }

    /// Built-in AI backend (free and built-in tiers).
    pub fn with_ai(mut self, client: DynAiClient) -> Self {
        self.ai = Some(client);
        self
    }

    /// Backend for BYOK runs. Without it one is built from the run's key.
    pub fn with_byok_ai(mut self, client: DynAiClient) -> Self {
        self.byok_ai = Some(client);
        self
    }

    pub fn with_moderator(mut self, moderator: DynModerator) -> Self {
        self.moderator = Some(moderator);
        self
    }

    /// Download article pages before sentiment and summary analysis.
    pub fn with_content_fetcher(mut self, fetcher: Arc<ContentFetcher>) -> Self {
        self.content = Some(fetcher);
        self
    }

    pub fn with_settings(mut self, settings: PipelineSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub async fn run(
        &self,
        input: &RunInput,
        cancel: &CancellationToken,
    ) -> Result<RunReport, PipelineError> {
        ensure_metrics_described();
        let started = Utc::now();
        let plan = input.plan(&self.catalog, &self.credibility, started)?;
        info!(
            sources = plan.sources.len(),
            tier = %plan.tier,
            range = %plan.date_range_label,
            max_articles = plan.max_articles,
            "pipeline run starting"
        );

        // 1) Fetch
        let fetchers: HashMap<String, Arc<dyn SourceFetcher>> = plan
            .sources
            .iter()
            .filter_map(|s| {
                self.fetchers
                    .get(&s.id)
                    .or(self.default_fetcher.as_ref())
                    .map(|f| (s.id.clone(), Arc::clone(f)))
            })
            .collect();
        let limiter = RateLimiter::from_sources(&plan.sources, self.settings.rate_limit_max_wait);
        let outcome = fetch_all(
            &plan.sources,
            &fetchers,
            &limiter,
            &plan.keywords,
            plan.range,
            plan.max_articles,
            started,
            cancel,
        )
        .await;

        let source_failures: Vec<SourceFailure> = outcome
            .reports
            .iter()
            .filter_map(|r| {
                r.error.as_ref().map(|e| SourceFailure {
                    source_id: r.source_id.clone(),
                    reason: e.to_string(),
                })
            })
            .collect();
        let sources_succeeded = outcome.reports.iter().filter(|r| r.fetched > 0).count();
        let invalid_articles: usize = outcome.reports.iter().map(|r| r.invalid).sum();
        let articles_fetched = outcome.articles.len();

        if outcome.articles.is_empty() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            warn!(attempted = plan.sources.len(), "no source produced articles");
            return Err(PipelineError::NoSourcesAvailable {
                attempted: plan.sources.len(),
            });
        }

        // 2) Keyword filter
        let pool: Vec<Article> = outcome
            .articles
            .into_iter()
            .filter(|a| matches_keywords(a, &plan.keywords))
            .collect();
        let keyword_filtered = articles_fetched - pool.len();

        // 3) Dedup, newest first, cap
        let deduped = dedup_batch(pool.clone(), self.settings.similarity_threshold);
        let mut survivors = deduped.survivors;
        survivors.sort_by(|a, b| {
            b.published_at()
                .cmp(&a.published_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        let capped = survivors.len().saturating_sub(plan.max_articles);
        survivors.truncate(plan.max_articles);

        // 4) Trend, against the pre-dedup pool
        let mut trend_scores: HashMap<String, f64> = HashMap::new();
        let mut trend_invalid = 0usize;
        if plan.kinds.contains(&AnalysisKind::Trend) {
            let snapshot = TrendSnapshot::new(&pool);
            let scorer = TrendScorer::new(plan.range).with_threshold(self.settings.similarity_threshold);
            survivors.retain(|a| match scorer.score_in(a, &snapshot) {
                Ok(score) => {
                    trend_scores.insert(a.id().to_string(), score);
                    true
                }
                Err(e) => {
                    warn!(article = %a.id(), error = %e, "dropping article from run");
                    counter!("news_invalid_articles_total").increment(1);
                    trend_invalid += 1;
                    false
                }
            });
        }

        // 5) Page content for the prompts that read the article body
        let mut articles_enriched = 0;
        let reads_body = plan.kinds.contains(&AnalysisKind::Sentiment)
            || plan.kinds.contains(&AnalysisKind::Summary);
        let content = self
            .content
            .as_deref()
            .filter(|_| reads_body && self.has_backend(&plan));
        if let Some(fetcher) = content {
            let enrichment = enrich_articles(
                std::mem::take(&mut survivors),
                fetcher,
                self.settings.content_concurrency,
                cancel,
            )
            .await;
            info!(
                enriched = enrichment.enriched,
                failed = enrichment.failed,
                "article content fetched"
            );
            articles_enriched = enrichment.enriched;
            survivors = enrichment.articles;
        }

        // 6) AI analysis
        let cost = CostController::new(plan.tier, &self.settings.cost, plan.free_tier_used_this_month);
        let (mut results, ai_available) = self.analyze(&plan, &survivors, &cost, cancel).await;
        for r in &mut results {
            r.trending_score = trend_scores.get(&r.article_id).copied();
        }

        // 7) Records + summary
        let processed_at = Utc::now();
        let session = ProcessingSession {
            sources: plan.sources.iter().map(|s| s.id.clone()).collect(),
            keywords: plan.keywords.clone(),
            ai_enabled: plan.ai_enabled,
            date_range: plan.date_range_label.clone(),
        };
        let records: Vec<OutputRecord> = survivors
            .iter()
            .zip(&results)
            .map(|(a, r)| OutputRecord::new(a, r, &session, processed_at))
            .collect();

        let budget = cost.snapshot();
        let mut summary = RunSummary {
            tier: plan.tier,
            sources_requested: plan.sources.len(),
            sources_succeeded,
            source_failures,
            articles_fetched,
            invalid_articles,
            keyword_filtered,
            trend_invalid,
            articles_enriched,
            duplicates_dropped: deduped.dropped,
            capped,
            records_emitted: records.len(),
            ai_available,
            complete: 0,
            partial: 0,
            failed: 0,
            skipped: 0,
            content_rejected: 0,
            not_analyzed: 0,
            denials: budget.denials.clone(),
            hard_cap_reached: budget.hard_cap_reached,
            total_cost_usd: budget.cost_spent,
            backend_cost_usd: 0.0,
            kinds_succeeded: BTreeMap::new(),
            cost_by_kind: BTreeMap::new(),
            cancelled: cancel.is_cancelled(),
            billing: budget.billing_summary(),
        };
        for r in &results {
            tally(&mut summary, r);
        }
        if plan.tier == Tier::Builtin {
            for (&kind, &n) in &summary.kinds_succeeded {
                let unit = cost.estimate_cost(&[kind].into());
                summary
                    .cost_by_kind
                    .insert(kind, CostUnits::from_micros(unit.micros() * n as u64));
            }
        }

        gauge!("news_pipeline_last_run_ts").set(processed_at.timestamp() as f64);
        info!(
            records = summary.records_emitted,
            complete = summary.complete,
            partial = summary.partial,
            failed = summary.failed,
            skipped = summary.skipped,
            cost = %summary.total_cost_usd,
            cancelled = summary.cancelled,
            "pipeline run finished"
        );
        Ok(RunReport { records, summary })
    }

    /// Results in `articles` order. The flag says whether a backend was available.
    async fn analyze(
        &self,
        plan: &RunPlan,
        articles: &[Article],
        cost: &Arc<CostController>,
        cancel: &CancellationToken,
    ) -> (Vec<AnalysisResult>, bool) {
        let pending = || {
            articles
                .iter()
                .map(|a| AnalysisResult::pending(a.id()))
                .collect::<Vec<_>>()
        };
        if plan.ai_kinds().is_empty() || articles.is_empty() {
            return (pending(), self.ai.is_some() || plan.byok_key.is_some());
        }

        let Some((ai, moderator)) = self.backend_for(plan) else {
            warn!(tier = %plan.tier, "AI analysis requested but no backend is configured");
            return (pending(), false);
        };

        let scheduler = AnalysisScheduler::new(
            ai,
            moderator,
            Arc::clone(cost),
            self.settings.max_in_flight,
            self.settings.retry,
        );
        (scheduler.run_batch(articles, &plan.kinds, cancel).await, true)
    }

    fn has_backend(&self, plan: &RunPlan) -> bool {
        match plan.tier {
            Tier::Byok => self.byok_ai.is_some() || plan.byok_key.is_some(),
            _ => self.ai.is_some(),
        }
    }

    fn backend_for(&self, plan: &RunPlan) -> Option<(DynAiClient, DynModerator)> {
        let allow_all = || -> DynModerator { Arc::new(AllowAllModerator) };
        if plan.tier != Tier::Byok {
            let ai = self.ai.clone()?;
            return Some((ai, self.moderator.clone().unwrap_or_else(allow_all)));
        }
        if let Some(ai) = &self.byok_ai {
            return Some((
                Arc::clone(ai),
                self.moderator.clone().unwrap_or_else(allow_all),
            ));
        }

        let key = plan.byok_key.as_deref()?;
        match OpenAiClient::new(
            key,
            self.settings.ai_model.as_deref(),
            self.settings.ai_request_timeout,
        ) {
            Ok(client) => {
                let client = Arc::new(client.with_industry_focus(plan.industry_focus.clone()));
                let moderator: DynModerator = match &self.moderator {
                    Some(m) => Arc::clone(m),
                    None => client.clone() as DynModerator,
                };
                let ai: DynAiClient = client;
                Some((ai, moderator))
            }
            Err(e) => {
                warn!(error = %e, "could not build BYOK client");
                None
            }
        }
    }
}

fn tally(summary: &mut RunSummary, r: &AnalysisResult) {
    let rejected = r.failures.contains(&AnalysisFailure::ContentRejected);
    match r.status() {
        AnalysisStatus::Complete => summary.complete += 1,
        AnalysisStatus::Partial => summary.partial += 1,
        AnalysisStatus::Failed if r.denial().is_some() => summary.skipped += 1,
        AnalysisStatus::Failed if rejected => summary.content_rejected += 1,
        AnalysisStatus::Failed => summary.failed += 1,
        AnalysisStatus::Pending | AnalysisStatus::InFlight => summary.not_analyzed += 1,
    }
    summary.backend_cost_usd += r.backend_cost_usd;
    for kind in r.succeeded_kinds() {
        *summary.kinds_succeeded.entry(kind).or_default() += 1;
    }
}
