//! Metric descriptors. Call sites use the `metrics` macros directly; this
//! only registers names and help text once per process.

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "news_fetch_articles_total",
            "Articles ingested from sources."
        );
        describe_counter!(
            "news_source_errors_total",
            "Sources skipped because they failed or timed out."
        );
        describe_histogram!("news_fetch_ms", "Per-source fetch duration in milliseconds.");
        describe_histogram!("news_fetch_parse_ms", "RSS parse time in milliseconds.");
        describe_counter!(
            "news_invalid_articles_total",
            "Fetched items dropped as invalid."
        );
        describe_counter!(
            "news_content_enriched_total",
            "Articles given full page text before analysis."
        );
        describe_counter!(
            "news_content_errors_total",
            "Article page downloads that failed."
        );
        describe_counter!(
            "news_dedup_dropped_total",
            "Articles dropped as duplicates of a kept story."
        );
        describe_counter!("news_ai_calls_total", "AI backend calls, including retries.");
        describe_counter!("news_ai_retries_total", "AI calls retried after a transient error.");
        describe_counter!(
            "news_ai_denied_total",
            "Analysis requests denied by the cost controller."
        );
        describe_counter!(
            "news_ai_rejected_total",
            "Articles rejected by content moderation."
        );
        describe_gauge!(
            "news_cost_committed_micro_usd",
            "Tier cost committed in the current run (micro-USD)."
        );
        describe_gauge!(
            "news_pipeline_last_run_ts",
            "Unix timestamp of the last finished pipeline run."
        );
    });
}
