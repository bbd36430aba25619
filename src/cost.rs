//! Tiered billing and budget enforcement for AI analysis.
//!
//! Approval is two-phase: [`CostController::approve`] reserves the estimated
//! cost against the run budget, and the returned [`Reservation`] is later
//! committed at the actual cost (the difference is refunded) or released.
//! A reservation dropped without being settled releases itself, so abandoned
//! work never leaks budget. At every instant
//! `cost_spent + reserved <= daily_cap`.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::iter::Sum;
use std::sync::{Arc, Mutex};

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};

use crate::error::DenialReason;
use crate::model::{AnalysisKind, AnalysisRequest};

/// Money in micro-USD. Integer so concurrent reservations add up exactly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CostUnits(u64);

impl CostUnits {
    pub const ZERO: CostUnits = CostUnits(0);

    pub const fn from_micros(micros: u64) -> Self {
        CostUnits(micros)
    }

    pub fn from_usd(usd: f64) -> Self {
        if usd.is_finite() && usd > 0.0 {
            CostUnits((usd * 1_000_000.0).round() as u64)
        } else {
            CostUnits::ZERO
        }
    }

    pub fn micros(self) -> u64 {
        self.0
    }

    pub fn as_usd(self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }

    pub fn saturating_add(self, other: CostUnits) -> CostUnits {
        CostUnits(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: CostUnits) -> CostUnits {
        CostUnits(self.0.saturating_sub(other.0))
    }
}

impl fmt::Display for CostUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${:.4}", self.as_usd())
    }
}

impl Sum for CostUnits {
    fn sum<I: Iterator<Item = CostUnits>>(iter: I) -> Self {
        iter.fold(CostUnits::ZERO, CostUnits::saturating_add)
    }
}

impl Serialize for CostUnits {
    fn serialize<S: serde::Serializer>(&self, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(self.as_usd())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Built-in AI up to a monthly article quota, no charge.
    Free,
    /// Built-in AI billed per analysis kind.
    #[serde(alias = "built_in", alias = "built_in_ai")]
    Builtin,
    /// User's own API key; flat infrastructure fee per analyzed article.
    Byok,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Tier::Free => "free",
            Tier::Builtin => "builtin",
            Tier::Byok => "byok",
        })
    }
}

/// Unit prices. Built-in kinds add up to $6 per 1000 fully analyzed
/// articles; BYOK is $2 per 1000 regardless of kinds.
#[derive(Debug, Clone)]
pub struct Pricing {
    pub builtin_per_kind: BTreeMap<AnalysisKind, CostUnits>,
    pub byok_per_article: CostUnits,
}

impl Default for Pricing {
    fn default() -> Self {
        let builtin_per_kind = AnalysisKind::ALL
            .iter()
            .map(|&k| {
                let c = if k.is_ai() { 1_500 } else { 0 };
                (k, CostUnits::from_micros(c))
            })
            .collect();
        Self {
            builtin_per_kind,
            byok_per_article: CostUnits::from_micros(2_000),
        }
    }
}

/// Limits applied to a run.
#[derive(Debug, Clone, PartialEq)]
pub struct CostSettings {
    pub daily_cap: CostUnits,
    pub free_monthly_quota: u32,
    pub article_cap: u32,
}

impl Default for CostSettings {
    fn default() -> Self {
        Self {
            daily_cap: CostUnits::from_usd(50.0),
            free_monthly_quota: 50,
            article_cap: 1_000,
        }
    }
}

impl CostSettings {
    /// Read `DAILY_SPEND_LIMIT` (USD), `FREE_TIER_MONTHLY_QUOTA` and
    /// `ARTICLE_CAP_PER_RUN`; unset or unparseable values keep defaults.
    pub fn from_env() -> Self {
        let mut s = Self::default();
        if let Some(v) = env_parse::<f64>("DAILY_SPEND_LIMIT") {
            s.daily_cap = CostUnits::from_usd(v);
        }
        if let Some(v) = env_parse::<u32>("FREE_TIER_MONTHLY_QUOTA") {
            s.free_monthly_quota = v;
        }
        if let Some(v) = env_parse::<u32>("ARTICLE_CAP_PER_RUN") {
            s.article_cap = v;
        }
        s
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable env value");
            None
        }
    }
}

/// Run-scoped budget state. Only the [`CostController`] writes it.
#[derive(Debug, Clone, Serialize)]
pub struct RunBudget {
    pub tier: Tier,
    pub articles_processed: u32,
    pub cost_spent: CostUnits,
    pub reserved: CostUnits,
    pub articles_reserved: u32,
    pub daily_cap: CostUnits,
    pub hard_cap_reached: bool,
    pub hard_cap_reason: Option<DenialReason>,
    /// Free-tier articles used this month before the run started.
    pub free_quota_used: u32,
    pub free_quota: u32,
    /// `None` when the tier has no per-run article cap (BYOK).
    pub article_cap: Option<u32>,
    pub denials: BTreeMap<DenialReason, u32>,
}

impl RunBudget {
    /// Human-readable billing line for the run summary.
    pub fn billing_summary(&self) -> String {
        match self.tier {
            Tier::Free => format!(
                "Free tier: {} articles analyzed at no cost ({}/{} monthly quota used)",
                self.articles_processed,
                self.free_quota_used + self.articles_processed,
                self.free_quota
            ),
            Tier::Builtin => format!(
                "Built-in AI tier: {} articles, total {} (includes sentiment, summarization, classification, entities and content moderation)",
                self.articles_processed, self.cost_spent
            ),
            Tier::Byok => format!(
                "BYOK tier: {} articles, infrastructure fee {}; OpenAI usage is billed to your key separately",
                self.articles_processed, self.cost_spent
            ),
        }
    }
}

/// Outcome of [`CostController::approve`].
#[derive(Debug)]
pub enum Approval {
    Approved(Reservation),
    Denied(DenialReason),
}

impl Approval {
    pub fn is_approved(&self) -> bool {
        matches!(self, Approval::Approved(_))
    }
}

#[derive(Debug)]
pub struct CostController {
    pricing: Pricing,
    budget: Mutex<RunBudget>,
}

impl CostController {
    pub fn new(tier: Tier, settings: &CostSettings, free_quota_used: u32) -> Arc<Self> {
        Self::with_pricing(tier, settings, free_quota_used, Pricing::default())
    }

    pub fn with_pricing(
        tier: Tier,
        settings: &CostSettings,
        free_quota_used: u32,
        pricing: Pricing,
    ) -> Arc<Self> {
        let budget = RunBudget {
            tier,
            articles_processed: 0,
            cost_spent: CostUnits::ZERO,
            reserved: CostUnits::ZERO,
            articles_reserved: 0,
            daily_cap: settings.daily_cap,
            hard_cap_reached: false,
            hard_cap_reason: None,
            free_quota_used,
            free_quota: settings.free_monthly_quota,
            article_cap: (tier != Tier::Byok).then_some(settings.article_cap),
            denials: BTreeMap::new(),
        };
        Arc::new(Self {
            pricing,
            budget: Mutex::new(budget),
        })
    }

    pub fn tier(&self) -> Tier {
        self.lock().tier
    }

    /// Cost of analyzing one article for `kinds` under the current tier.
    pub fn estimate_cost(&self, kinds: &BTreeSet<AnalysisKind>) -> CostUnits {
        let tier = self.tier();
        self.estimate_for(tier, kinds)
    }

    fn estimate_for(&self, tier: Tier, kinds: &BTreeSet<AnalysisKind>) -> CostUnits {
        let any_ai = kinds.iter().any(|k| k.is_ai());
        match tier {
            Tier::Free => CostUnits::ZERO,
            Tier::Builtin => kinds
                .iter()
                .filter_map(|k| self.pricing.builtin_per_kind.get(k).copied())
                .sum(),
            Tier::Byok if any_ai => self.pricing.byok_per_article,
            Tier::Byok => CostUnits::ZERO,
        }
    }

    /// Reserve budget for `request` or say why not.
    pub fn approve(self: &Arc<Self>, request: &AnalysisRequest) -> Approval {
        let kinds = request.ai_kinds();
        let mut b = self.lock();
        let estimate = self.estimate_for(b.tier, &kinds);

        let denial = if b.hard_cap_reached {
            b.hard_cap_reason
        } else {
            let with_in_flight = check(&b, estimate, true);
            // Denied even with nothing in flight: no refund can reopen the budget.
            if with_in_flight.is_some() && check(&b, estimate, false).is_some() {
                b.hard_cap_reached = true;
                b.hard_cap_reason = with_in_flight;
                tracing::warn!(tier = %b.tier, reason = ?with_in_flight, spent = %b.cost_spent, "hard cap reached; no further AI requests");
            }
            with_in_flight
        };

        if let Some(reason) = denial {
            *b.denials.entry(reason).or_default() += 1;
            counter!("news_ai_denied_total").increment(1);
            tracing::debug!(article = %request.article_id, ?reason, "analysis denied");
            return Approval::Denied(reason);
        }

        b.reserved = b.reserved.saturating_add(estimate);
        b.articles_reserved += 1;
        Approval::Approved(Reservation {
            controller: Arc::clone(self),
            article_id: request.article_id.clone(),
            amount: estimate,
            settled: false,
        })
    }

    /// True once a hard cap has been hit; every later request is denied.
    pub fn is_exhausted(&self) -> bool {
        self.lock().hard_cap_reached
    }

    pub fn snapshot(&self) -> RunBudget {
        self.lock().clone()
    }

    fn settle(&self, amount: CostUnits, actual: Option<CostUnits>) {
        let mut b = self.lock();
        b.reserved = b.reserved.saturating_sub(amount);
        b.articles_reserved = b.articles_reserved.saturating_sub(1);
        if let Some(actual) = actual {
            b.cost_spent = b.cost_spent.saturating_add(actual);
            b.articles_processed += 1;
        }
        gauge!("news_cost_committed_micro_usd").set(b.cost_spent.micros() as f64);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RunBudget> {
        self.budget.lock().unwrap_or_else(|p| p.into_inner())
    }
}

fn check(b: &RunBudget, estimate: CostUnits, include_in_flight: bool) -> Option<DenialReason> {
    let in_flight_articles = if include_in_flight { b.articles_reserved } else { 0 };
    let in_flight_cost = if include_in_flight {
        b.reserved
    } else {
        CostUnits::ZERO
    };
    let articles_after = b.articles_processed + in_flight_articles + 1;

    if let Some(cap) = b.article_cap {
        if articles_after > cap {
            return Some(DenialReason::ArticleCapExceeded);
        }
    }
    if b.tier == Tier::Free && b.free_quota_used + articles_after > b.free_quota {
        return Some(DenialReason::TierQuotaExceeded);
    }
    if b.cost_spent.saturating_add(in_flight_cost).saturating_add(estimate) > b.daily_cap {
        return Some(DenialReason::DailyBudgetExceeded);
    }
    None
}

/// Budget held for one in-flight request.
#[derive(Debug)]
pub struct Reservation {
    controller: Arc<CostController>,
    article_id: String,
    amount: CostUnits,
    settled: bool,
}

impl Reservation {
    pub fn amount(&self) -> CostUnits {
        self.amount
    }

    pub fn article_id(&self) -> &str {
        &self.article_id
    }

    /// Charge for the kinds that actually succeeded, refunding the rest.
    /// Nothing succeeded → full release. Returns the committed cost.
    pub fn commit(mut self, succeeded: &BTreeSet<AnalysisKind>) -> CostUnits {
        self.settled = true;
        if !succeeded.iter().any(|k| k.is_ai()) {
            self.controller.settle(self.amount, None);
            return CostUnits::ZERO;
        }
        let tier = self.controller.tier();
        let actual = self.controller.estimate_for(tier, succeeded).min(self.amount);
        self.controller.settle(self.amount, Some(actual));
        actual
    }

    pub fn release(mut self) {
        self.settled = true;
        self.controller.settle(self.amount, None);
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        if !self.settled {
            self.controller.settle(self.amount, None);
        }
    }
}
