// tests/cost_controller.rs
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use news_intel::cost::{Approval, CostController, CostSettings, CostUnits, Tier};
use news_intel::error::DenialReason;
use news_intel::model::{AnalysisKind, AnalysisRequest};

fn ai_kinds() -> Vec<AnalysisKind> {
    AnalysisKind::ALL.into_iter().filter(|k| k.is_ai()).collect()
}

fn req(id: usize) -> AnalysisRequest {
    AnalysisRequest::new(format!("art-{id}"), AnalysisKind::ALL)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_approvals_never_exceed_daily_cap() {
    let settings = CostSettings {
        daily_cap: CostUnits::from_micros(100_000),
        free_monthly_quota: 50,
        article_cap: 10_000,
    };
    let c = CostController::new(Tier::Builtin, &settings, 0);

    let mut handles = Vec::new();
    for i in 0..400usize {
        let c = Arc::clone(&c);
        handles.push(tokio::spawn(async move {
            match c.approve(&req(i)) {
                Approval::Approved(r) => {
                    let b = c.snapshot();
                    assert!(b.cost_spent.saturating_add(b.reserved) <= b.daily_cap);
                    tokio::time::sleep(Duration::from_millis((i % 5) as u64)).await;
                    match i % 3 {
                        0 => {
                            r.commit(&ai_kinds().into_iter().collect());
                        }
                        1 => {
                            r.commit(&[AnalysisKind::Sentiment].into());
                        }
                        _ => drop(r),
                    }
                    true
                }
                Approval::Denied(reason) => {
                    assert_eq!(reason, DenialReason::DailyBudgetExceeded);
                    false
                }
            }
        }));
    }

    let watcher = {
        let c = Arc::clone(&c);
        tokio::spawn(async move {
            for _ in 0..200 {
                let b = c.snapshot();
                assert!(b.cost_spent.saturating_add(b.reserved) <= b.daily_cap);
                tokio::task::yield_now().await;
            }
        })
    };

    let mut approved = 0;
    for h in handles {
        if h.await.unwrap() {
            approved += 1;
        }
    }
    watcher.await.unwrap();

    let b = c.snapshot();
    assert!(approved > 0);
    assert_eq!(b.reserved, CostUnits::ZERO);
    assert_eq!(b.articles_reserved, 0);
    assert!(b.cost_spent <= b.daily_cap);
}

#[test]
fn free_tier_stops_at_monthly_quota() {
    let settings = CostSettings::default();
    let c = CostController::new(Tier::Free, &settings, 45);

    let mut approved = 0;
    for i in 0..10 {
        match c.approve(&req(i)) {
            Approval::Approved(r) => {
                assert_eq!(r.amount(), CostUnits::ZERO);
                r.commit(&ai_kinds().into_iter().collect());
                approved += 1;
            }
            Approval::Denied(reason) => assert_eq!(reason, DenialReason::TierQuotaExceeded),
        }
    }
    assert_eq!(approved, 5);

    let b = c.snapshot();
    assert_eq!(b.articles_processed, 5);
    assert_eq!(b.cost_spent, CostUnits::ZERO);
    assert_eq!(b.denials.get(&DenialReason::TierQuotaExceeded), Some(&5));
    assert!(b.hard_cap_reached);
    assert!(b.billing_summary().contains("50/50"));
}

#[test]
fn byok_is_flat_and_has_no_article_cap() {
    let settings = CostSettings {
        article_cap: 2,
        ..CostSettings::default()
    };
    let c = CostController::new(Tier::Byok, &settings, 0);

    let one: BTreeSet<_> = [AnalysisKind::Sentiment].into();
    let all: BTreeSet<_> = AnalysisKind::ALL.into_iter().collect();
    assert_eq!(c.estimate_cost(&one), c.estimate_cost(&all));
    assert_eq!(c.estimate_cost(&all), CostUnits::from_micros(2_000));

    for i in 0..20 {
        let Approval::Approved(r) = c.approve(&req(i)) else {
            panic!("BYOK request {i} denied");
        };
        r.commit(&one);
    }
    let b = c.snapshot();
    assert_eq!(b.article_cap, None);
    assert_eq!(b.cost_spent, CostUnits::from_micros(40_000));
}

#[test]
fn builtin_article_cap_denies_extra_articles() {
    let settings = CostSettings {
        article_cap: 2,
        ..CostSettings::default()
    };
    let c = CostController::new(Tier::Builtin, &settings, 0);
    let a = c.approve(&req(0));
    let b = c.approve(&req(1));
    assert!(a.is_approved() && b.is_approved());
    assert!(matches!(
        c.approve(&req(2)),
        Approval::Denied(DenialReason::ArticleCapExceeded)
    ));
    // Both still in flight, so releasing one reopens a slot.
    drop(a);
    assert!(c.approve(&req(3)).is_approved());
}
