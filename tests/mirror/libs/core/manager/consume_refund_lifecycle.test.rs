use std::sync::Arc;

use chrono::{TimeZone, Utc};
use quotaforge_core::{ConsumeOptions, ManagerConfig, QuotaManager, RefundOptions};
use quotaforge_domain_models::{Entitlement, PeriodKind, QuotaError, Tier};
use quotaforge_storage_memory::MemoryStorage;

fn manager() -> QuotaManager<MemoryStorage> {
    let free = Tier::new("free").with_monthly_limit("api_calls", 100);
    let pro = Tier::new("pro").with_monthly_limit("api_calls", 10_000).with_monthly_limit("webhooks", 500);
    let config = ManagerConfig::builder()
        .with_tier(free)
        .with_tier(pro)
        .with_default_tier("free")
        .build()
        .unwrap();
    QuotaManager::new(Arc::new(MemoryStorage::new()), config)
}

#[tokio::test]
async fn consume_then_refund_round_trips_usage() {
    let manager = manager();
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

    let consumed = manager
        .consume("u1", "api_calls", 40, PeriodKind::Monthly, ConsumeOptions::default(), now)
        .await
        .unwrap();
    assert_eq!(consumed.new_used, 40);
    assert_eq!(consumed.limit, 100, "an entitlement-less user falls back to the default tier");

    let refunded = manager
        .refund("u1", "api_calls", 15, PeriodKind::Monthly, RefundOptions::default(), now)
        .await
        .unwrap();
    assert_eq!(refunded.new_used, 25);
}

#[tokio::test]
async fn consuming_past_the_limit_is_rejected_and_does_not_mutate_usage() {
    let manager = manager();
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

    manager
        .consume("u1", "api_calls", 90, PeriodKind::Monthly, ConsumeOptions::default(), now)
        .await
        .unwrap();

    let err = manager
        .consume("u1", "api_calls", 20, PeriodKind::Monthly, ConsumeOptions::default(), now)
        .await
        .unwrap_err();
    assert!(matches!(err, QuotaError::QuotaExceeded { used: 90, limit: 100, .. }));

    let snapshot = manager.get_quota("u1", "api_calls", PeriodKind::Monthly, now).await.unwrap();
    assert_eq!(snapshot.used, 90, "a rejected consume must leave usage untouched");
}

#[tokio::test]
async fn changing_tier_prorates_the_limit_and_persists_the_new_tier() {
    let manager = manager();
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

    manager
        .consume("u1", "api_calls", 80, PeriodKind::Monthly, ConsumeOptions::default(), now)
        .await
        .unwrap();

    manager.change_tier("u1", "api_calls", "pro", now).await.unwrap();

    let snapshot = manager.get_quota("u1", "api_calls", PeriodKind::Monthly, now).await.unwrap();
    assert_eq!(snapshot.tier_name, "pro");
    assert_eq!(snapshot.used, 80, "a tier change must not touch already-recorded usage");
    assert!(snapshot.limit >= 80, "the prorated limit must still accommodate usage already on the books");
}

#[tokio::test]
async fn set_entitlement_drops_an_out_of_order_update_but_applies_a_newer_one() {
    let manager = manager();
    let t0 = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
    let t1 = t0 + chrono::Duration::hours(1);

    let applied = manager.set_entitlement(Entitlement::new("u2", "pro", t1)).await.unwrap();
    assert!(applied);

    let stale = manager.set_entitlement(Entitlement::new("u2", "free", t0)).await.unwrap();
    assert!(!stale, "an update older than the one on file must be dropped");

    let snapshot = manager.get_quota("u2", "webhooks", PeriodKind::Monthly, t1).await.unwrap();
    assert_eq!(snapshot.tier_name, "pro");

    let newer = manager.set_entitlement(Entitlement::new("u2", "free", t1 + chrono::Duration::hours(1))).await.unwrap();
    assert!(newer);
}

#[tokio::test]
async fn add_limit_and_subtract_limit_move_the_ceiling_independently_of_usage() {
    let manager = manager();
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

    manager
        .consume("u3", "api_calls", 50, PeriodKind::Monthly, ConsumeOptions::default(), now)
        .await
        .unwrap();

    let raised = manager.add_limit("u3", "api_calls", PeriodKind::Monthly, 25, "topup-1", now).await.unwrap();
    assert_eq!(raised, 125);

    let lowered = manager.subtract_limit("u3", "api_calls", PeriodKind::Monthly, 25, "deduct-1", now).await.unwrap();
    assert_eq!(lowered, 100);

    let snapshot = manager.get_quota("u3", "api_calls", PeriodKind::Monthly, now).await.unwrap();
    assert_eq!(snapshot.used, 50, "limit adjustments must never touch recorded usage");
}
