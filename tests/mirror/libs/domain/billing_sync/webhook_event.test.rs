use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use quotaforge_billing_sync::{
    BillingProvider, BillingResult, BillingSynchroniser, ProviderSubscription, TierMapping,
    WebhookEvent,
};
use quotaforge_core::{ManagerConfig, QuotaManager};
use quotaforge_domain_models::{PeriodKind, Tier};
use quotaforge_storage_memory::MemoryStorage;

struct NoopProvider;

#[async_trait]
impl BillingProvider for NoopProvider {
    async fn fetch_subscription(&self, _user_id: &str) -> BillingResult<Option<ProviderSubscription>> {
        Ok(None)
    }
}

fn config() -> ManagerConfig {
    let free = Tier::new("free").with_monthly_limit("api_calls", 100);
    let pro = Tier::new("pro").with_monthly_limit("api_calls", 10_000);
    ManagerConfig::builder()
        .with_tier(free)
        .with_tier(pro)
        .with_default_tier("free")
        .build()
        .unwrap()
}

fn synchroniser() -> (Arc<QuotaManager<MemoryStorage>>, BillingSynchroniser<MemoryStorage, NoopProvider>) {
    let mgr = Arc::new(QuotaManager::new(Arc::new(MemoryStorage::new()), config()));
    let mapping = TierMapping::new().with_mapping("prod_pro_monthly", "pro");
    let sync = BillingSynchroniser::new(mgr.clone(), NoopProvider, mapping);
    (mgr, sync)
}

#[tokio::test]
async fn webhook_event_upgrades_tier() {
    let (mgr, sync) = synchroniser();
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();

    let applied = sync
        .apply_webhook_event(WebhookEvent {
            user_id: "u1".into(),
            product_id: "prod_pro_monthly".into(),
            subscription_start_date: None,
            expires_at: Some(now + Duration::days(30)),
            event_timestamp: now,
        })
        .await
        .unwrap();
    assert!(applied);

    let snapshot = mgr.get_quota("u1", "api_calls", PeriodKind::Monthly, now).await.unwrap();
    assert_eq!(snapshot.tier_name, "pro");
}

#[tokio::test]
async fn out_of_order_webhook_delivery_is_dropped() {
    let (mgr, sync) = synchroniser();
    let earlier = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
    let later = earlier + Duration::hours(1);

    sync.apply_webhook_event(WebhookEvent {
        user_id: "u1".into(),
        product_id: "prod_pro_monthly".into(),
        subscription_start_date: None,
        expires_at: Some(later + Duration::days(30)),
        event_timestamp: later,
    })
    .await
    .unwrap();

    // A stale retry carrying the earlier timestamp must not overwrite
    // the state the later event already established.
    let stale_applied = sync
        .apply_webhook_event(WebhookEvent {
            user_id: "u1".into(),
            product_id: "prod_pro_monthly".into(),
            subscription_start_date: None,
            expires_at: Some(earlier - Duration::days(60)),
            event_timestamp: earlier,
        })
        .await
        .unwrap();

    assert!(!stale_applied);

    let snapshot = mgr.get_quota("u1", "api_calls", PeriodKind::Monthly, later).await.unwrap();
    assert_eq!(snapshot.tier_name, "pro");
}

#[tokio::test]
async fn duplicate_webhook_delivery_with_identical_timestamp_is_dropped() {
    let (mgr, sync) = synchroniser();
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
    let event = || WebhookEvent {
        user_id: "u1".into(),
        product_id: "prod_pro_monthly".into(),
        subscription_start_date: None,
        expires_at: Some(now + Duration::days(30)),
        event_timestamp: now,
    };

    let first = sync.apply_webhook_event(event()).await.unwrap();
    let replay = sync.apply_webhook_event(event()).await.unwrap();

    assert!(first);
    assert!(!replay, "a second delivery with the same timestamp is not strictly newer");

    let snapshot = mgr.get_quota("u1", "api_calls", PeriodKind::Monthly, now).await.unwrap();
    assert_eq!(snapshot.tier_name, "pro");
}
