use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use quotaforge_billing_sync::{
    BillingProvider, BillingResult, BillingSynchroniser, ProviderSubscription, SubscriptionStatus,
    TierMapping,
};
use quotaforge_core::{ManagerConfig, QuotaManager};
use quotaforge_domain_models::Tier;
use quotaforge_storage_memory::MemoryStorage;

struct FakeProvider {
    subscription: Option<ProviderSubscription>,
}

#[async_trait]
impl BillingProvider for FakeProvider {
    async fn fetch_subscription(&self, _user_id: &str) -> BillingResult<Option<ProviderSubscription>> {
        Ok(self.subscription.clone())
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

fn manager() -> Arc<QuotaManager<MemoryStorage>> {
    Arc::new(QuotaManager::new(Arc::new(MemoryStorage::new()), config()))
}

#[tokio::test]
async fn active_subscription_maps_to_its_tier() {
    let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
    let provider = FakeProvider {
        subscription: Some(ProviderSubscription {
            user_id: "u1".into(),
            product_id: "prod_pro_monthly".into(),
            status: SubscriptionStatus::Active,
            subscription_start_date: None,
            expires_at: Some(now + Duration::days(30)),
            provider_updated_at: now,
        }),
    };
    let mapping = TierMapping::new().with_mapping("prod_pro_monthly", "pro");
    let sync = BillingSynchroniser::new(manager(), provider, mapping);

    let applied = sync.sync_user("u1", now).await.unwrap();
    assert!(applied);
}

#[tokio::test]
async fn expired_subscription_falls_back_to_default_tier() {
    let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
    let provider = FakeProvider {
        subscription: Some(ProviderSubscription {
            user_id: "u1".into(),
            product_id: "prod_pro_monthly".into(),
            status: SubscriptionStatus::Cancelled,
            subscription_start_date: None,
            expires_at: Some(now - Duration::days(1)),
            provider_updated_at: now,
        }),
    };
    let mapping = TierMapping::new().with_mapping("prod_pro_monthly", "pro");
    let mgr = manager();
    let sync = BillingSynchroniser::new(mgr.clone(), provider, mapping);

    sync.sync_user("u1", now).await.unwrap();

    let snapshot = mgr
        .get_quota("u1", "api_calls", quotaforge_domain_models::PeriodKind::Monthly, now)
        .await
        .unwrap();
    assert_eq!(snapshot.tier_name, "free");
}

#[tokio::test]
async fn grace_period_keeps_paid_tier_until_expiry() {
    let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
    // A cancellation event, but the provider still reports access until
    // the end of the current billing period — the paid tier must hold.
    let provider = FakeProvider {
        subscription: Some(ProviderSubscription {
            user_id: "u1".into(),
            product_id: "prod_pro_monthly".into(),
            status: SubscriptionStatus::Cancelled,
            subscription_start_date: None,
            expires_at: Some(now + Duration::days(5)),
            provider_updated_at: now,
        }),
    };
    let mapping = TierMapping::new().with_mapping("prod_pro_monthly", "pro");
    let mgr = manager();
    let sync = BillingSynchroniser::new(mgr.clone(), provider, mapping);

    sync.sync_user("u1", now).await.unwrap();

    let snapshot = mgr
        .get_quota("u1", "api_calls", quotaforge_domain_models::PeriodKind::Monthly, now)
        .await
        .unwrap();
    assert_eq!(snapshot.tier_name, "pro");
}

#[tokio::test]
async fn unmapped_product_with_no_wildcard_is_an_error() {
    let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
    let provider = FakeProvider {
        subscription: Some(ProviderSubscription {
            user_id: "u1".into(),
            product_id: "prod_mystery".into(),
            status: SubscriptionStatus::Active,
            subscription_start_date: None,
            expires_at: None,
            provider_updated_at: now,
        }),
    };
    let mapping = TierMapping::new().with_mapping("prod_pro_monthly", "pro");
    let sync = BillingSynchroniser::new(manager(), provider, mapping);

    let result = sync.sync_user("u1", now).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn no_subscription_on_file_leaves_default_tier_untouched() {
    let now = Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap();
    let provider = FakeProvider { subscription: None };
    let mapping = TierMapping::new();
    let sync = BillingSynchroniser::new(manager(), provider, mapping);

    let applied = sync.sync_user("u1", now).await.unwrap();
    assert!(!applied);
}
