use chrono::{Duration, TimeZone, Utc};
use quotaforge_core::{ConsumeRequest, QuotaStorage, RefundRequest};
use quotaforge_domain_models::{Period, PeriodKind};
use quotaforge_storage_redis::RedisStorage;

fn test_redis_url() -> String {
    std::env::var("QUOTAFORGE_TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".into())
}

async fn storage() -> RedisStorage {
    RedisStorage::connect(&test_redis_url(), "quotaforge-test")
        .await
        .expect("connect to local test redis (set QUOTAFORGE_TEST_REDIS_URL to override)")
}

fn monthly_period(start: chrono::DateTime<Utc>) -> Period {
    Period::new(start, start + Duration::days(30), PeriodKind::Monthly)
}

#[tokio::test]
async fn consume_accumulates_and_rejects_past_limit() {
    let storage = storage().await;
    let now = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
    let period = monthly_period(now);
    let user_id = format!("redis-consume-{}", uuid::Uuid::new_v4());

    let first = storage
        .consume_quota(ConsumeRequest {
            user_id: user_id.clone(),
            resource: "api_calls".into(),
            amount: 60,
            period,
            limit: 100,
            tier_name: "pro".into(),
            idempotency_key: None,
            idempotency_ttl: Duration::hours(24),
            metadata: None,
            now,
        })
        .await
        .unwrap();
    assert_eq!(first.new_used, 60);
    assert!(!first.exceeded);

    let second = storage
        .consume_quota(ConsumeRequest {
            user_id: user_id.clone(),
            resource: "api_calls".into(),
            amount: 60,
            period,
            limit: 100,
            tier_name: "pro".into(),
            idempotency_key: None,
            idempotency_ttl: Duration::hours(24),
            metadata: None,
            now,
        })
        .await
        .unwrap();
    assert!(second.exceeded);
    assert_eq!(second.new_used, 60, "a rejected consume must not mutate usage");
}

#[tokio::test]
async fn idempotency_key_replays_cached_outcome() {
    let storage = storage().await;
    let now = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
    let period = monthly_period(now);
    let user_id = format!("redis-idem-{}", uuid::Uuid::new_v4());

    let request = ConsumeRequest {
        user_id: user_id.clone(),
        resource: "api_calls".into(),
        amount: 10,
        period,
        limit: 1000,
        tier_name: "pro".into(),
        idempotency_key: Some("dup-key".into()),
        idempotency_ttl: Duration::hours(24),
        metadata: None,
        now,
    };

    let first = storage.consume_quota(request.clone()).await.unwrap();
    let mut replay = request;
    replay.amount = 9999;
    let second = storage.consume_quota(replay).await.unwrap();

    assert_eq!(first.new_used, second.new_used);
}

#[tokio::test]
async fn consume_then_refund_floors_at_zero() {
    let storage = storage().await;
    let now = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
    let period = monthly_period(now);
    let user_id = format!("redis-refund-{}", uuid::Uuid::new_v4());

    storage
        .consume_quota(ConsumeRequest {
            user_id: user_id.clone(),
            resource: "api_calls".into(),
            amount: 5,
            period,
            limit: 100,
            tier_name: "pro".into(),
            idempotency_key: None,
            idempotency_ttl: Duration::hours(24),
            metadata: None,
            now,
        })
        .await
        .unwrap();

    let refunded = storage
        .refund_quota(RefundRequest {
            user_id: user_id.clone(),
            resource: "api_calls".into(),
            amount: 50,
            period,
            idempotency_key: None,
            idempotency_ttl: Duration::hours(24),
            reason: Some("test overcorrection".into()),
            metadata: None,
            now,
        })
        .await
        .unwrap();

    assert_eq!(refunded.new_used, 0);
}

#[tokio::test]
async fn add_limit_rejects_duplicate_idempotency_key() {
    let storage = storage().await;
    let now = Utc.with_ymd_and_hms(2026, 4, 1, 0, 0, 0).unwrap();
    let period = monthly_period(now);
    let user_id = format!("redis-topup-{}", uuid::Uuid::new_v4());

    let first = storage.add_limit(&user_id, "api_calls", period, "pro", 100, "topup-once").await.unwrap();
    assert_eq!(first, 100);

    let repeat = storage.add_limit(&user_id, "api_calls", period, "pro", 100, "topup-once").await;
    assert!(repeat.is_err());
}
