use chrono::{Duration, TimeZone, Utc};
use quotaforge_core::{ConsumeRequest, QuotaStorage, RefundRequest};
use quotaforge_domain_models::{Period, PeriodKind};
use quotaforge_storage_memory::MemoryStorage;

fn monthly_period(start: chrono::DateTime<Utc>) -> Period {
    Period::new(start, start + Duration::days(30), PeriodKind::Monthly)
}

#[tokio::test]
async fn consume_accumulates_and_rejects_past_limit() {
    let storage = MemoryStorage::new();
    let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
    let period = monthly_period(now);

    let first = storage
        .consume_quota(ConsumeRequest {
            user_id: "u1".into(),
            resource: "api_calls".into(),
            amount: 80,
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
    assert_eq!(first.new_used, 80);
    assert!(!first.exceeded);

    let second = storage
        .consume_quota(ConsumeRequest {
            user_id: "u1".into(),
            resource: "api_calls".into(),
            amount: 30,
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
    assert_eq!(second.new_used, 80, "a rejected consume must not mutate usage");
}

#[tokio::test]
async fn idempotent_consume_replays_the_first_outcome() {
    let storage = MemoryStorage::new();
    let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
    let period = monthly_period(now);

    let request = ConsumeRequest {
        user_id: "u1".into(),
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
    replay.amount = 500;
    let second = storage.consume_quota(replay).await.unwrap();

    assert_eq!(first.new_used, second.new_used);
}

#[tokio::test]
async fn refund_floors_used_at_zero() {
    let storage = MemoryStorage::new();
    let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
    let period = monthly_period(now);

    storage
        .consume_quota(ConsumeRequest {
            user_id: "u1".into(),
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
            user_id: "u1".into(),
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
async fn add_limit_raises_the_ceiling_without_touching_used() {
    let storage = MemoryStorage::new();
    let now = Utc.with_ymd_and_hms(2026, 5, 1, 0, 0, 0).unwrap();
    let period = monthly_period(now);

    storage
        .consume_quota(ConsumeRequest {
            user_id: "u1".into(),
            resource: "api_calls".into(),
            amount: 40,
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

    let new_limit = storage
        .add_limit("u1", "api_calls", period, "pro", 50, "topup-1")
        .await
        .unwrap();
    assert_eq!(new_limit, 150);

    let usage = storage.get_usage("u1", "api_calls", period.start).await.unwrap().unwrap();
    assert_eq!(usage.used, 40);

    let repeat = storage.add_limit("u1", "api_calls", period, "pro", 50, "topup-1").await;
    assert!(repeat.is_err(), "a repeated top-up key must not be applied twice");
}
