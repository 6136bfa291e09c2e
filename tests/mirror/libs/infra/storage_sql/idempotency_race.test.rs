use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use quotaforge_core::{ConsumeRequest, QuotaStorage};
use quotaforge_domain_models::{Period, PeriodKind};
use quotaforge_storage_sql::{SqlStorage, TursoClient};

#[tokio::test]
async fn concurrent_consumes_with_same_key_agree_on_one_outcome() {
    let client = TursoClient::connect(":memory:", None).await.unwrap();
    let storage = Arc::new(SqlStorage::new(client));

    let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
    let period = Period::new(now, now + Duration::days(30), PeriodKind::Monthly);

    let make_request = move || ConsumeRequest {
        user_id: "racer".into(),
        resource: "api_calls".into(),
        amount: 10,
        period,
        limit: 1000,
        tier_name: "pro".into(),
        idempotency_key: Some("race-key".into()),
        idempotency_ttl: Duration::hours(24),
        metadata: None,
        now,
    };

    let a = storage.clone();
    let b = storage.clone();
    let (first, second) = tokio::join!(
        tokio::spawn(async move { a.consume_quota(make_request()).await.unwrap() }),
        tokio::spawn(async move { b.consume_quota(make_request()).await.unwrap() }),
    );
    let first = first.unwrap();
    let second = second.unwrap();

    // Whichever write lands first settles `new_used`; the loser replays it
    // instead of double-counting the consumption.
    assert_eq!(first.new_used, second.new_used);

    let usage = storage.get_usage("racer", "api_calls", period.start).await.unwrap().unwrap();
    assert_eq!(usage.used, 10, "amount must be applied exactly once despite the race");
}

#[tokio::test]
async fn idempotency_key_replay_after_commit_skips_storage_mutation() {
    let client = TursoClient::connect(":memory:", None).await.unwrap();
    let storage = SqlStorage::new(client);

    let now = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
    let period = Period::new(now, now + Duration::days(30), PeriodKind::Monthly);

    let request = ConsumeRequest {
        user_id: "replay-user".into(),
        resource: "api_calls".into(),
        amount: 25,
        period,
        limit: 1000,
        tier_name: "pro".into(),
        idempotency_key: Some("replay-key".into()),
        idempotency_ttl: Duration::hours(24),
        metadata: None,
        now,
    };

    let first = storage.consume_quota(request.clone()).await.unwrap();
    assert_eq!(first.new_used, 25);

    let mut second_request = request;
    second_request.amount = 999;
    let second = storage.consume_quota(second_request).await.unwrap();
    assert_eq!(second.new_used, 25, "replay must return the original outcome, not apply the new amount");

    let usage = storage.get_usage("replay-user", "api_calls", period.start).await.unwrap().unwrap();
    assert_eq!(usage.used, 25);
}
