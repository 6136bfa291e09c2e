use std::sync::{Arc, Mutex};

use chrono::{TimeZone, Utc};
use quotaforge_core::{ConsumeOptions, ManagerConfig, QuotaManager, WarningEvent};
use quotaforge_domain_models::{RateLimitAlgorithm, SlidingWindowConfig, Tier, TokenBucketConfig};
use quotaforge_storage_memory::MemoryStorage;

#[tokio::test]
async fn token_bucket_allows_up_to_burst_then_denies() {
    let config = ManagerConfig::builder()
        .with_tier(Tier::new("free"))
        .with_default_tier("free")
        .build()
        .unwrap();
    let manager = QuotaManager::new(Arc::new(MemoryStorage::new()), config);
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
    let bucket = TokenBucketConfig { rate: 1, window_seconds: 60, burst: 3 };

    let mut allowed_count = 0;
    for _ in 0..5 {
        let decision = manager
            .check_rate_limit("u1", "login", RateLimitAlgorithm::TokenBucket, Some(bucket), None, now)
            .await;
        if decision.allowed {
            allowed_count += 1;
        }
    }
    assert_eq!(allowed_count, 3, "only the burst capacity should be admitted with no elapsed time to refill");
}

#[tokio::test]
async fn token_bucket_refills_after_the_window_elapses() {
    let config = ManagerConfig::builder()
        .with_tier(Tier::new("free"))
        .with_default_tier("free")
        .build()
        .unwrap();
    let manager = QuotaManager::new(Arc::new(MemoryStorage::new()), config);
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
    let bucket = TokenBucketConfig { rate: 10, window_seconds: 60, burst: 1 };

    let first = manager
        .check_rate_limit("u1", "login", RateLimitAlgorithm::TokenBucket, Some(bucket), None, now)
        .await;
    assert!(first.allowed);

    let immediately_after = manager
        .check_rate_limit("u1", "login", RateLimitAlgorithm::TokenBucket, Some(bucket), None, now)
        .await;
    assert!(!immediately_after.allowed);

    let later = now + chrono::Duration::seconds(60);
    let after_refill = manager
        .check_rate_limit("u1", "login", RateLimitAlgorithm::TokenBucket, Some(bucket), None, later)
        .await;
    assert!(after_refill.allowed, "a full window elapsed must refill enough tokens for another request");
}

#[tokio::test]
async fn sliding_window_denies_once_the_rate_is_exhausted_within_the_window() {
    let config = ManagerConfig::builder()
        .with_tier(Tier::new("free"))
        .with_default_tier("free")
        .build()
        .unwrap();
    let manager = QuotaManager::new(Arc::new(MemoryStorage::new()), config);
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
    let window = SlidingWindowConfig { rate: 2, window_seconds: 60 };

    for _ in 0..2 {
        let decision = manager
            .check_rate_limit("u1", "search", RateLimitAlgorithm::SlidingWindow, None, Some(window), now)
            .await;
        assert!(decision.allowed);
    }

    let third = manager
        .check_rate_limit("u1", "search", RateLimitAlgorithm::SlidingWindow, None, Some(window), now)
        .await;
    assert!(!third.allowed);

    let outside_window = now + chrono::Duration::seconds(61);
    let fourth = manager
        .check_rate_limit("u1", "search", RateLimitAlgorithm::SlidingWindow, None, Some(window), outside_window)
        .await;
    assert!(fourth.allowed, "requests outside the window must no longer count against the rate");
}

#[tokio::test]
async fn crossing_a_warning_threshold_fires_the_configured_callback() {
    let events: Arc<Mutex<Vec<WarningEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = events.clone();

    let tier = Tier::new("free")
        .with_monthly_limit("api_calls", 100)
        .with_warning_thresholds("api_calls", vec![0.5, 0.9]);
    let config = ManagerConfig::builder()
        .with_tier(tier)
        .with_default_tier("free")
        .with_warning_callback(move |event| recorder.lock().unwrap().push(event))
        .build()
        .unwrap();
    let manager = QuotaManager::new(Arc::new(MemoryStorage::new()), config);
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

    manager
        .consume("u1", "api_calls", 50, quotaforge_domain_models::PeriodKind::Monthly, ConsumeOptions::default(), now)
        .await
        .unwrap();

    let fired = events.lock().unwrap();
    assert_eq!(fired.len(), 1, "crossing the 0.5 threshold must fire exactly once");
    assert_eq!(fired[0].threshold, 0.5);
    assert_eq!(fired[0].used, 50);
}

#[tokio::test]
async fn a_consume_that_does_not_cross_a_new_threshold_does_not_refire_it() {
    let events: Arc<Mutex<Vec<WarningEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = events.clone();

    let tier = Tier::new("free")
        .with_monthly_limit("api_calls", 100)
        .with_warning_thresholds("api_calls", vec![0.5]);
    let config = ManagerConfig::builder()
        .with_tier(tier)
        .with_default_tier("free")
        .with_warning_callback(move |event| recorder.lock().unwrap().push(event))
        .build()
        .unwrap();
    let manager = QuotaManager::new(Arc::new(MemoryStorage::new()), config);
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();

    manager
        .consume("u1", "api_calls", 60, quotaforge_domain_models::PeriodKind::Monthly, ConsumeOptions::default(), now)
        .await
        .unwrap();
    manager
        .consume("u1", "api_calls", 5, quotaforge_domain_models::PeriodKind::Monthly, ConsumeOptions::default(), now)
        .await
        .unwrap();

    let fired = events.lock().unwrap();
    assert_eq!(fired.len(), 1, "a second consume that stays past the same threshold must not refire it");
}
