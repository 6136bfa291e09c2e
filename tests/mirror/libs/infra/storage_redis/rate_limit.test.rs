use chrono::Utc;
use quotaforge_core::{QuotaStorage, RateLimitRequest};
use quotaforge_domain_models::{RateLimitAlgorithm, SlidingWindowConfig, TokenBucketConfig};
use quotaforge_storage_redis::RedisStorage;

fn test_redis_url() -> String {
    std::env::var("QUOTAFORGE_TEST_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/15".into())
}

async fn storage() -> RedisStorage {
    RedisStorage::connect(&test_redis_url(), "quotaforge-test")
        .await
        .expect("connect to local test redis (set QUOTAFORGE_TEST_REDIS_URL to override)")
}

#[tokio::test]
async fn token_bucket_denies_once_drained() {
    let storage = storage().await;
    let now = Utc::now();
    let user_id = format!("redis-bucket-{}", uuid::Uuid::new_v4());

    let config = TokenBucketConfig {
        rate: 3,
        window_seconds: 60,
        burst: 3,
    };

    let mut last_allowed = true;
    for _ in 0..4 {
        let decision = storage
            .check_rate_limit(RateLimitRequest {
                user_id: &user_id,
                resource: "api_calls",
                algorithm: RateLimitAlgorithm::TokenBucket,
                token_bucket: Some(config),
                sliding_window: None,
                now,
            })
            .await
            .unwrap();
        last_allowed = decision.allowed;
    }

    assert!(!last_allowed, "fourth request within the burst window must be denied");
}

#[tokio::test]
async fn sliding_window_allows_up_to_rate_then_denies() {
    let storage = storage().await;
    let now = Utc::now();
    let user_id = format!("redis-window-{}", uuid::Uuid::new_v4());

    let config = SlidingWindowConfig {
        rate: 2,
        window_seconds: 60,
    };

    let mut allowed_count = 0;
    for _ in 0..3 {
        let decision = storage
            .check_rate_limit(RateLimitRequest {
                user_id: &user_id,
                resource: "api_calls",
                algorithm: RateLimitAlgorithm::SlidingWindow,
                token_bucket: None,
                sliding_window: Some(config),
                now,
            })
            .await
            .unwrap();
        if decision.allowed {
            allowed_count += 1;
        }
    }

    assert_eq!(allowed_count, 2);
}
