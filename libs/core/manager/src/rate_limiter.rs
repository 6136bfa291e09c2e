// [libs/core/manager/src/rate_limiter.rs]
//! Request-rate shielding, distinct from quota counters.
//!
//! Both algorithms are lazy: there is no background refill thread, each
//! `Allow` call advances the bucket/window by however much wall-clock
//! time has elapsed since it was last touched.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use quotaforge_domain_models::{QuotaResult, RateLimitAlgorithm, RateLimitDecision};
use tracing::{instrument, warn};

use crate::storage::{QuotaStorage, RateLimitRequest};

pub struct RateLimiter<S: QuotaStorage> {
    storage: Arc<S>,
}

impl<S: QuotaStorage> RateLimiter<S> {
    pub fn new(storage: Arc<S>) -> Self {
        Self { storage }
    }

    /// A storage error on the rate-limit path fails *open* — the caller
    /// gets a synthetic full-budget decision rather than a denial. This
    /// is the one place in QuotaForge that trades correctness for
    /// availability; the quota manager itself never does this.
    #[instrument(skip(self, request), fields(user_id = request.user_id, resource = request.resource))]
    pub async fn allow(&self, request: RateLimitRequest<'_>) -> RateLimitDecision {
        match self.storage.check_rate_limit(request).await {
            Ok(decision) => decision,
            Err(err) => {
                warn!(error = %err, "rate limit storage call failed, failing open");
                fail_open(request.now)
            }
        }
    }
}

fn fail_open(now: DateTime<Utc>) -> RateLimitDecision {
    RateLimitDecision {
        allowed: true,
        remaining: u64::MAX,
        reset_at: now,
    }
}

/// Pure token-bucket step, used directly by backends implementing
/// `check_rate_limit` so the algorithm itself is grounded in one place
/// and unit-testable without a storage round-trip.
pub fn token_bucket_step(
    tokens_before: f64,
    capacity: u64,
    rate_per_window: u64,
    window_seconds: u64,
    elapsed_seconds: f64,
) -> (f64, bool) {
    let refill = rate_per_window as f64 * elapsed_seconds / window_seconds.max(1) as f64;
    let tokens_after_refill = (tokens_before + refill).min(capacity as f64);

    if tokens_after_refill >= 1.0 {
        (tokens_after_refill - 1.0, true)
    } else {
        (tokens_after_refill, false)
    }
}

/// Pure sliding-window step: record-then-prune. The
/// caller is responsible for doing this atomically inside storage.
pub fn sliding_window_step(
    mut timestamps: Vec<DateTime<Utc>>,
    rate: u64,
    window_seconds: i64,
    now: DateTime<Utc>,
) -> (Vec<DateTime<Utc>>, bool) {
    let window_start = now - chrono::Duration::seconds(window_seconds);
    let recent_count = timestamps.iter().filter(|ts| **ts > window_start).count();

    let allowed = (recent_count as u64) < rate;
    if allowed {
        timestamps.push(now);
    }
    timestamps.retain(|ts| *ts > window_start);

    (timestamps, allowed)
}

pub fn algorithm_requires(algorithm: RateLimitAlgorithm) -> &'static str {
    match algorithm {
        RateLimitAlgorithm::TokenBucket => "token_bucket",
        RateLimitAlgorithm::SlidingWindow => "sliding_window",
    }
}

pub type AllowResult = QuotaResult<RateLimitDecision>;
