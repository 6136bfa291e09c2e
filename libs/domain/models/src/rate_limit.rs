// [libs/domain/models/src/rate_limit.rs]
//! State shapes for the two rate-limiting algorithms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typeshare::typeshare;

#[typeshare]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitAlgorithm {
    TokenBucket,
    SlidingWindow,
}

/// Token-bucket configuration supplied by the caller on each `Allow` call.
#[typeshare]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TokenBucketConfig {
    /// Tokens refilled per `window`.
    pub rate: u64,
    pub window_seconds: u64,
    /// Maximum tokens the bucket can hold.
    pub burst: u64,
}

/// Sliding-window configuration supplied by the caller on each `Allow` call.
#[typeshare]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SlidingWindowConfig {
    pub rate: u64,
    pub window_seconds: u64,
}

/// Keyed by `(user_id, resource, algorithm)`. Not persisted beyond the
/// process unless the backend elects to.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TokenBucketState {
    pub tokens_remaining: f64,
    pub last_refill: DateTime<Utc>,
}

#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlidingWindowState {
    /// Request timestamps within the current window, oldest first.
    pub timestamps: Vec<DateTime<Utc>>,
}

/// Result of an `Allow` call.
#[typeshare]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
}
