// [libs/core/manager/src/lib.rs]
//! Backend-agnostic quota accounting: period windows, limit resolution,
//! idempotent consume/refund, rate limiting, threshold warnings,
//! tier-change proration, and the storage seam every backend implements.

mod config;
mod entitlement_cache;
mod idempotency;
mod limit_resolver;
mod manager;
mod period_calculator;
mod proration;
mod rate_limiter;
mod storage;
mod warning;

pub use config::{ManagerConfig, ManagerConfigBuilder, WarningCallback, WarningEvent};
pub use manager::{ConsumeOptions, ConsumeOutcome, QuotaManager, QuotaSnapshot, RefundOptions};
pub use period_calculator::{
    custom_period, daily_period, forever_period, monthly_period, resolve_period,
};
pub use proration::prorate_limit_change;
pub use rate_limiter::{sliding_window_step, token_bucket_step};
pub use storage::{
    period_kind_as_str, period_kind_from_str, ConsumeRequest, QuotaOutcome, QuotaStorage,
    RateLimitRequest, RefundRequest,
};
