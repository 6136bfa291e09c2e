// [libs/domain/models/src/lib.rs]
//! Shared domain types for the QuotaForge quota-accounting engine:
//! tiers, entitlements, periods, usage rows and the idempotency ledger.

pub mod entitlement;
pub mod error;
pub mod period;
pub mod rate_limit;
pub mod records;
pub mod tier;
pub mod usage;

pub use entitlement::Entitlement;
pub use error::{QuotaError, QuotaResult};
pub use period::{forever_sentinel, Period};
pub use rate_limit::{
    RateLimitAlgorithm, RateLimitDecision, SlidingWindowConfig, SlidingWindowState,
    TokenBucketConfig, TokenBucketState,
};
pub use records::{ConsumptionRecord, RefundRecord};
pub use tier::{PeriodKind, ResourceLimitMap, Tier};
pub use usage::UsageRecord;
