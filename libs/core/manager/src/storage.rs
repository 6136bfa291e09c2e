// [libs/core/manager/src/storage.rs]
//! The storage contract. Every backend (in-memory, SQL, Redis,
//! and any future document-store adapter) implements `QuotaStorage`.
//! "Atomic" means serialisable with respect to other calls on the same
//! `(user, resource, period_start)` key; a backend may use a transaction
//! with row locks, a single-key CAS, or a Lua script to get there.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quotaforge_domain_models::{
    ConsumptionRecord, Entitlement, Period, PeriodKind, QuotaResult, RateLimitAlgorithm,
    RateLimitDecision, RefundRecord, SlidingWindowConfig, TokenBucketConfig, UsageRecord,
};

/// Outcome of `ConsumeQuota` / `RefundQuota`: either the new used count,
/// or the quota-exceeded state the manager turns into `QuotaError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaOutcome {
    pub new_used: u64,
    pub limit: u64,
    pub exceeded: bool,
}

#[derive(Debug, Clone)]
pub struct ConsumeRequest {
    pub user_id: String,
    pub resource: String,
    pub amount: u64,
    pub period: Period,
    pub limit: u64,
    pub tier_name: String,
    pub idempotency_key: Option<String>,
    pub idempotency_ttl: chrono::Duration,
    pub metadata: Option<serde_json::Value>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RefundRequest {
    pub user_id: String,
    pub resource: String,
    pub amount: u64,
    pub period: Period,
    pub idempotency_key: Option<String>,
    pub idempotency_ttl: chrono::Duration,
    pub reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct RateLimitRequest<'a> {
    pub user_id: &'a str,
    pub resource: &'a str,
    pub algorithm: RateLimitAlgorithm,
    pub token_bucket: Option<TokenBucketConfig>,
    pub sliding_window: Option<SlidingWindowConfig>,
    pub now: DateTime<Utc>,
}

#[async_trait]
pub trait QuotaStorage: Send + Sync {
    async fn get_entitlement(&self, user_id: &str) -> QuotaResult<Option<Entitlement>>;
    async fn set_entitlement(&self, entitlement: Entitlement) -> QuotaResult<()>;

    async fn get_usage(
        &self,
        user_id: &str,
        resource: &str,
        period_start: DateTime<Utc>,
    ) -> QuotaResult<Option<UsageRecord>>;

    /// Upsert used for recovery and tests; never called from the consume
    /// path itself.
    async fn set_usage(&self, usage: UsageRecord) -> QuotaResult<()>;

    /// The hardest primitive. Every implementation must follow the
    /// insert-then-recover idempotency pattern: lock/upsert the usage
    /// row, apply the amount if it would not exceed the limit, then
    /// insert the idempotency record with `ON CONFLICT DO NOTHING`; if
    /// that insert affects zero rows, re-read the existing record and
    /// return its outcome instead — the losing side of a race between
    /// two concurrent first-writers must see what the winner committed.
    async fn consume_quota(&self, request: ConsumeRequest) -> QuotaResult<QuotaOutcome>;

    /// Analogous to `consume_quota`, floors the resulting `used` at 0.
    async fn refund_quota(&self, request: RefundRequest) -> QuotaResult<QuotaOutcome>;

    async fn apply_tier_change(
        &self,
        user_id: &str,
        resource: &str,
        period: Period,
        new_limit: u64,
        new_tier: &str,
    ) -> QuotaResult<()>;

    async fn add_limit(
        &self,
        user_id: &str,
        resource: &str,
        period: Period,
        tier_name: &str,
        amount: u64,
        idempotency_key: &str,
    ) -> QuotaResult<u64>;

    async fn subtract_limit(
        &self,
        user_id: &str,
        resource: &str,
        period: Period,
        amount: u64,
        idempotency_key: &str,
    ) -> QuotaResult<u64>;

    async fn get_consumption_record(
        &self,
        user_id: &str,
        idempotency_key: &str,
    ) -> QuotaResult<Option<ConsumptionRecord>>;

    async fn get_refund_record(
        &self,
        user_id: &str,
        idempotency_key: &str,
    ) -> QuotaResult<Option<RefundRecord>>;

    async fn check_rate_limit(&self, request: RateLimitRequest<'_>) -> QuotaResult<RateLimitDecision>;

    /// Evicts idempotency records (consumption and refund) whose
    /// `expires_at` has passed. Must never touch usage rows.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> QuotaResult<u64>;
}

/// Resolves a `PeriodKind` string tag a backend's schema might store for
/// a usage row back into the strongly typed enum. Backends that keep
/// `Period` structs in memory (the in-memory backend) do not need this.
pub fn period_kind_as_str(kind: PeriodKind) -> &'static str {
    match kind {
        PeriodKind::Daily => "daily",
        PeriodKind::Monthly => "monthly",
        PeriodKind::Forever => "forever",
        PeriodKind::Custom => "custom",
        PeriodKind::Auto => "auto",
    }
}

pub fn period_kind_from_str(value: &str) -> Option<PeriodKind> {
    match value {
        "daily" => Some(PeriodKind::Daily),
        "monthly" => Some(PeriodKind::Monthly),
        "forever" => Some(PeriodKind::Forever),
        "custom" => Some(PeriodKind::Custom),
        "auto" => Some(PeriodKind::Auto),
        _ => None,
    }
}
