// [libs/domain/models/src/records.rs]
//! Idempotency ledger rows: one namespace for consumes, one for refunds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::tier::PeriodKind;

/// Keyed by `(user_id, idempotency_key)`. Written inside the same
/// transaction as the usage mutation it guards; read on every
/// keyed consume to short-circuit duplicates.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsumptionRecord {
    pub user_id: String,
    pub idempotency_key: String,
    pub resource: String,
    pub amount: u64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub period_kind: PeriodKind,
    pub new_used: u64,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub metadata: Option<serde_json::Value>,
}

impl ConsumptionRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Same shape as `ConsumptionRecord`, in a separate namespace, so the
/// same key string may identify both a consume and a refund for one
/// user without colliding.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RefundRecord {
    pub user_id: String,
    pub idempotency_key: String,
    pub resource: String,
    pub amount: u64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub period_kind: PeriodKind,
    pub new_used: u64,
    pub timestamp: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

impl RefundRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
