// [libs/domain/models/src/usage.rs]
//! The per-user/resource/period counter row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::tier::PeriodKind;

/// Keyed by `(user_id, resource, period_start)`. Created on first consume
/// for the period; mutated by every consume/refund/top-up/tier-change;
/// destroyed only by backend retention policy, never by the manager.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UsageRecord {
    pub user_id: String,
    pub resource: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub period_kind: PeriodKind,

    pub used: u64,
    /// Snapshot of the limit at the time of the last mutation — proration
    /// and top-ups write here directly; the tier's configured limit is
    /// never touched.
    pub limit: u64,
    pub tier_name: String,

    pub updated_at: DateTime<Utc>,
}

impl UsageRecord {
    pub fn fresh(
        user_id: impl Into<String>,
        resource: impl Into<String>,
        period_start: DateTime<Utc>,
        period_end: DateTime<Utc>,
        period_kind: PeriodKind,
        limit: u64,
        tier_name: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            resource: resource.into(),
            period_start,
            period_end,
            period_kind,
            used: 0,
            limit,
            tier_name: tier_name.into(),
            updated_at: now,
        }
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    pub fn would_exceed(&self, amount: u64) -> bool {
        self.used.saturating_add(amount) > self.limit
    }
}
