// [libs/domain/models/src/entitlement.rs]
//! The binding of a user to a tier, with an optional validity window.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// One per user. Mutated only via `SetEntitlement`, which applies a
/// last-writer-wins CAS on `updated_at` when driven by an external
/// synchroniser.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Entitlement {
    pub user_id: String,
    pub tier_name: String,

    /// Calendar day, UTC. Anchors billing-anniversary monthly periods.
    pub subscription_start_date: Option<NaiveDate>,

    pub expires_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Entitlement {
    pub fn new(user_id: impl Into<String>, tier_name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            user_id: user_id.into(),
            tier_name: tier_name.into(),
            subscription_start_date: None,
            expires_at: None,
            updated_at: now,
        }
    }

    pub fn with_subscription_start(mut self, date: NaiveDate) -> Self {
        self.subscription_start_date = Some(date);
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// An entitlement whose `expires_at` has passed is treated as absent
    /// for the purposes of this call.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expiry| expiry <= now)
    }

    /// An externally-driven update is visible only if strictly newer.
    pub fn is_newer_than(&self, existing: &Entitlement) -> bool {
        self.updated_at > existing.updated_at
    }
}
