// [libs/core/manager/src/idempotency.rs]
//! Replay protection for consume/refund calls.
//!
//! An idempotency key only protects the user who supplied it: looking a
//! key up must always re-check that the stored record belongs to the
//! caller, otherwise one tenant could probe or replay another tenant's
//! key.

use chrono::{DateTime, Utc};
use quotaforge_domain_models::{ConsumptionRecord, QuotaError, QuotaResult, RefundRecord};

pub fn check_consumption_record(
    record: Option<ConsumptionRecord>,
    expected_user_id: &str,
    now: DateTime<Utc>,
) -> QuotaResult<Option<ConsumptionRecord>> {
    check_owned(record, expected_user_id, now, |r| r.user_id.as_str(), |r| r.is_expired(now))
}

pub fn check_refund_record(
    record: Option<RefundRecord>,
    expected_user_id: &str,
    now: DateTime<Utc>,
) -> QuotaResult<Option<RefundRecord>> {
    check_owned(record, expected_user_id, now, |r| r.user_id.as_str(), |r| r.is_expired(now))
}

fn check_owned<T>(
    record: Option<T>,
    expected_user_id: &str,
    _now: DateTime<Utc>,
    owner: impl Fn(&T) -> &str,
    expired: impl Fn(&T) -> bool,
) -> QuotaResult<Option<T>> {
    match record {
        None => Ok(None),
        Some(r) if expired(&r) => Ok(None),
        Some(r) if owner(&r) != expected_user_id => Err(QuotaError::EntitlementNotFound),
        Some(r) => Ok(Some(r)),
    }
}

pub fn expiry_from(now: DateTime<Utc>, ttl: chrono::Duration) -> DateTime<Utc> {
    now + ttl
}
