// [libs/domain/models/src/error.rs]
//! The outcome vocabulary every QuotaForge crate returns.

use thiserror::Error;

use crate::period::Period;

/// Every operation exposed by `quotaforge-core` and the storage backends
/// returns this type. Storage backends define their own internal error
/// enum and convert into `QuotaError::StorageFailure` at the trait
/// boundary — the manager never matches on a backend-specific variant.
#[derive(Error, Debug)]
pub enum QuotaError {
    /// `amount` was negative, or a `custom` period had non-monotonic bounds.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid period: {0}")]
    InvalidPeriod(String),

    /// The only business outcome — a consume would push `used` past
    /// `limit`. Carries enough state for the caller to build a 429 body.
    #[error("quota exceeded for resource {resource}: {used}/{limit} used in period {period:?}")]
    QuotaExceeded {
        resource: String,
        used: u64,
        limit: u64,
        period: Period,
    },

    /// Top-up/subtract path only — the consume path silently replays the
    /// cached outcome instead.
    #[error("idempotency key already used for this operation")]
    IdempotencyExists,

    /// Sentinel, not an error: lets callers distinguish "new user" from
    /// "default-tier user".
    #[error("no entitlement recorded for user")]
    EntitlementNotFound,

    #[error("unknown tier: {0}")]
    UnknownTier(String),

    #[error("storage failure: {0}")]
    StorageFailure(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// Raised only at manager construction time.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl QuotaError {
    pub fn storage(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        QuotaError::StorageFailure(Box::new(err))
    }
}

pub type QuotaResult<T> = Result<T, QuotaError>;
