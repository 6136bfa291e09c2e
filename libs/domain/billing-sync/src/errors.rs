// [libs/domain/billing-sync/src/errors.rs]
use thiserror::Error;

/// Failures specific to pulling and mapping provider state. A mapped
/// tier that is missing from the manager's own tier registry surfaces
/// as `QuotaError::UnknownTier` from `SetEntitlement`, not from here —
/// this crate only owns the provider-facing half of the pipeline.
#[derive(Error, Debug)]
pub enum BillingError {
    #[error("billing provider request failed: {0}")]
    Provider(String),

    #[error("provider returned a product identifier with no mapping and no '*' fallback: {0}")]
    UnmappedProduct(String),

    #[error("webhook payload could not be parsed: {0}")]
    MalformedEvent(String),

    #[error(transparent)]
    Quota(#[from] quotaforge_domain_models::QuotaError),
}

pub type BillingResult<T> = Result<T, BillingError>;
