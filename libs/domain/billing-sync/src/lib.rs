// [libs/domain/billing-sync/src/lib.rs]
//! Bridges an external subscription provider to the quota manager's
//! entitlement store. A `BillingSynchroniser` either pulls state on
//! demand (`sync_user`) or accepts a provider-pushed event
//! (`apply_webhook_event`); both converge on the same tier-resolution
//! rule and the same `SetEntitlement` timestamp CAS, so duplicate or
//! out-of-order deliveries from either path are absorbed without extra
//! dedupe storage.

mod errors;
mod mapping;
mod provider;
mod synchroniser;

pub use errors::{BillingError, BillingResult};
pub use mapping::TierMapping;
pub use provider::{BillingProvider, ProviderSubscription, SubscriptionStatus};
pub use synchroniser::{BillingSynchroniser, WebhookEvent};
