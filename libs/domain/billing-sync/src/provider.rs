// [libs/domain/billing-sync/src/provider.rs]
//! The seam between this crate and whatever billing system a deployment
//! actually uses (Stripe, Paddle, an internal ledger). Nothing here
//! knows about HTTP, webhooks, or signatures — that belongs to the
//! caller wiring a `BillingProvider` up to a transport.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};

use crate::errors::BillingResult;

/// Polarity of the event that produced a `ProviderSubscription`. Carried
/// for logging and caller inspection only — tier resolution depends
/// solely on `expires_at` versus `now`, never on this field, so that
/// renewals, cancellations and grace periods all flow through one rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionStatus {
    Active,
    Cancelled,
    PastDue,
    Trialing,
}

/// A provider's view of one user's subscription at a point in time.
#[derive(Debug, Clone)]
pub struct ProviderSubscription {
    pub user_id: String,
    /// Provider-side product/price/plan identifier, looked up in a
    /// `TierMapping` to find the local tier name.
    pub product_id: String,
    pub status: SubscriptionStatus,
    pub subscription_start_date: Option<NaiveDate>,
    /// When the current billing period's access ends. `None` means the
    /// provider does not bound access (e.g. a lifetime deal).
    pub expires_at: Option<DateTime<Utc>>,
    /// The provider's own timestamp for this state, used as
    /// `Entitlement::updated_at` so the manager's CAS can order
    /// concurrent or out-of-order deliveries correctly.
    pub provider_updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait BillingProvider: Send + Sync {
    /// Current subscription state for `user_id`, or `None` if the
    /// provider has no record of them (treated the same as an expired
    /// subscription: the default tier applies).
    async fn fetch_subscription(&self, user_id: &str) -> BillingResult<Option<ProviderSubscription>>;
}
