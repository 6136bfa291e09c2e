// [libs/domain/billing-sync/src/synchroniser.rs]
//! Pulls subscription state from a provider (or accepts it pushed via a
//! webhook) and turns it into an entitlement write. The only rule that
//! matters is in `resolve_tier`: everything about grace periods and
//! expiry falls out of comparing `now` to `expires_at`, so the event's
//! polarity never has to be branched on separately.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use quotaforge_core::QuotaStorage;
use quotaforge_core::QuotaManager;
use quotaforge_domain_models::Entitlement;
use tracing::{debug, instrument, warn};

use crate::errors::{BillingError, BillingResult};
use crate::mapping::TierMapping;
use crate::provider::{BillingProvider, ProviderSubscription};

/// A provider-pushed update, as would arrive over a billing webhook.
/// Carries the same fields as `ProviderSubscription` since both paths
/// converge on the same resolution rule.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub user_id: String,
    pub product_id: String,
    pub subscription_start_date: Option<NaiveDate>,
    pub expires_at: Option<DateTime<Utc>>,
    pub event_timestamp: DateTime<Utc>,
}

pub struct BillingSynchroniser<S: QuotaStorage, P: BillingProvider> {
    manager: Arc<QuotaManager<S>>,
    provider: P,
    mapping: TierMapping,
}

impl<S: QuotaStorage, P: BillingProvider> BillingSynchroniser<S, P> {
    pub fn new(manager: Arc<QuotaManager<S>>, provider: P, mapping: TierMapping) -> Self {
        Self { manager, provider, mapping }
    }

    /// Fetches `user_id`'s current state from the provider and writes
    /// the resulting entitlement. Returns `true` if the write applied,
    /// `false` if the manager's timestamp CAS dropped it as stale, and
    /// `Ok(false)` as well when the provider has no record at all (the
    /// user already sees the default tier and there is nothing to
    /// write).
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn sync_user(&self, user_id: &str, now: DateTime<Utc>) -> BillingResult<bool> {
        let subscription = match self.provider.fetch_subscription(user_id).await? {
            Some(sub) => sub,
            None => {
                debug!("provider has no subscription on file, leaving default tier in place");
                return Ok(false);
            }
        };

        self.apply(subscription, now).await
    }

    /// Applies a provider-pushed event using the same resolution rule as
    /// `sync_user`. The webhook transport is responsible for signature
    /// verification and idempotent request handling before calling this
    /// — the strict-monotonic CAS inside `SetEntitlement` is what
    /// protects against duplicate or out-of-order deliveries, not this
    /// method.
    #[instrument(skip(self, event), fields(user_id = %event.user_id))]
    pub async fn apply_webhook_event(&self, event: WebhookEvent) -> BillingResult<bool> {
        let subscription = ProviderSubscription {
            user_id: event.user_id,
            product_id: event.product_id,
            status: crate::provider::SubscriptionStatus::Active,
            subscription_start_date: event.subscription_start_date,
            expires_at: event.expires_at,
            provider_updated_at: event.event_timestamp,
        };
        self.apply(subscription, event.event_timestamp).await
    }

    async fn apply(&self, subscription: ProviderSubscription, now: DateTime<Utc>) -> BillingResult<bool> {
        let tier_name = self.resolve_tier(&subscription, now)?;

        let mut entitlement = Entitlement::new(
            subscription.user_id.clone(),
            tier_name,
            subscription.provider_updated_at,
        );
        if let Some(date) = subscription.subscription_start_date {
            entitlement = entitlement.with_subscription_start(date);
        }
        if let Some(expires_at) = subscription.expires_at {
            entitlement = entitlement.with_expiry(expires_at);
        }

        let applied = self.manager.set_entitlement(entitlement).await?;
        if !applied {
            warn!(user_id = %subscription.user_id, "dropped stale or out-of-order entitlement update");
        }
        Ok(applied)
    }

    /// Grace periods and plain expiry are the same rule: once `now` has
    /// reached `expires_at`, the tier falls back to the manager's
    /// default regardless of what the provider's status field said.
    /// Subscriptions with no `expires_at` never expire on this check.
    fn resolve_tier(&self, subscription: &ProviderSubscription, now: DateTime<Utc>) -> BillingResult<String> {
        if subscription.expires_at.is_some_and(|expiry| now >= expiry) {
            return Ok(self.manager.default_tier_name().to_string());
        }

        let tier_name = self
            .mapping
            .resolve(&subscription.product_id)
            .ok_or_else(|| BillingError::UnmappedProduct(subscription.product_id.clone()))?;

        if !self.manager.has_tier(tier_name) {
            return Err(BillingError::Quota(quotaforge_domain_models::QuotaError::UnknownTier(
                tier_name.to_string(),
            )));
        }

        Ok(tier_name.to_string())
    }
}
