// [libs/core/manager/src/manager.rs]
//! `QuotaManager` ties the period calculator, limit resolver,
//! idempotency index, rate limiter, warning engine and entitlement
//! cache to a storage backend. This is the type applications hold.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use quotaforge_domain_models::{
    Entitlement, Period, PeriodKind, QuotaError, QuotaResult, RateLimitAlgorithm,
    RateLimitDecision, SlidingWindowConfig, TokenBucketConfig,
};
use tracing::{debug, instrument};

use crate::config::ManagerConfig;
use crate::entitlement_cache::EntitlementCache;
use crate::idempotency;
use crate::limit_resolver::resolve_limit;
use crate::period_calculator::resolve_period;
use crate::rate_limiter::RateLimiter;
use crate::storage::{
    ConsumeRequest, QuotaOutcome, QuotaStorage, RateLimitRequest, RefundRequest,
};
use crate::warning;

/// Options accepted by `consume`/`refund`. All optional; defaults match
/// the manager's configured idempotency TTL and no dry-run.
#[derive(Debug, Clone, Default)]
pub struct ConsumeOptions {
    pub idempotency_key: Option<String>,
    pub idempotency_ttl: Option<chrono::Duration>,
    pub dry_run: bool,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default)]
pub struct RefundOptions {
    pub idempotency_key: Option<String>,
    pub idempotency_ttl: Option<chrono::Duration>,
    pub reason: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumeOutcome {
    pub new_used: u64,
    pub limit: u64,
    pub period_kind: PeriodKind,
}

#[derive(Debug, Clone)]
pub struct QuotaSnapshot {
    pub used: u64,
    pub limit: u64,
    pub tier_name: String,
    pub period: Period,
}

pub struct QuotaManager<S: QuotaStorage> {
    storage: Arc<S>,
    config: ManagerConfig,
    entitlements: EntitlementCache<S>,
    rate_limiter: RateLimiter<S>,
}

impl<S: QuotaStorage> QuotaManager<S> {
    pub fn new(storage: Arc<S>, config: ManagerConfig) -> Self {
        let entitlements = EntitlementCache::new(storage.clone(), config.entitlement_cache_ttl());
        let rate_limiter = RateLimiter::new(storage.clone());
        Self {
            storage,
            config,
            entitlements,
            rate_limiter,
        }
    }

    /// Entitlement for `user_id`, falling back to a virtual default-tier
    /// entitlement that is never persisted when none is on file, or when
    /// the one on file has expired.
    async fn effective_entitlement(&self, user_id: &str, now: DateTime<Utc>) -> QuotaResult<Entitlement> {
        let stored = self.entitlements.get(user_id).await?;
        match stored {
            Some(entitlement) if !entitlement.is_expired(now) => Ok(entitlement),
            _ => Ok(self.virtual_entitlement(user_id)),
        }
    }

    fn virtual_entitlement(&self, user_id: &str) -> Entitlement {
        Entitlement::new(user_id, &self.config.default_tier().name, Utc::now())
    }

    /// Name of the tier a user falls back to with no entitlement on file
    /// or an expired one. Exposed for callers (the billing synchroniser)
    /// that need to resolve the same fallback outside of a consume path.
    pub fn default_tier_name(&self) -> &str {
        &self.config.default_tier().name
    }

    /// Whether `name` is a tier this manager was configured with.
    pub fn has_tier(&self, name: &str) -> bool {
        self.config.tier(name).is_some()
    }

    fn tier_for<'a>(&'a self, entitlement: &Entitlement) -> &'a quotaforge_domain_models::Tier {
        self.config.tier(&entitlement.tier_name).unwrap_or_else(|| self.config.default_tier())
    }

    #[instrument(skip(self, options), fields(user_id, resource, amount))]
    pub async fn consume(
        &self,
        user_id: &str,
        resource: &str,
        amount: u64,
        period_kind: PeriodKind,
        options: ConsumeOptions,
        now: DateTime<Utc>,
    ) -> QuotaResult<ConsumeOutcome> {
        if amount == 0 {
            return Ok(ConsumeOutcome {
                new_used: 0,
                limit: 0,
                period_kind,
            });
        }

        let entitlement = self.effective_entitlement(user_id, now).await?;
        let tier = self.tier_for(&entitlement);

        if period_kind == PeriodKind::Auto {
            let order = tier.auto_order();
            let mut last_err: Option<QuotaError> = None;
            for kind in order {
                match self
                    .consume_fixed_kind(user_id, resource, amount, kind, &entitlement, &options, now)
                    .await
                {
                    Ok(outcome) => return Ok(outcome),
                    Err(QuotaError::QuotaExceeded { resource, limit, used, period }) => {
                        last_err = Some(QuotaError::QuotaExceeded { resource, limit, used, period });
                        continue;
                    }
                    Err(other) => return Err(other),
                }
            }
            return Err(last_err.unwrap_or_else(|| {
                QuotaError::Configuration("auto consume had no configured fallback kinds".into())
            }));
        }

        self.consume_fixed_kind(user_id, resource, amount, period_kind, &entitlement, &options, now)
            .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn consume_fixed_kind(
        &self,
        user_id: &str,
        resource: &str,
        amount: u64,
        kind: PeriodKind,
        entitlement: &Entitlement,
        options: &ConsumeOptions,
        now: DateTime<Utc>,
    ) -> QuotaResult<ConsumeOutcome> {
        let tier = self.tier_for(entitlement);
        let period = resolve_period(kind, now, entitlement, None)?;
        let limit = resolve_limit(tier, resource, kind);

        if limit == 0 {
            return Err(QuotaError::QuotaExceeded {
                resource: resource.to_string(),
                used: 0,
                limit: 0,
                period,
            });
        }

        if let Some(key) = &options.idempotency_key {
            let existing = self.storage.get_consumption_record(user_id, key).await?;
            if let Some(record) = idempotency::check_consumption_record(existing, user_id, now)? {
                return Ok(ConsumeOutcome {
                    new_used: record.new_used,
                    limit,
                    period_kind: kind,
                });
            }
        }

        if options.dry_run {
            let current = self.storage.get_usage(user_id, resource, period.start).await?;
            let used = current.map(|u| u.used).unwrap_or(0);
            let would_be = used.saturating_add(amount);
            if would_be > limit {
                return Err(QuotaError::QuotaExceeded {
                    resource: resource.to_string(),
                    used,
                    limit,
                    period,
                });
            }
            return Ok(ConsumeOutcome {
                new_used: would_be,
                limit,
                period_kind: kind,
            });
        }

        let ttl = options
            .idempotency_ttl
            .unwrap_or_else(|| chrono::Duration::from_std(self.config.default_idempotency_ttl()).unwrap());

        let request = ConsumeRequest {
            user_id: user_id.to_string(),
            resource: resource.to_string(),
            amount,
            period,
            limit,
            tier_name: tier.name.clone(),
            idempotency_key: options.idempotency_key.clone(),
            idempotency_ttl: ttl,
            metadata: options.metadata.clone(),
            now,
        };

        let outcome: QuotaOutcome = self.storage.consume_quota(request).await?;
        if outcome.exceeded {
            return Err(QuotaError::QuotaExceeded {
                resource: resource.to_string(),
                used: outcome.new_used,
                limit: outcome.limit,
                period,
            });
        }

        let used_before = outcome.new_used.saturating_sub(amount);
        warning::evaluate_and_fire(&self.config, &tier.name, resource, used_before, outcome.new_used, outcome.limit);

        Ok(ConsumeOutcome {
            new_used: outcome.new_used,
            limit: outcome.limit,
            period_kind: kind,
        })
    }

    #[instrument(skip(self, options), fields(user_id, resource, amount))]
    pub async fn refund(
        &self,
        user_id: &str,
        resource: &str,
        amount: u64,
        period_kind: PeriodKind,
        options: RefundOptions,
        now: DateTime<Utc>,
    ) -> QuotaResult<ConsumeOutcome> {
        let entitlement = self.effective_entitlement(user_id, now).await?;
        let kind = if period_kind == PeriodKind::Auto {
            self.tier_for(&entitlement).auto_order().into_iter().next().unwrap_or(PeriodKind::Monthly)
        } else {
            period_kind
        };
        let period = resolve_period(kind, now, &entitlement, None)?;

        if let Some(key) = &options.idempotency_key {
            let existing = self.storage.get_refund_record(user_id, key).await?;
            if let Some(record) = idempotency::check_refund_record(existing, user_id, now)? {
                return Ok(ConsumeOutcome {
                    new_used: record.new_used,
                    limit: resolve_limit(self.tier_for(&entitlement), resource, kind),
                    period_kind: kind,
                });
            }
        }

        let ttl = options
            .idempotency_ttl
            .unwrap_or_else(|| chrono::Duration::from_std(self.config.default_idempotency_ttl()).unwrap());

        let request = RefundRequest {
            user_id: user_id.to_string(),
            resource: resource.to_string(),
            amount,
            period,
            idempotency_key: options.idempotency_key.clone(),
            idempotency_ttl: ttl,
            reason: options.reason.clone(),
            metadata: options.metadata.clone(),
            now,
        };

        let outcome = self.storage.refund_quota(request).await?;
        debug!(new_used = outcome.new_used, "refund applied");

        Ok(ConsumeOutcome {
            new_used: outcome.new_used,
            limit: outcome.limit,
            period_kind: kind,
        })
    }

    #[instrument(skip(self), fields(user_id, resource))]
    pub async fn change_tier(
        &self,
        user_id: &str,
        resource: &str,
        to_tier: &str,
        now: DateTime<Utc>,
    ) -> QuotaResult<()> {
        let entitlement = self.effective_entitlement(user_id, now).await?;
        let from_tier = self.tier_for(&entitlement);
        let new_tier = self
            .config
            .tier(to_tier)
            .ok_or_else(|| QuotaError::UnknownTier(to_tier.to_string()))?;

        let period = resolve_period(PeriodKind::Monthly, now, &entitlement, None)?;
        let old_limit = resolve_limit(from_tier, resource, PeriodKind::Monthly);
        let new_limit_configured = resolve_limit(new_tier, resource, PeriodKind::Monthly);

        let current = self.storage.get_usage(user_id, resource, period.start).await?;
        let used = current.map(|u| u.used).unwrap_or(0);

        let new_limit = crate::proration::prorate_limit_change(
            period.start,
            period.end,
            now,
            old_limit,
            new_limit_configured,
            used,
        );

        self.storage
            .apply_tier_change(user_id, resource, period, new_limit, to_tier)
            .await?;

        let mut updated = entitlement;
        updated.tier_name = to_tier.to_string();
        updated.updated_at = now;
        self.storage.set_entitlement(updated).await?;
        self.entitlements.invalidate(user_id);

        Ok(())
    }

    /// Applies an externally-sourced entitlement update (billing
    /// synchroniser, admin tooling) with a strict-monotonic CAS on
    /// `updated_at`. An update that is not strictly newer than what is
    /// already on file is silently dropped — this is how duplicate and
    /// out-of-order webhook deliveries are absorbed without a separate
    /// dedupe store.
    #[instrument(skip(self, entitlement), fields(user_id = %entitlement.user_id))]
    pub async fn set_entitlement(&self, entitlement: Entitlement) -> QuotaResult<bool> {
        let existing = self.storage.get_entitlement(&entitlement.user_id).await?;
        let applies = match &existing {
            Some(current) => entitlement.is_newer_than(current),
            None => true,
        };

        if !applies {
            debug!(user_id = %entitlement.user_id, "entitlement update is not newer than the one on file, dropping");
            return Ok(false);
        }

        self.storage.set_entitlement(entitlement.clone()).await?;
        self.entitlements.invalidate(&entitlement.user_id);
        Ok(true)
    }

    #[instrument(skip(self), fields(user_id, resource, amount))]
    pub async fn add_limit(
        &self,
        user_id: &str,
        resource: &str,
        period_kind: PeriodKind,
        amount: u64,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> QuotaResult<u64> {
        let entitlement = self.effective_entitlement(user_id, now).await?;
        let tier = self.tier_for(&entitlement);
        let kind = if period_kind == PeriodKind::Auto {
            PeriodKind::Monthly
        } else {
            period_kind
        };
        let period = resolve_period(kind, now, &entitlement, None)?;
        self.storage
            .add_limit(user_id, resource, period, &tier.name, amount, idempotency_key)
            .await
    }

    #[instrument(skip(self), fields(user_id, resource, amount))]
    pub async fn subtract_limit(
        &self,
        user_id: &str,
        resource: &str,
        period_kind: PeriodKind,
        amount: u64,
        idempotency_key: &str,
        now: DateTime<Utc>,
    ) -> QuotaResult<u64> {
        let entitlement = self.effective_entitlement(user_id, now).await?;
        let kind = if period_kind == PeriodKind::Auto {
            PeriodKind::Monthly
        } else {
            period_kind
        };
        let period = resolve_period(kind, now, &entitlement, None)?;
        self.storage
            .subtract_limit(user_id, resource, period, amount, idempotency_key)
            .await
    }

    #[instrument(skip(self), fields(user_id, resource))]
    pub async fn get_quota(
        &self,
        user_id: &str,
        resource: &str,
        period_kind: PeriodKind,
        now: DateTime<Utc>,
    ) -> QuotaResult<QuotaSnapshot> {
        let entitlement = self.effective_entitlement(user_id, now).await?;
        let tier = self.tier_for(&entitlement);
        let kind = if period_kind == PeriodKind::Auto {
            tier.auto_order().into_iter().next().unwrap_or(PeriodKind::Monthly)
        } else {
            period_kind
        };
        let period = resolve_period(kind, now, &entitlement, None)?;
        let limit = resolve_limit(tier, resource, kind);

        let usage = self.storage.get_usage(user_id, resource, period.start).await?;
        let used = usage.map(|u| u.used).unwrap_or(0);

        Ok(QuotaSnapshot {
            used,
            limit,
            tier_name: tier.name.clone(),
            period,
        })
    }

    #[instrument(skip(self))]
    pub async fn check_rate_limit(
        &self,
        user_id: &str,
        resource: &str,
        algorithm: RateLimitAlgorithm,
        token_bucket: Option<TokenBucketConfig>,
        sliding_window: Option<SlidingWindowConfig>,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        self.rate_limiter
            .allow(RateLimitRequest {
                user_id,
                resource,
                algorithm,
                token_bucket,
                sliding_window,
                now,
            })
            .await
    }

    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> QuotaResult<u64> {
        self.storage.sweep_expired(now).await
    }
}
