// [libs/core/manager/src/config.rs]
//! Manager construction and the configuration-time validation failures.

use std::collections::HashMap;
use std::time::Duration;

use quotaforge_domain_models::{QuotaError, QuotaResult, Tier};

/// Warning callback invoked by the manager after a successful consume
/// crosses a configured threshold. An HTTP adapter is the canonical
/// consumer — it turns these into response headers — but the callback
/// itself has no knowledge of HTTP.
pub type WarningCallback = std::sync::Arc<dyn Fn(WarningEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WarningEvent {
    pub threshold: f64,
    pub used: u64,
    pub limit: u64,
}

/// Immutable once the manager is built. Re-configuration means
/// constructing a new `QuotaManager`, never mutating this struct.
#[derive(Clone)]
pub struct ManagerConfig {
    pub(crate) tiers: HashMap<String, Tier>,
    pub(crate) default_tier: String,
    pub(crate) entitlement_cache_ttl: Duration,
    pub(crate) default_idempotency_ttl: Duration,
    pub(crate) warning_callback: Option<WarningCallback>,
}

pub struct ManagerConfigBuilder {
    tiers: HashMap<String, Tier>,
    default_tier: Option<String>,
    entitlement_cache_ttl: Duration,
    default_idempotency_ttl: Duration,
    warning_callback: Option<WarningCallback>,
}

impl Default for ManagerConfigBuilder {
    fn default() -> Self {
        Self {
            tiers: HashMap::new(),
            default_tier: None,
            entitlement_cache_ttl: Duration::from_secs(30),
            default_idempotency_ttl: Duration::from_secs(24 * 3600),
            warning_callback: None,
        }
    }
}

impl ManagerConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tiers.insert(tier.name.clone(), tier);
        self
    }

    pub fn with_default_tier(mut self, name: impl Into<String>) -> Self {
        self.default_tier = Some(name.into());
        self
    }

    pub fn with_entitlement_cache_ttl(mut self, ttl: Duration) -> Self {
        self.entitlement_cache_ttl = ttl;
        self
    }

    pub fn with_default_idempotency_ttl(mut self, ttl: Duration) -> Self {
        self.default_idempotency_ttl = ttl;
        self
    }

    pub fn with_warning_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(WarningEvent) + Send + Sync + 'static,
    {
        self.warning_callback = Some(std::sync::Arc::new(callback));
        self
    }

    pub fn build(self) -> QuotaResult<ManagerConfig> {
        if self.tiers.is_empty() {
            return Err(QuotaError::Configuration("no tiers configured".into()));
        }

        let default_tier = self
            .default_tier
            .ok_or_else(|| QuotaError::Configuration("no default tier configured".into()))?;

        if !self.tiers.contains_key(&default_tier) {
            return Err(QuotaError::Configuration(format!(
                "default tier '{default_tier}' is not among the registered tiers"
            )));
        }

        for tier in self.tiers.values() {
            for (resource, thresholds) in &tier.warning_thresholds {
                for t in thresholds {
                    if *t <= 0.0 || *t > 1.0 {
                        return Err(QuotaError::Configuration(format!(
                            "tier '{}' resource '{}' has an out-of-range warning threshold {}: must be in (0, 1]",
                            tier.name, resource, t
                        )));
                    }
                }
            }
        }

        Ok(ManagerConfig {
            tiers: self.tiers,
            default_tier,
            entitlement_cache_ttl: self.entitlement_cache_ttl,
            default_idempotency_ttl: self.default_idempotency_ttl,
            warning_callback: self.warning_callback,
        })
    }
}

impl ManagerConfig {
    pub fn builder() -> ManagerConfigBuilder {
        ManagerConfigBuilder::new()
    }

    pub fn tier(&self, name: &str) -> Option<&Tier> {
        self.tiers.get(name)
    }

    pub fn default_tier(&self) -> &Tier {
        self.tiers
            .get(&self.default_tier)
            .expect("default tier was validated to exist at build time")
    }

    pub fn entitlement_cache_ttl(&self) -> Duration {
        self.entitlement_cache_ttl
    }

    pub fn default_idempotency_ttl(&self) -> Duration {
        self.default_idempotency_ttl
    }

    pub fn warning_callback(&self) -> Option<&WarningCallback> {
        self.warning_callback.as_ref()
    }

    /// Warning thresholds configured for `resource` on a given tier. Used
    /// by the warning evaluator, which always knows which tier a user is
    /// on before it checks thresholds.
    pub fn thresholds_for(&self, tier_name: &str, resource: &str) -> Vec<f64> {
        self.tiers
            .get(tier_name)
            .map(|tier| tier.thresholds_for(resource).to_vec())
            .unwrap_or_default()
    }
}
