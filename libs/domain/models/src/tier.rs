// [libs/domain/models/src/tier.rs]
//! Tier definitions: named bundles of per-resource limits and period policy.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use typeshare::typeshare;

/// The quota periods a tier's limits are expressed over.
#[typeshare]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PeriodKind {
    Daily,
    Monthly,
    Forever,
    Custom,
    /// Request-time pseudo-kind: walk the tier's configured fallback order.
    /// Never persisted — see `Period::kind` which can never hold this variant.
    Auto,
}

impl PeriodKind {
    pub fn is_persistable(self) -> bool {
        !matches!(self, PeriodKind::Auto)
    }
}

/// Per-resource limits for a single `PeriodKind`, keyed by resource name.
pub type ResourceLimitMap = HashMap<String, u64>;

/// A named bundle of per-resource limits and fallback policy.
///
/// Immutable once handed to a `QuotaManager` — changing a tier's shape
/// means registering a new `Tier` under the same name at manager
/// construction time, not mutating this struct in place.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tier {
    pub name: String,

    pub monthly_limits: ResourceLimitMap,
    pub daily_limits: ResourceLimitMap,
    pub forever_limits: ResourceLimitMap,

    /// Search order for `PeriodKind::Auto` consumes. Defaults to
    /// `[monthly, daily, forever]` when empty (see `auto_order`).
    pub auto_fallback_order: Vec<PeriodKind>,

    /// Fractions in `(0, 1]`, per resource, at which the warning engine
    /// emits a threshold-crossing event.
    pub warning_thresholds: HashMap<String, Vec<f64>>,
}

impl Tier {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            monthly_limits: ResourceLimitMap::new(),
            daily_limits: ResourceLimitMap::new(),
            forever_limits: ResourceLimitMap::new(),
            auto_fallback_order: Vec::new(),
            warning_thresholds: HashMap::new(),
        }
    }

    pub fn with_monthly_limit(mut self, resource: impl Into<String>, limit: u64) -> Self {
        self.monthly_limits.insert(resource.into(), limit);
        self
    }

    pub fn with_daily_limit(mut self, resource: impl Into<String>, limit: u64) -> Self {
        self.daily_limits.insert(resource.into(), limit);
        self
    }

    pub fn with_forever_limit(mut self, resource: impl Into<String>, limit: u64) -> Self {
        self.forever_limits.insert(resource.into(), limit);
        self
    }

    pub fn with_warning_thresholds(
        mut self,
        resource: impl Into<String>,
        thresholds: Vec<f64>,
    ) -> Self {
        self.warning_thresholds.insert(resource.into(), thresholds);
        self
    }

    /// Limit map for a given non-auto, non-custom period kind.
    pub fn limit_map(&self, kind: PeriodKind) -> Option<&ResourceLimitMap> {
        match kind {
            PeriodKind::Monthly => Some(&self.monthly_limits),
            PeriodKind::Daily => Some(&self.daily_limits),
            PeriodKind::Forever => Some(&self.forever_limits),
            PeriodKind::Custom | PeriodKind::Auto => None,
        }
    }

    /// Limit configured for `resource` under `kind`. Absent resources
    /// resolve to `0`, which forbids any consumption against them.
    pub fn limit_for(&self, resource: &str, kind: PeriodKind) -> u64 {
        self.limit_map(kind)
            .and_then(|m| m.get(resource))
            .copied()
            .unwrap_or(0)
    }

    /// The order `PeriodKind::Auto` walks for this tier, defaulting to
    /// `monthly -> daily -> forever` when unconfigured.
    pub fn auto_order(&self) -> Vec<PeriodKind> {
        if self.auto_fallback_order.is_empty() {
            vec![PeriodKind::Monthly, PeriodKind::Daily, PeriodKind::Forever]
        } else {
            self.auto_fallback_order.clone()
        }
    }

    pub fn thresholds_for(&self, resource: &str) -> &[f64] {
        self.warning_thresholds
            .get(resource)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}
