// [libs/core/manager/src/limit_resolver.rs]
//! Resolves `(tier, resource, period_kind) -> limit`.
//!
//! A top-up raises the `limit` column of the *current* usage record only;
//! it never mutates the tier's configured limit, so this resolver always
//! reflects the tier's static configuration, not any in-flight top-up.

use quotaforge_domain_models::{PeriodKind, Tier};

pub fn resolve_limit(tier: &Tier, resource: &str, kind: PeriodKind) -> u64 {
    tier.limit_for(resource, kind)
}
