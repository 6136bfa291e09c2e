// [libs/core/manager/src/warning.rs]
//! Threshold-crossing notification: fires the configured callback the
//! first time a consumption pushes `used/limit` at or past a configured
//! fraction. Crossing is edge-triggered — the caller passes the
//! pre-consumption `used` so we only fire on the transition, not on
//! every call while already above a threshold. Thresholds fire in
//! ascending order regardless of how the tier declared them.

use quotaforge_domain_models::QuotaError;
use tracing::debug;

use crate::config::{ManagerConfig, WarningEvent};

pub fn evaluate_and_fire(
    config: &ManagerConfig,
    tier_name: &str,
    resource: &str,
    used_before: u64,
    used_after: u64,
    limit: u64,
) {
    if limit == 0 {
        return;
    }
    let Some(callback) = config.warning_callback() else {
        return;
    };
    let mut thresholds = config.thresholds_for(tier_name, resource);
    if thresholds.is_empty() {
        return;
    }
    thresholds.sort_by(|a, b| a.total_cmp(b));

    let before_fraction = used_before as f64 / limit as f64;
    let after_fraction = used_after as f64 / limit as f64;

    for threshold in thresholds {
        if before_fraction < threshold && after_fraction >= threshold {
            debug!(resource, threshold, used = used_after, limit, "crossing a warning threshold");
            callback(WarningEvent {
                threshold,
                used: used_after,
                limit,
            });
        }
    }
}

pub fn validate_thresholds(thresholds: &[f64]) -> Result<(), QuotaError> {
    for t in thresholds {
        if !(*t > 0.0 && *t <= 1.0) {
            return Err(QuotaError::Configuration(format!(
                "warning threshold {t} must be in (0, 1]"
            )));
        }
    }
    Ok(())
}
