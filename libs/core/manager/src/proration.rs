// [libs/core/manager/src/proration.rs]
//! Mid-period tier-change limit math. A pure function of four durations
//! and two limits — no storage, no clock reads — so it is the natural
//! target for property-based testing.

use chrono::{DateTime, Utc};

/// `new_limit = floor(old_limit * elapsed/total) + ceil(new_limit * remaining/total)`,
/// then clamped so a downgrade can never drop the limit below what the
/// user has already consumed this period.
pub fn prorate_limit_change(
    period_start: DateTime<Utc>,
    period_end: DateTime<Utc>,
    now: DateTime<Utc>,
    old_limit: u64,
    new_limit: u64,
    already_used: u64,
) -> u64 {
    let total = (period_end - period_start).num_seconds().max(1) as f64;
    let elapsed = (now - period_start).num_seconds().clamp(0, total as i64) as f64;
    let remaining = total - elapsed;

    let old_share = (old_limit as f64 * elapsed / total).floor();
    let new_share = (new_limit as f64 * remaining / total).ceil();

    let prorated = (old_share + new_share) as u64;
    prorated.max(already_used)
}
