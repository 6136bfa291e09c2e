// [libs/domain/models/src/period.rs]
//! Half-open time windows that usage counters are pinned to.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::tier::PeriodKind;

/// The far-future sentinel used as the end of a `forever` period.
pub fn forever_sentinel() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap()
}

/// A half-open instant range `[start, end)` plus the kind that produced it.
///
/// `kind` is never `PeriodKind::Auto` — that variant is a request-time
/// pseudo-kind resolved by the manager before a `Period` is constructed.
#[typeshare]
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Period {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub kind: PeriodKind,
}

impl Period {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>, kind: PeriodKind) -> Self {
        debug_assert!(kind.is_persistable(), "Period::kind must not be Auto");
        Self { start, end, kind }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant < self.end
    }

    pub fn has_rolled_over(&self, now: DateTime<Utc>) -> bool {
        now >= self.end
    }
}
