// [libs/core/manager/src/period_calculator.rs]
//! Deterministic `[start, end)` windows for a given instant.
//!
//! Two callers computing the same period for the same instant must agree
//! bit-for-bit; every function here is a pure function of its inputs,
//! never reading wall-clock time itself.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use quotaforge_domain_models::{forever_sentinel, Entitlement, Period, PeriodKind, QuotaError, QuotaResult};

/// `[00:00 UTC today, 00:00 UTC tomorrow)`.
pub fn daily_period(now: DateTime<Utc>) -> Period {
    let start = Utc
        .with_ymd_and_hms(now.year(), now.month(), now.day(), 0, 0, 0)
        .unwrap();
    Period::new(start, start + Duration::days(1), PeriodKind::Daily)
}

/// `[first-of-month UTC, first-of-next-month UTC)` or, when the
/// entitlement carries a `subscription_start_date`, the billing-
/// anniversary window containing `now`.
pub fn monthly_period(now: DateTime<Utc>, entitlement: &Entitlement) -> Period {
    match entitlement.subscription_start_date {
        Some(anchor) => anniversary_period(now, anchor),
        None => calendar_month_period(now),
    }
}

fn calendar_month_period(now: DateTime<Utc>) -> Period {
    let start = Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0).unwrap();
    let end = add_one_month(start, start.day());
    Period::new(start, end, PeriodKind::Monthly)
}

/// Billing-anniversary window containing `now`, anchored to `anchor`'s
/// day-of-month. Day-of-month overflow (e.g. anchor day 31 landing in a
/// 30-day month) clamps to the last day of that month.
fn anniversary_period(now: DateTime<Utc>, anchor: NaiveDate) -> Period {
    let anchor_day = anchor.day();

    // Candidate anniversary in the month of `now`.
    let this_month_start = clamped_ymd(now.year(), now.month(), anchor_day);

    let (start, end) = if now >= this_month_start {
        (this_month_start, add_one_month(this_month_start, anchor_day))
    } else {
        let (prev_year, prev_month) = previous_month(now.year(), now.month());
        let prev_start = clamped_ymd(prev_year, prev_month, anchor_day);
        (prev_start, this_month_start)
    };

    Period::new(start, end, PeriodKind::Monthly)
}

fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

fn next_month(year: i32, month: u32) -> (i32, u32) {
    if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    }
}

/// `day` clamped to the last valid day of `(year, month)`.
fn clamped_ymd(year: i32, month: u32, day: u32) -> DateTime<Utc> {
    let last_day = days_in_month(year, month);
    Utc.with_ymd_and_hms(year, month, day.min(last_day), 0, 0, 0).unwrap()
}

fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = next_month(year, month);
    let first_of_next = NaiveDate::from_ymd_opt(next_year, next_month, 1).unwrap();
    let first_of_this = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
    (first_of_next - first_of_this).num_days() as u32
}

fn add_one_month(from: DateTime<Utc>, anchor_day: u32) -> DateTime<Utc> {
    let (year, month) = next_month(from.year(), from.month());
    clamped_ymd(year, month, anchor_day)
}

/// A single canonical `[floor, 9999-12-31T23:59:59Z)` window per resource.
pub fn forever_period() -> Period {
    Period::new(Utc.with_ymd_and_hms(1970, 1, 1, 0, 0, 0).unwrap(), forever_sentinel(), PeriodKind::Forever)
}

/// Caller-supplied endpoints; validated for monotonicity.
pub fn custom_period(start: DateTime<Utc>, end: DateTime<Utc>) -> QuotaResult<Period> {
    if start >= end {
        return Err(QuotaError::InvalidPeriod(format!(
            "custom period start {start} must be strictly before end {end}"
        )));
    }
    Ok(Period::new(start, end, PeriodKind::Custom))
}

/// Dispatch for any non-`Auto` period kind. `Auto` has no single period —
/// it is resolved by walking the tier's fallback order in the manager.
pub fn resolve_period(
    kind: PeriodKind,
    now: DateTime<Utc>,
    entitlement: &Entitlement,
    custom_bounds: Option<(DateTime<Utc>, DateTime<Utc>)>,
) -> QuotaResult<Period> {
    match kind {
        PeriodKind::Daily => Ok(daily_period(now)),
        PeriodKind::Monthly => Ok(monthly_period(now, entitlement)),
        PeriodKind::Forever => Ok(forever_period()),
        PeriodKind::Custom => {
            let (start, end) = custom_bounds
                .ok_or_else(|| QuotaError::InvalidPeriod("custom period requires explicit bounds".into()))?;
            custom_period(start, end)
        }
        PeriodKind::Auto => Err(QuotaError::InvalidPeriod(
            "auto is a request-time pseudo-kind and cannot be resolved directly".into(),
        )),
    }
}
