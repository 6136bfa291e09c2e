use chrono::{Duration, NaiveDate, TimeZone, Utc};
use quotaforge_domain_models::{Period, PeriodKind, Entitlement, Tier};

#[test]
fn an_entitlement_with_no_expiry_never_expires() {
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
    let entitlement = Entitlement::new("u1", "pro", now);
    assert!(!entitlement.is_expired(now + Duration::days(365 * 10)));
}

#[test]
fn subscription_start_date_round_trips_through_the_builder() {
    let now = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
    let anchor = NaiveDate::from_ymd_opt(2026, 3, 15).unwrap();
    let entitlement = Entitlement::new("u1", "pro", now).with_subscription_start(anchor);
    assert_eq!(entitlement.subscription_start_date, Some(anchor));
}

#[test]
fn a_strictly_newer_update_replaces_an_older_one() {
    let older = Entitlement::new("u1", "free", Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap());
    let newer = Entitlement::new("u1", "pro", Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
    assert!(newer.is_newer_than(&older));
    assert!(!older.is_newer_than(&newer));
}

#[test]
fn tier_limit_resolution_falls_back_to_zero_for_an_unconfigured_resource() {
    let tier = Tier::new("pro").with_monthly_limit("api_calls", 10_000);
    assert_eq!(tier.limit_for("webhooks", PeriodKind::Monthly), 0);
    assert_eq!(tier.limit_for("api_calls", PeriodKind::Monthly), 10_000);
}

#[test]
fn tier_auto_order_defaults_to_monthly_then_daily_then_forever() {
    let tier = Tier::new("free");
    assert_eq!(
        tier.auto_order(),
        vec![PeriodKind::Monthly, PeriodKind::Daily, PeriodKind::Forever]
    );
}

#[test]
fn a_custom_period_reports_containment_correctly() {
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let end = start + Duration::days(7);
    let period = Period::new(start, end, PeriodKind::Custom);

    assert!(period.contains(start));
    assert!(period.contains(start + Duration::days(3)));
    assert!(!period.contains(end), "the end instant is exclusive");
}
