//! Property-Based Tests for Period Key Calculation
//!
//! **Property 1: Period Containment**
//!
//! For any instant, the period it maps to SHALL start at or before the
//! instant, at UTC midnight, and end strictly after it.
//!
//! **Property 2: Key Stability Within a Period**
//!
//! Every instant between a period's start and its next boundary SHALL map to
//! the same key, and the boundary itself SHALL map to a different one.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc, Weekday};
use proptest::prelude::*;
use tally_core::{PeriodCalculator, PeriodKind};

// ============================================================================
// PROPERTY TEST STRATEGIES
// ============================================================================

/// Instants between 2000-01-01 and 2100-01-01.
fn instant_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    (946_684_800i64..4_102_444_800i64).prop_map(|secs| {
        Utc.timestamp_opt(secs, 0)
            .single()
            .expect("in-range timestamp")
    })
}

fn weekday_strategy() -> impl Strategy<Value = Weekday> {
    prop_oneof![
        Just(Weekday::Mon),
        Just(Weekday::Tue),
        Just(Weekday::Wed),
        Just(Weekday::Thu),
        Just(Weekday::Fri),
        Just(Weekday::Sat),
        Just(Weekday::Sun),
    ]
}

fn kind_strategy() -> impl Strategy<Value = PeriodKind> {
    prop_oneof![
        Just(PeriodKind::Daily),
        weekday_strategy().prop_map(|starts_on| PeriodKind::Weekly { starts_on }),
        Just(PeriodKind::Monthly),
    ]
}

// ============================================================================
// PROPERTIES
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// Property 1: the instant lies inside [start, next_boundary).
    #[test]
    fn prop_period_contains_instant(now in instant_strategy(), kind in kind_strategy()) {
        let calc = PeriodCalculator::new(kind);
        let start = calc.period_start(now);
        let next = calc.next_boundary(now).expect("boundary within calendar");

        prop_assert!(start <= now);
        prop_assert!(now < next);
        prop_assert_eq!(start.num_seconds_from_midnight(), 0);
        let key = calc.period_key(now);
        prop_assert_eq!(key.as_str(), start.format("%Y-%m-%d").to_string());
    }

    /// Weekly periods always start on the configured weekday and span 7 days.
    #[test]
    fn prop_weekly_start_weekday(now in instant_strategy(), starts_on in weekday_strategy()) {
        let calc = PeriodCalculator::new(PeriodKind::Weekly { starts_on });
        let start = calc.period_start(now);
        prop_assert_eq!(start.weekday(), starts_on);
        prop_assert!(now - start < Duration::days(7));
    }

    /// Property 2: start, last second, and boundary behave as expected.
    #[test]
    fn prop_key_stable_until_boundary(now in instant_strategy(), kind in kind_strategy()) {
        let calc = PeriodCalculator::new(kind);
        let key = calc.period_key(now);
        let start = calc.period_start(now);
        let next = calc.next_boundary(now).expect("boundary within calendar");

        prop_assert_eq!(&calc.period_key(start), &key);
        prop_assert_eq!(&calc.period_key(next - Duration::seconds(1)), &key);
        prop_assert_ne!(&calc.period_key(next), &key);
    }

    /// Keys sort in period order, since they are ISO dates.
    #[test]
    fn prop_keys_are_monotonic(
        a in instant_strategy(),
        b in instant_strategy(),
        kind in kind_strategy(),
    ) {
        let calc = PeriodCalculator::new(kind);
        let (early, late) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(calc.period_key(early) <= calc.period_key(late));
    }
}
