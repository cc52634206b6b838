//! Period key calculation.
//!
//! A period key names the scoring interval a result was computed for. It is
//! the ISO date (`YYYY-MM-DD`) of the first day of that interval. All period
//! boundaries fall on **UTC midnight**; nothing in this crate consults a
//! local timezone, so every tier and the generator agree on when a period
//! rolls over.

use chrono::{Datelike, Duration, Months, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::clock::Clock;
use crate::Timestamp;

/// Canonical identifier of a scoring period.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeriodKey(String);

impl PeriodKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_date(date: NaiveDate) -> Self {
        Self(date.format("%Y-%m-%d").to_string())
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeriodKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PeriodKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Length and alignment of a scoring period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodKind {
    /// One calendar day.
    Daily,
    /// Seven days starting on `starts_on`.
    Weekly { starts_on: Weekday },
    /// One calendar month, keyed by its first day.
    Monthly,
}

impl Default for PeriodKind {
    fn default() -> Self {
        Self::Weekly {
            starts_on: Weekday::Mon,
        }
    }
}

impl PeriodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly { .. } => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

/// Error parsing a [`PeriodKind`] name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid period kind: {0}")]
pub struct PeriodKindParseError(pub String);

impl FromStr for PeriodKind {
    type Err = PeriodKindParseError;

    /// Parses `daily`, `weekly` (Monday start) or `monthly`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(Self::Daily),
            "weekly" | "week" => Ok(Self::default()),
            "monthly" | "month" => Ok(Self::Monthly),
            _ => Err(PeriodKindParseError(s.to_string())),
        }
    }
}

/// Derives period keys from wall-clock time.
///
/// Pure and infallible: the same instant always maps to the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PeriodCalculator {
    kind: PeriodKind,
}

impl PeriodCalculator {
    pub fn new(kind: PeriodKind) -> Self {
        Self { kind }
    }

    /// Monday-starting weeks.
    pub fn iso_weekly() -> Self {
        Self::default()
    }

    pub fn kind(&self) -> PeriodKind {
        self.kind
    }

    /// Key of the period containing `now`.
    pub fn period_key(&self, now: Timestamp) -> PeriodKey {
        PeriodKey::from_date(self.start_date(now))
    }

    /// Key of the period containing the clock's current time.
    pub fn current(&self, clock: &dyn Clock) -> PeriodKey {
        self.period_key(clock.now())
    }

    /// Instant at which the period containing `now` began.
    pub fn period_start(&self, now: Timestamp) -> Timestamp {
        self.start_date(now).and_time(NaiveTime::MIN).and_utc()
    }

    /// Instant at which the period containing `now` ends and the next begins.
    ///
    /// `None` only at the end of the representable calendar.
    pub fn next_boundary(&self, now: Timestamp) -> Option<Timestamp> {
        let start = self.start_date(now);
        let next = match self.kind {
            PeriodKind::Daily => start.checked_add_signed(Duration::days(1))?,
            PeriodKind::Weekly { .. } => start.checked_add_signed(Duration::days(7))?,
            PeriodKind::Monthly => start.checked_add_months(Months::new(1))?,
        };
        Some(next.and_time(NaiveTime::MIN).and_utc())
    }

    fn start_date(&self, now: Timestamp) -> NaiveDate {
        let date = now.date_naive();
        match self.kind {
            PeriodKind::Daily => date,
            PeriodKind::Weekly { starts_on } => {
                let offset = (7 + date.weekday().num_days_from_monday()
                    - starts_on.num_days_from_monday())
                    % 7;
                date - Duration::days(i64::from(offset))
            }
            PeriodKind::Monthly => date - Duration::days(i64::from(date.day0())),
        }
    }
}
