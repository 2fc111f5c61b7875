//! Half-open UTC date ranges used to partition derived facts.

use std::fmt;

use chrono::{DateTime, Days, Duration, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, ValidationErrorCode};

/// A `[start, end)` range of UTC calendar dates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    /// Creates a range, rejecting empty or inverted bounds.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if end <= start {
            return Err(Error::validation(
                ValidationErrorCode::InvalidFormat,
                format!("range end {} must be after start {}", end, start),
            ));
        }
        Ok(Self { start, end })
    }

    /// A single-day range.
    pub fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date.succ_opt().unwrap_or(NaiveDate::MAX),
        }
    }

    /// `[today - days, today + 1)`: today plus the `days` before it.
    pub fn trailing(today: NaiveDate, days: u32) -> Self {
        let start = today
            .checked_sub_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self {
            start,
            end: today.succ_opt().unwrap_or(NaiveDate::MAX),
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date < self.end
    }

    pub fn contains_time(&self, time: DateTime<Utc>) -> bool {
        self.contains(time.date_naive())
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Whether `other` lies entirely within this range.
    pub fn covers(&self, other: &DateRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Midnight UTC at the start of the range.
    pub fn start_time(&self) -> DateTime<Utc> {
        self.start.and_time(NaiveTime::MIN).and_utc()
    }

    /// Earliest instant read when looking back `lookback` from the start.
    ///
    /// Saturates at the earliest representable time.
    pub fn touch_start(&self, lookback: Duration) -> DateTime<Utc> {
        self.start_time()
            .checked_sub_signed(lookback)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Midnight UTC at the (exclusive) end of the range.
    pub fn end_time(&self) -> DateTime<Utc> {
        self.end.and_time(NaiveTime::MIN).and_utc()
    }

    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Every date in the range, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d < end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn test_rejects_empty_range() {
        assert!(DateRange::new(date("2025-01-02"), date("2025-01-02")).is_err());
        assert!(DateRange::new(date("2025-01-03"), date("2025-01-02")).is_err());
    }

    #[test]
    fn test_overlap_is_half_open() {
        let a = DateRange::new(date("2025-01-01"), date("2025-01-03")).unwrap();
        let b = DateRange::new(date("2025-01-03"), date("2025-01-05")).unwrap();
        let c = DateRange::new(date("2025-01-02"), date("2025-01-04")).unwrap();
        assert!(!a.overlaps(&b));
        assert!(a.overlaps(&c));
        assert!(c.overlaps(&b));
    }

    #[test]
    fn test_trailing_includes_today() {
        let r = DateRange::trailing(date("2025-01-10"), 7);
        assert_eq!(r.start, date("2025-01-03"));
        assert_eq!(r.end, date("2025-01-11"));
        assert_eq!(r.num_days(), 8);
        assert_eq!(r.days().count(), 8);
        assert!(r.contains(date("2025-01-10")));
        assert!(!r.contains(date("2025-01-11")));
    }

    #[test]
    fn test_trailing_one_day_revisits_yesterday() {
        let r = DateRange::trailing(date("2025-01-10"), 1);
        assert_eq!(r.start, date("2025-01-09"));
        assert!(r.contains(date("2025-01-09")));
        assert!(r.contains(date("2025-01-10")));
    }

    #[test]
    fn test_touch_start_saturates() {
        let r = DateRange::day(NaiveDate::MIN);
        assert_eq!(r.touch_start(Duration::days(7)), DateTime::<Utc>::MIN_UTC);
        let r = DateRange::day(date("2025-01-10"));
        assert_eq!(r.touch_start(Duration::days(1)), r.start_time() - Duration::days(1));
    }

    #[test]
    fn test_covers() {
        let week = DateRange::trailing(date("2025-01-10"), 7);
        assert!(week.covers(&DateRange::day(date("2025-01-05"))));
        assert!(!week.covers(&DateRange::day(date("2025-01-11"))));
    }
}
