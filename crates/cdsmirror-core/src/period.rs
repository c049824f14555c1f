//! Half-open calendar date ranges

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Calendar date range `[start, end)`.
///
/// `end` is exclusive, so a single day is `[d, d + 1)` and an empty range
/// has `start >= end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day < self.end
    }

    /// Overlap of two ranges, `None` when they do not intersect.
    pub fn intersect(&self, other: &DateRange) -> Option<DateRange> {
        let r = DateRange {
            start: self.start.max(other.start),
            end: self.end.min(other.end),
        };
        (!r.is_empty()).then_some(r)
    }

    /// Last day inside the range (inclusive).
    pub fn last_day(&self) -> Option<NaiveDate> {
        if self.is_empty() {
            None
        } else {
            self.end.pred_opt()
        }
    }

    /// Every day in the range, oldest first.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d < end)
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn empty_when_start_not_before_end() {
        assert!(DateRange::new(d(2025, 8, 4), d(2025, 8, 4)).is_empty());
        assert!(DateRange::new(d(2025, 8, 5), d(2025, 8, 4)).is_empty());
        assert!(!DateRange::new(d(2025, 8, 3), d(2025, 8, 4)).is_empty());
    }

    #[test]
    fn end_is_exclusive() {
        let r = DateRange::new(d(2025, 8, 1), d(2025, 8, 4));
        assert!(r.contains(d(2025, 8, 1)));
        assert!(r.contains(d(2025, 8, 3)));
        assert!(!r.contains(d(2025, 8, 4)));
        assert_eq!(r.last_day(), Some(d(2025, 8, 3)));
        assert_eq!(r.days().count(), 3);
    }

    #[test]
    fn days_iterates_in_order() {
        let r = DateRange::new(d(2024, 2, 27), d(2024, 3, 2));
        let days: Vec<_> = r.days().collect();
        assert_eq!(
            days,
            vec![d(2024, 2, 27), d(2024, 2, 28), d(2024, 2, 29), d(2024, 3, 1)]
        );
    }

    #[test]
    fn intersect_overlapping_and_disjoint() {
        let a = DateRange::new(d(2025, 1, 1), d(2025, 2, 1));
        let b = DateRange::new(d(2025, 1, 15), d(2025, 3, 1));
        assert_eq!(
            a.intersect(&b),
            Some(DateRange::new(d(2025, 1, 15), d(2025, 2, 1)))
        );

        let c = DateRange::new(d(2025, 2, 1), d(2025, 3, 1));
        assert_eq!(a.intersect(&c), None);
    }

    #[test]
    fn display_shows_half_open() {
        let r = DateRange::new(d(2025, 8, 1), d(2025, 8, 4));
        assert_eq!(r.to_string(), "[2025-08-01, 2025-08-04)");
    }
}
