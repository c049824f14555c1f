//! Partition keys and the partition enumerator

use std::collections::BTreeSet;

use cdsmirror_core::DateRange;
use chrono::{Datelike, NaiveDate};

use crate::granularity::Granularity;

/// One independently fetchable unit of a dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Partition {
    /// `{name}/{YYYY}`, `{name}/{YYYY-MM}` or `{name}/{YYYY-MM-DD}`
    pub key: String,
    pub granularity: Granularity,
    /// Full calendar period (year, month or day)
    pub period: DateRange,
    /// Part of `period` inside the effective window
    pub range: DateRange,
}

impl Partition {
    pub fn year(&self) -> i32 {
        self.period.start.year()
    }

    /// Whether the window ends inside this period, so the archive has not
    /// published all of it yet. A start clipped by `min_date` is final and
    /// does not count.
    pub fn is_partial(&self) -> bool {
        self.range.end < self.period.end
    }
}

pub fn partition_key(name: &str, granularity: Granularity, start: NaiveDate) -> String {
    format!("{name}/{}", granularity.key_suffix(start))
}

/// Calendar restrictions applied during enumeration.
///
/// `years` comes from the dataset's explicit year list; `months` and
/// `days` from the request template. `None` admits everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CalendarFilter {
    pub years: Option<BTreeSet<i32>>,
    pub months: Option<BTreeSet<u32>>,
    pub days: Option<BTreeSet<u32>>,
}

impl CalendarFilter {
    /// Does the period of `granularity` starting at `start` qualify?
    ///
    /// Month and day lists only restrict granularities fine enough to be
    /// split by them; a yearly partition carries them in its request.
    pub fn admits(&self, granularity: Granularity, start: NaiveDate) -> bool {
        let year_ok = self.years.as_ref().map_or(true, |ys| ys.contains(&start.year()));
        let month_ok = granularity == Granularity::Yearly
            || self.months.as_ref().map_or(true, |ms| ms.contains(&start.month()));
        let day_ok = granularity != Granularity::Daily
            || self.days.as_ref().map_or(true, |ds| ds.contains(&start.day()));
        year_ok && month_ok && day_ok
    }
}

/// Lazy, chronologically ordered partitions of `granularity` covering `window`.
///
/// Pure function of its inputs: calling it again restarts from the
/// beginning. An empty window yields nothing.
pub fn enumerate<'a>(
    name: &'a str,
    granularity: Granularity,
    window: DateRange,
    filter: &'a CalendarFilter,
) -> impl Iterator<Item = Partition> + 'a {
    let first = if window.is_empty() {
        None
    } else {
        granularity.floor(window.start)
    };
    std::iter::successors(first, move |start| granularity.next(*start))
        .take_while(move |start| *start < window.end)
        .filter(move |start| filter.admits(granularity, *start))
        .filter_map(move |start| {
            let period = DateRange::new(start, granularity.next(start)?);
            let range = period.intersect(&window)?;
            Some(Partition {
                key: partition_key(name, granularity, start),
                granularity,
                period,
                range,
            })
        })
}
