//! Effective windows and the clamp resolver
//!
//! The nominal window comes from `years` (or the defaults) and "now minus
//! embargo". The clamp then raises the lower bound to `min_date`, which is
//! how a daily live-update dataset is told to start after a monthly
//! backfill of the same archive.

use std::fmt;

use cdsmirror_core::DateRange;
use chrono::{Datelike, Days, NaiveDate};

use crate::dataset::DatasetSpec;

/// The `[effective_min, effective_max)` range a run may enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EffectiveWindow {
    /// Window before `min_date` was applied
    pub nominal: DateRange,
    pub range: DateRange,
}

impl EffectiveWindow {
    /// Whether `min_date` moved the lower bound.
    pub fn clamped(&self) -> bool {
        self.range.start != self.nominal.start
    }

    /// `min_date` at or past the upper bound: valid, just nothing to do.
    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

impl fmt::Display for EffectiveWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.range)?;
        if self.clamped() {
            write!(f, " (clamped from {})", self.nominal.start)?;
        }
        Ok(())
    }
}

fn jan_first(year: i32) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(year, 1, 1)
}

/// Exclusive upper bound: `now - embargo`, capped at the end of the last
/// explicit year.
pub fn effective_max(spec: &DatasetSpec, now: NaiveDate) -> NaiveDate {
    let live_edge = now
        .checked_sub_days(Days::new(u64::from(spec.embargo_days)))
        .unwrap_or(NaiveDate::MIN);
    let last_year_end = spec
        .years
        .as_ref()
        .and_then(|ys| ys.last())
        .and_then(|y| jan_first(y + 1));
    match last_year_end {
        Some(end) => end.min(live_edge),
        None => live_edge,
    }
}

/// Lower bound before clamping.
///
/// Jan 1 of the first explicit year; else `min_date`; else Jan 1 of the
/// configured default year; else Jan 1 of the current year.
pub fn nominal_start(spec: &DatasetSpec, now: NaiveDate) -> NaiveDate {
    if let Some(start) = spec.years.as_ref().and_then(|ys| ys.first()).and_then(|y| jan_first(*y)) {
        return start;
    }
    if let Some(min_date) = spec.min_date {
        return min_date;
    }
    spec.default_start_year
        .and_then(jan_first)
        .or_else(|| jan_first(now.year()))
        .unwrap_or(now)
}

/// Applies a dataset's `min_date` to its nominal window.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClampResolver {
    min_date: Option<NaiveDate>,
}

impl ClampResolver {
    pub fn new(min_date: Option<NaiveDate>) -> Self {
        Self { min_date }
    }

    pub fn for_dataset(spec: &DatasetSpec) -> Self {
        Self::new(spec.min_date)
    }

    /// `effective_min = max(window.start, min_date)`; the upper bound is
    /// untouched. Inclusive of `min_date` itself.
    pub fn clamp(&self, window: DateRange) -> DateRange {
        match self.min_date {
            Some(min) => DateRange::new(window.start.max(min), window.end),
            None => window,
        }
    }
}

/// Effective window of `spec` for a run whose clock reads `now`.
pub fn effective_window(spec: &DatasetSpec, now: NaiveDate) -> EffectiveWindow {
    let nominal = DateRange::new(nominal_start(spec, now), effective_max(spec, now));
    EffectiveWindow {
        nominal,
        range: ClampResolver::for_dataset(spec).clamp(nominal),
    }
}

/// Two datasets of the same archive whose windows cover the same days.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingOverlap {
    /// Coarser dataset id
    pub coarse: String,
    /// Finer (or equally fine) dataset id
    pub fine: String,
    pub overlap: DateRange,
}

impl fmt::Display for SiblingOverlap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "datasets '{}' and '{}' share a namespace and both cover {}; \
             set '{}'.min_date after {}",
            self.coarse,
            self.fine,
            self.overlap,
            self.fine,
            self.overlap.last_day().unwrap_or(self.overlap.start),
        )
    }
}

/// Find sibling datasets (same `name`) whose effective windows overlap.
///
/// Configuration stays authoritative: callers warn, nothing is clamped.
pub fn sibling_overlaps(specs: &[DatasetSpec], now: NaiveDate) -> Vec<SiblingOverlap> {
    let mut found = Vec::new();
    for (i, a) in specs.iter().enumerate() {
        for b in &specs[i + 1..] {
            if a.name != b.name {
                continue;
            }
            let (coarse, fine) = if a.granularity <= b.granularity { (a, b) } else { (b, a) };
            let cw = effective_window(coarse, now).range;
            let fw = effective_window(fine, now).range;
            if let Some(overlap) = cw.intersect(&fw) {
                found.push(SiblingOverlap {
                    coarse: coarse.id.clone(),
                    fine: fine.id.clone(),
                    overlap,
                });
            }
        }
    }
    found
}
