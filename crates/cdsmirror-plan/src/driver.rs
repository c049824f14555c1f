//! Dataset driver: plan then execute, one dataset after another
//!
//! A dataset-level failure (storage unreachable, corrupt marker) is
//! recorded in that dataset's report and the driver moves on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use cdsmirror_core::{Fetcher, ProgressContext};
use cdsmirror_store::{Storage, StorageError};
use chrono::NaiveDate;

use crate::clamp::{EffectiveWindow, sibling_overlaps};
use crate::dataset::DatasetSpec;
use crate::executor::{ClaimSet, Executor, ExecutorOptions, Outcome};
use crate::planner::plan;

/// Supplies per-dataset collaborators.
pub trait Backends {
    fn storage(&self, spec: &DatasetSpec) -> Result<Box<dyn Storage>, StorageError>;
    fn fetcher(&self, spec: &DatasetSpec) -> Box<dyn Fetcher>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetStatus {
    /// Everything planned is now stored
    Complete,
    /// Dry run: planned, nothing fetched
    Planned,
    /// Some partitions failed permanently
    Failed,
    /// Some partitions left for a later run (not published yet)
    Deferred,
    Cancelled,
    /// Planning or storage failed for the whole dataset
    Error,
}

impl DatasetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Planned => "planned",
            Self::Failed => "failed",
            Self::Deferred => "deferred",
            Self::Cancelled => "cancelled",
            Self::Error => "error",
        }
    }
}

/// What happened to one dataset during a run.
#[derive(Debug, Clone)]
pub struct DatasetReport {
    pub id: String,
    pub name: String,
    pub window: Option<EffectiveWindow>,
    /// Missing partitions found by the planner
    pub planned: usize,
    /// Candidates the planner found already present
    pub present: usize,
    pub missing: Vec<String>,
    pub outcome: Outcome,
    /// Dataset-level failure
    pub error: Option<String>,
    pub dry_run: bool,
    pub elapsed: Duration,
}

impl DatasetReport {
    fn new(spec: &DatasetSpec, dry_run: bool) -> Self {
        Self {
            id: spec.id.clone(),
            name: spec.name.clone(),
            window: None,
            planned: 0,
            present: 0,
            missing: Vec::new(),
            outcome: Outcome::default(),
            error: None,
            dry_run,
            elapsed: Duration::ZERO,
        }
    }

    pub fn status(&self) -> DatasetStatus {
        if self.error.is_some() {
            DatasetStatus::Error
        } else if !self.outcome.failed.is_empty() {
            DatasetStatus::Failed
        } else if self.outcome.cancelled > 0 {
            DatasetStatus::Cancelled
        } else if self.outcome.deferred > 0 {
            DatasetStatus::Deferred
        } else if self.dry_run {
            DatasetStatus::Planned
        } else {
            DatasetStatus::Complete
        }
    }

    /// Counts toward a non-zero exit status.
    pub fn is_failure(&self) -> bool {
        matches!(self.status(), DatasetStatus::Error | DatasetStatus::Failed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub datasets: Vec<DatasetReport>,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn has_failures(&self) -> bool {
        self.datasets.iter().any(DatasetReport::is_failure)
    }

    pub fn fetched(&self) -> usize {
        self.datasets.iter().map(|d| d.outcome.fetched).sum()
    }

    pub fn failed(&self) -> usize {
        self.datasets.iter().map(|d| d.outcome.failed.len()).sum()
    }

    pub fn bytes(&self) -> u64 {
        self.datasets.iter().map(|d| d.outcome.bytes).sum()
    }

    pub fn log(&self) {
        log::info!("=== Run Summary ===");
        for d in &self.datasets {
            log::info!(
                "{}: {} ({} planned, {} fetched, {} present, {} failed, {} deferred, {} cancelled)",
                d.id,
                d.status().as_str(),
                d.planned,
                d.outcome.fetched,
                d.present + d.outcome.already_present,
                d.outcome.failed.len(),
                d.outcome.deferred,
                d.outcome.cancelled
            );
        }
        log::info!("Time: {:.1}s", self.elapsed.as_secs_f64());
    }
}

/// Runs every selected dataset with one clock snapshot and one claim set.
pub struct Driver<'a> {
    now: NaiveDate,
    options: ExecutorOptions,
    dry_run: bool,
    progress: &'a ProgressContext,
    cancel: &'a AtomicBool,
    claims: ClaimSet,
}

impl<'a> Driver<'a> {
    pub fn new(
        now: NaiveDate,
        options: ExecutorOptions,
        progress: &'a ProgressContext,
        cancel: &'a AtomicBool,
    ) -> Self {
        Self {
            now,
            options,
            dry_run: false,
            progress,
            cancel,
            claims: ClaimSet::new(),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn now(&self) -> NaiveDate {
        self.now
    }

    pub fn run(&self, specs: &[DatasetSpec], backends: &dyn Backends) -> RunSummary {
        let started = Instant::now();
        for overlap in sibling_overlaps(specs, self.now) {
            log::warn!("{overlap}");
        }

        let mut summary = RunSummary::default();
        for spec in specs {
            if self.cancel.load(Ordering::Relaxed) {
                log::warn!("shutdown requested, skipping {}", spec.id);
                summary.interrupted = true;
                continue;
            }
            let report = match backends.storage(spec) {
                Ok(storage) => {
                    let fetcher = backends.fetcher(spec);
                    self.run_dataset(spec, storage.as_ref(), fetcher.as_ref())
                }
                Err(e) => {
                    log::error!("{}: cannot open storage {}: {e}", spec.id, spec.storage.describe());
                    let mut r = DatasetReport::new(spec, self.dry_run);
                    r.error = Some(e.to_string());
                    r
                }
            };
            summary.datasets.push(report);
        }
        summary.interrupted |= self.cancel.load(Ordering::Relaxed);
        summary.elapsed = started.elapsed();
        summary
    }

    /// Plan one dataset and, unless dry-running, execute the plan.
    pub fn run_dataset(
        &self,
        spec: &DatasetSpec,
        storage: &dyn Storage,
        fetcher: &dyn Fetcher,
    ) -> DatasetReport {
        let started = Instant::now();
        let mut report = DatasetReport::new(spec, self.dry_run);
        log::info!("{}: checking {} in {}", spec.id, spec.name, storage.describe());

        if !self.dry_run {
            match storage.cleanup_staging() {
                Ok(0) => {}
                Ok(n) => log::info!("{}: removed {n} stale staging file(s)", spec.id),
                Err(e) => log::warn!("{}: staging cleanup failed: {e}", spec.id),
            }
        }

        let plan = match plan(spec, storage, self.now) {
            Ok(p) => p,
            Err(e) => {
                log::error!("{}: planning aborted: {e}", spec.id);
                report.error = Some(e.to_string());
                report.elapsed = started.elapsed();
                return report;
            }
        };
        report.window = Some(plan.window);
        report.planned = plan.missing.len();
        report.present = plan.present;
        report.missing = plan.missing.iter().map(|p| p.key.clone()).collect();

        if !self.dry_run && !plan.is_empty() {
            let executor = Executor::new(
                spec,
                fetcher,
                storage,
                &self.claims,
                self.progress,
                self.cancel,
                self.options,
            );
            report.outcome = executor.run(plan.missing);
        }
        report.elapsed = started.elapsed();
        report
    }
}
