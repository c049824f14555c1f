//! Fetch executor: drive the fetch capability over a plan
//!
//! Each partition is fetched, streamed through the storage backend (which
//! writes the marker last) and counted. Failures stay contained to their
//! partition; only "not available yet" stops the remaining work, since
//! later periods cannot be published either.

use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use cdsmirror_core::{
    FetchError, FetchRequest, Fetcher, ProgressContext, Retryable, RetryPolicy, WorkQueue,
    retry_with_backoff,
};
use cdsmirror_store::{ArtifactWrite, Committed, Storage, StorageError, artifact_extension};
use indicatif::ProgressBar;
use rustc_hash::FxHashMap;
use serde_json::Value;

use crate::dataset::DatasetSpec;
use crate::partition::Partition;

/// Failure of one partition attempt.
#[derive(Debug)]
pub enum PartitionError {
    Fetch(FetchError),
    Storage(StorageError),
}

impl From<FetchError> for PartitionError {
    fn from(e: FetchError) -> Self {
        Self::Fetch(e)
    }
}

impl From<StorageError> for PartitionError {
    /// A broken payload stream is the download's fault, not the backend's.
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Payload(io) => Self::Fetch(FetchError::from_io(&io)),
            other => Self::Storage(other),
        }
    }
}

impl fmt::Display for PartitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch(e) => write!(f, "{e}"),
            Self::Storage(e) => write!(f, "storage: {e}"),
        }
    }
}

impl std::error::Error for PartitionError {}

impl Retryable for PartitionError {
    fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(e) => e.is_retryable(),
            Self::Storage(StorageError::Backend(_)) => true,
            Self::Storage(_) => false,
        }
    }
}

impl PartitionError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Fetch(e) if e.is_unavailable())
    }
}

/// What became of a key claimed earlier in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    InFlight,
    /// Marker written
    Stored,
    /// Artifact written for a period that is still growing, no marker
    Partial,
}

/// Keys claimed during the current run.
///
/// Shared by every dataset of a run, so two definitions that map to the
/// same key never fetch it twice. Keys whose fetch did not end in a stored
/// artifact are released, so a later dataset tries them again.
#[derive(Debug, Default)]
pub struct ClaimSet {
    keys: Mutex<FxHashMap<String, Claim>>,
}

impl ClaimSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key`. Returns `None` if it was free, otherwise its state.
    pub fn claim(&self, key: &str) -> Option<Claim> {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(claim) = keys.get(key) {
            return Some(*claim);
        }
        keys.insert(key.to_string(), Claim::InFlight);
        None
    }

    pub fn settle(&self, key: &str, claim: Claim) {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        keys.insert(key.to_string(), claim);
    }

    pub fn release(&self, key: &str) {
        let mut keys = self.keys.lock().unwrap_or_else(|e| e.into_inner());
        keys.remove(key);
    }

    pub fn len(&self) -> usize {
        self.keys.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A partition that ended in a non-retryable or exhausted failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedPartition {
    pub key: String,
    pub error: String,
}

/// Aggregate result of executing one plan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    pub fetched: usize,
    /// Marker appeared before the write, or key claimed earlier in the run
    pub already_present: usize,
    pub failed: Vec<FailedPartition>,
    /// Left for a later run: the archive reported data not available yet,
    /// or the period is still growing and was stored without a marker
    pub deferred: usize,
    /// Not started because of a shutdown request
    pub cancelled: usize,
    pub bytes: u64,
}

impl Outcome {
    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }

}

#[derive(Debug, Clone, Copy)]
pub struct ExecutorOptions {
    /// Worker threads per dataset; 1 processes partitions in order
    pub workers: usize,
    pub retry: RetryPolicy,
}

impl Default for ExecutorOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            retry: RetryPolicy::default(),
        }
    }
}

/// Runs one dataset's plan against a fetcher and a storage backend.
pub struct Executor<'a> {
    spec: &'a DatasetSpec,
    fetcher: &'a dyn Fetcher,
    storage: &'a dyn Storage,
    claims: &'a ClaimSet,
    progress: &'a ProgressContext,
    cancel: &'a AtomicBool,
    options: ExecutorOptions,
}

fn record(tally: &Mutex<Outcome>, f: impl FnOnce(&mut Outcome)) {
    let mut guard = tally.lock().unwrap_or_else(|e| e.into_inner());
    f(&mut *guard);
}

enum Finished {
    Committed(Committed),
    Unavailable,
    Cancelled,
    Failed(String),
}

impl<'a> Executor<'a> {
    pub fn new(
        spec: &'a DatasetSpec,
        fetcher: &'a dyn Fetcher,
        storage: &'a dyn Storage,
        claims: &'a ClaimSet,
        progress: &'a ProgressContext,
        cancel: &'a AtomicBool,
        options: ExecutorOptions,
    ) -> Self {
        Self {
            spec,
            fetcher,
            storage,
            claims,
            progress,
            cancel,
            options,
        }
    }

    /// Fetch and store every planned partition.
    pub fn run(&self, planned: Vec<Partition>) -> Outcome {
        let total = planned.len();
        if total == 0 {
            return Outcome::default();
        }
        let started = Instant::now();
        let queue = WorkQueue::new(planned);
        let tally = Mutex::new(Outcome::default());
        let stop = AtomicBool::new(false);
        let bar = self.progress.dataset_bar(&self.spec.id, total as u64);

        let workers = self.options.workers.clamp(1, total);
        if workers == 1 {
            self.worker(&queue, &tally, &stop, &bar);
        } else {
            match rayon::ThreadPoolBuilder::new().num_threads(workers).build() {
                Ok(pool) => pool.install(|| {
                    rayon::scope(|s| {
                        for _ in 0..workers {
                            s.spawn(|_| self.worker(&queue, &tally, &stop, &bar));
                        }
                    })
                }),
                Err(e) => {
                    log::warn!(
                        "{}: failed to build worker pool ({e}), running sequentially",
                        self.spec.id
                    );
                    self.worker(&queue, &tally, &stop, &bar);
                }
            }
        }

        let outcome = tally.into_inner().unwrap_or_else(|e| e.into_inner());
        bar.finish_with_message(format!(
            "{} fetched, {} failed",
            outcome.fetched,
            outcome.failed.len()
        ));
        log::info!(
            "{}: {}/{} fetched ({} failed, {} deferred, {} cancelled) in {:.1}s",
            self.spec.id,
            outcome.fetched,
            total,
            outcome.failed.len(),
            outcome.deferred,
            outcome.cancelled,
            started.elapsed().as_secs_f64()
        );
        outcome
    }

    fn worker(
        &self,
        queue: &WorkQueue<Partition>,
        tally: &Mutex<Outcome>,
        stop: &AtomicBool,
        bar: &ProgressBar,
    ) {
        loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            if self.cancel.load(Ordering::Relaxed) {
                let left = queue.close();
                record(tally, |t| t.cancelled += left);
                break;
            }
            let Some(partition) = queue.next() else {
                break;
            };

            match self.claims.claim(&partition.key) {
                None => {}
                Some(Claim::Partial) => {
                    log::debug!("{}: partial period already stored in this run", partition.key);
                    record(tally, |t| t.deferred += 1);
                    bar.inc(1);
                    continue;
                }
                Some(_) => {
                    log::debug!("{}: already claimed in this run", partition.key);
                    record(tally, |t| t.already_present += 1);
                    bar.inc(1);
                    continue;
                }
            }

            match self.process(partition) {
                Finished::Committed(c) if c.already_present => {
                    self.claims.settle(&partition.key, Claim::Stored);
                    record(tally, |t| t.already_present += 1);
                }
                Finished::Committed(c) if partition.is_partial() => {
                    self.claims.settle(&partition.key, Claim::Partial);
                    log::info!(
                        "{}: stored {} bytes for {} without marker, period not complete yet",
                        partition.key,
                        c.marker.bytes,
                        partition.range
                    );
                    record(tally, |t| {
                        t.deferred += 1;
                        t.bytes += c.marker.bytes;
                    });
                }
                Finished::Committed(c) => {
                    self.claims.settle(&partition.key, Claim::Stored);
                    log::info!(
                        "{}: stored {} bytes at {}",
                        partition.key,
                        c.marker.bytes,
                        c.location
                    );
                    record(tally, |t| {
                        t.fetched += 1;
                        t.bytes += c.marker.bytes;
                    });
                }
                Finished::Unavailable => {
                    self.claims.release(&partition.key);
                    stop.store(true, Ordering::Relaxed);
                    let left = queue.close();
                    log::warn!(
                        "{}: data not available yet at {}, deferring {} remaining partition(s)",
                        self.spec.id,
                        partition.key,
                        left
                    );
                    record(tally, |t| t.deferred += 1 + left);
                }
                Finished::Cancelled => {
                    self.claims.release(&partition.key);
                    record(tally, |t| t.cancelled += 1);
                }
                Finished::Failed(error) => {
                    self.claims.release(&partition.key);
                    log::error!("{}: {error}", partition.key);
                    record(tally, |t| {
                        t.failed.push(FailedPartition {
                            key: partition.key.clone(),
                            error,
                        })
                    });
                }
            }
            bar.inc(1);
        }
    }

    fn process(&self, partition: &Partition) -> Finished {
        let params = self.spec.request.build(partition);
        let extension = artifact_extension(&params);
        let request = FetchRequest {
            dataset: self.spec.name.clone(),
            params,
            range: partition.range,
        };
        let recorded = Value::Object(request.params.clone());
        let write = ArtifactWrite {
            key: &partition.key,
            extension,
            range: partition.range,
            request: &recorded,
            force: false,
            partial: partition.is_partial(),
        };

        let pb = self.progress.partition_bar(&partition.key);
        pb.set_message("requesting...");
        let result = retry_with_backoff(&partition.key, &self.options.retry, &pb, |attempt| {
            if attempt > 0 {
                pb.set_position(0);
            }
            let stream = self.fetcher.fetch(&request)?;
            pb.set_message("downloading...");
            let mut reader = pb.wrap_read(stream);
            let committed = self.storage.write_artifact(&write, &mut reader)?;
            Ok::<_, PartitionError>(committed)
        });
        pb.finish_and_clear();

        match result {
            Ok(c) => Finished::Committed(c),
            Err(e) if e.is_unavailable() => Finished::Unavailable,
            Err(e) if e.is_retryable() && self.cancel.load(Ordering::Relaxed) => {
                log::debug!("{}: abandoned on shutdown: {e}", partition.key);
                Finished::Cancelled
            }
            Err(e) => Finished::Failed(e.to_string()),
        }
    }
}
