//! Incremental planner: candidates minus what storage already has

use cdsmirror_store::{Storage, StorageError};
use chrono::NaiveDate;

use crate::clamp::{EffectiveWindow, effective_window};
use crate::dataset::DatasetSpec;
use crate::partition::{Partition, enumerate};

/// Outstanding work for one dataset.
#[derive(Debug, Clone)]
pub struct Plan {
    pub window: EffectiveWindow,
    /// Partitions enumerated inside the window
    pub candidates: usize,
    /// Candidates whose marker already exists
    pub present: usize,
    /// Missing partitions, oldest first
    pub missing: Vec<Partition>,
}

impl Plan {
    pub fn keys(&self) -> Vec<&str> {
        self.missing.iter().map(|p| p.key.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.missing.is_empty()
    }
}

/// Compute the missing partitions of `spec` as of `now`.
///
/// `now` is the run's clock snapshot; the same spec, storage state and
/// `now` always give the same plan. Any storage failure aborts planning:
/// an unknown key is never treated as missing or present.
pub fn plan(spec: &DatasetSpec, storage: &dyn Storage, now: NaiveDate) -> Result<Plan, StorageError> {
    let window = effective_window(spec, now);
    if window.is_empty() {
        log::info!(
            "{}: effective window {} is empty (min_date {:?}), nothing to plan",
            spec.id,
            window,
            spec.min_date
        );
        return Ok(Plan {
            window,
            candidates: 0,
            present: 0,
            missing: Vec::new(),
        });
    }

    let filter = spec.request.calendar_filter(spec.years.as_deref());
    let mut candidates = 0;
    let mut present = 0;
    let mut missing = Vec::new();
    for partition in enumerate(&spec.name, spec.granularity, window.range, &filter) {
        candidates += 1;
        if storage.exists(&partition.key)? {
            log::debug!("{}: skipping {}, marker present", spec.id, partition.key);
            present += 1;
        } else {
            missing.push(partition);
        }
    }

    log::info!(
        "{} [{}]: window {}, {} candidates, {} present, {} missing",
        spec.id,
        spec.granularity,
        window,
        candidates,
        present,
        missing.len()
    );
    Ok(Plan {
        window,
        candidates,
        present,
        missing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::StorageTarget;
    use crate::granularity::Granularity;
    use cdsmirror_store::{ArtifactWrite, FsStorage};
    use serde_json::{Map, json};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn monthly(dir: &std::path::Path) -> DatasetSpec {
        DatasetSpec::new(
            "era5-monthly",
            "era5",
            Granularity::Monthly,
            Map::new(),
            None,
            Some(vec![2024]),
            0,
            StorageTarget::Fs {
                base_dir: dir.to_path_buf(),
            },
        )
        .unwrap()
    }

    fn mark(storage: &FsStorage, key: &str) {
        let req = json!({});
        let write = ArtifactWrite {
            key,
            extension: "grib",
            range: cdsmirror_core::DateRange::new(d(2024, 1, 1), d(2024, 2, 1)),
            request: &req,
            force: false,
            partial: false,
        };
        storage.write_artifact(&write, &mut &b"x"[..]).unwrap();
    }

    #[test]
    fn present_partitions_are_excluded_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path()).unwrap();
        let spec = monthly(dir.path());
        mark(&storage, "era5/2024-02");
        mark(&storage, "era5/2024-05");

        let p = plan(&spec, &storage, d(2024, 7, 1)).unwrap();
        assert_eq!(p.candidates, 6);
        assert_eq!(p.present, 2);
        assert_eq!(
            p.keys(),
            vec!["era5/2024-01", "era5/2024-03", "era5/2024-04", "era5/2024-06"]
        );
    }

    #[test]
    fn empty_window_is_a_noop_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FsStorage::new(dir.path()).unwrap();
        let mut spec = monthly(dir.path());
        spec.min_date = Some(d(2030, 1, 1));
        let p = plan(&spec, &storage, d(2024, 7, 1)).unwrap();
        assert!(p.is_empty());
        assert_eq!(p.candidates, 0);
    }
}
