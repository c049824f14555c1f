//! Local filesystem storage backend
//!
//! Directory layout:
//! ```text
//! {base}/
//! └── {dataset}/
//!     ├── 2025-07.grib              # artifact
//!     ├── 2025-07.marker.json       # completion marker
//!     └── 2025-08.grib.tmp          # staging file of an in-flight write
//! ```
//!
//! Writes go to a `.tmp` sibling, are fsynced and renamed into place; the
//! marker follows the same tmp + rename dance once the artifact is final.

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::hash;
use crate::marker::{
    self, CURRENT_FORMAT_VERSION, CompletionMarker, MARKER_SUFFIX, artifact_path, marker_path,
};
use crate::storage::{ArtifactWrite, Committed, Storage, StorageError, VerifyResult, pump};

const STAGING_SUFFIX: &str = ".tmp";

/// Filesystem-backed storage rooted at `base`.
pub struct FsStorage {
    base: PathBuf,
}

/// Path with `.tmp` appended to the file name.
fn staging_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_owned();
    s.push(STAGING_SUFFIX);
    PathBuf::from(s)
}

/// Write `bytes` to `path` via a staging file and rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let tmp = staging_path(path);
    let result = (|| {
        let mut f = File::create(&tmp)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        fs::rename(&tmp, path)
    })();
    if let Err(e) = result {
        let _ = fs::remove_file(&tmp);
        return Err(StorageError::io(format!("failed to write {}", path.display()), e));
    }
    Ok(())
}

impl FsStorage {
    /// Create storage rooted at `base`, creating the directory if needed.
    pub fn new(base: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(base).map_err(|e| {
            StorageError::io(format!("failed to create storage dir {}", base.display()), e)
        })?;
        Ok(Self {
            base: base.to_path_buf(),
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn resolve(&self, rel: &str) -> PathBuf {
        self.base.join(rel)
    }

    fn checked(&self, key: &str) -> Result<(), StorageError> {
        marker::validate_key(key).map_err(StorageError::InvalidKey)
    }

    /// All files under `base` matching a glob suffix, as relative '/' paths.
    fn glob_relative(&self, suffix: &str) -> Result<Vec<String>, StorageError> {
        let pattern = format!(
            "{}/**/*{suffix}",
            glob::Pattern::escape(&self.base.to_string_lossy())
        );
        let paths = glob::glob(&pattern)
            .map_err(|e| StorageError::Backend(format!("invalid glob pattern: {e}")))?;

        let mut out = Vec::new();
        for entry in paths {
            let path = entry.map_err(|e| {
                let path = e.path().display().to_string();
                StorageError::io(format!("failed to read {path}"), e.into())
            })?;
            if !path.is_file() {
                continue;
            }
            let rel = path.strip_prefix(&self.base).unwrap_or(&path);
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(rel);
        }
        Ok(out)
    }

    /// Stream into `{artifact}.tmp`, fsync, rename. Removes the staging
    /// file on any failure.
    fn write_payload(
        &self,
        target: &Path,
        payload: &mut dyn Read,
    ) -> Result<(u64, blake3::Hash), StorageError> {
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                StorageError::io(format!("failed to create {}", parent.display()), e)
            })?;
        }
        let tmp = staging_path(target);
        let result = (|| -> Result<(u64, blake3::Hash), StorageError> {
            let mut file = File::create(&tmp)
                .map_err(|e| StorageError::io(format!("failed to create {}", tmp.display()), e))?;
            let (bytes, digest) = pump(payload, |chunk| {
                file.write_all(chunk)
                    .map_err(|e| StorageError::io(format!("failed to write {}", tmp.display()), e))
            })?;
            file.sync_all()
                .map_err(|e| StorageError::io(format!("failed to sync {}", tmp.display()), e))?;
            drop(file);
            fs::rename(&tmp, target).map_err(|e| {
                StorageError::io(
                    format!("failed to rename {} → {}", tmp.display(), target.display()),
                    e,
                )
            })?;
            Ok((bytes, digest))
        })();
        if result.is_err() {
            let _ = fs::remove_file(&tmp);
        }
        result
    }
}

impl Storage for FsStorage {
    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.checked(key)?;
        let path = self.resolve(&marker_path(key));
        path.try_exists()
            .map_err(|e| StorageError::io(format!("failed to stat {}", path.display()), e))
    }

    fn write_artifact(
        &self,
        write: &ArtifactWrite<'_>,
        payload: &mut dyn Read,
    ) -> Result<Committed, StorageError> {
        self.checked(write.key)?;
        let rel_artifact = artifact_path(write.key, write.extension);
        let target = self.resolve(&rel_artifact);

        if !write.force {
            if let Some(existing) = self.read_marker(write.key)? {
                log::debug!("{}: marker present, skipping write", write.key);
                return Ok(Committed {
                    location: target.display().to_string(),
                    marker: existing,
                    already_present: true,
                });
            }
        }

        let (bytes, digest) = self.write_payload(&target, payload)?;

        let marker = CompletionMarker {
            format_version: CURRENT_FORMAT_VERSION,
            key: write.key.to_string(),
            artifact: rel_artifact,
            fetched_at: chrono::Utc::now(),
            bytes,
            blake3: digest.to_hex().to_string(),
            range: write.range,
            request: write.request.clone(),
        };
        if write.partial {
            log::debug!("{}: partial period stored without marker", write.key);
            return Ok(Committed {
                location: target.display().to_string(),
                marker,
                already_present: false,
            });
        }
        let json = marker
            .to_json()
            .map_err(|e| StorageError::Backend(format!("failed to serialize marker: {e}")))?;
        write_atomic(&self.resolve(&marker_path(write.key)), &json)?;

        Ok(Committed {
            location: target.display().to_string(),
            marker,
            already_present: false,
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys: Vec<String> = self
            .glob_relative(MARKER_SUFFIX)?
            .iter()
            .filter_map(|p| marker::key_from_marker_path(p))
            .filter(|k| k.starts_with(prefix))
            .map(str::to_string)
            .collect();
        keys.sort();
        Ok(keys)
    }

    fn read_marker(&self, key: &str) -> Result<Option<CompletionMarker>, StorageError> {
        self.checked(key)?;
        let path = self.resolve(&marker_path(key));
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StorageError::io(format!("failed to read {}", path.display()), e));
            }
        };
        CompletionMarker::from_json(&bytes)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                message: e.to_string(),
            })
    }

    fn verify(&self, key: &str) -> Result<VerifyResult, StorageError> {
        let marker = self.read_marker(key)?.ok_or_else(|| StorageError::Corrupt {
            key: key.to_string(),
            message: "no marker".into(),
        })?;
        let path = self.resolve(&marker.artifact);
        let (actual_bytes, checksum_ok) = match fs::metadata(&path) {
            Ok(meta) => {
                let ok = hash::hash_file(&path)
                    .map(|h| h.to_hex().to_string() == marker.blake3)
                    .map_err(|e| StorageError::io(format!("failed to hash {}", path.display()), e))?;
                (Some(meta.len()), Some(ok))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (None, None),
            Err(e) => {
                return Err(StorageError::io(format!("failed to stat {}", path.display()), e));
            }
        };
        Ok(VerifyResult {
            key: key.to_string(),
            expected_bytes: marker.bytes,
            actual_bytes,
            checksum_ok,
        })
    }

    fn describe(&self) -> String {
        format!("fs:{}", self.base.display())
    }

    fn cleanup_staging(&self) -> Result<usize, StorageError> {
        let mut count = 0;
        for rel in self.glob_relative(STAGING_SUFFIX)? {
            let path = self.resolve(&rel);
            log::warn!("removing stale staging file: {}", path.display());
            fs::remove_file(&path)
                .map_err(|e| StorageError::io(format!("failed to remove {}", path.display()), e))?;
            count += 1;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdsmirror_core::DateRange;
    use chrono::NaiveDate;
    use serde_json::{Value, json};
    use std::io;

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
        )
    }

    fn write<'a>(key: &'a str, request: &'a Value) -> ArtifactWrite<'a> {
        ArtifactWrite {
            key,
            extension: "grib",
            range: range(),
            request,
            force: false,
            partial: false,
        }
    }

    /// Yields some bytes, then fails like a dropped connection.
    struct Truncated {
        sent: bool,
    }

    impl Read for Truncated {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"));
            }
            self.sent = true;
            buf[..4].copy_from_slice(b"GRIB");
            Ok(4)
        }
    }

    #[test]
    fn new_creates_base_dir() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("nested/data");
        FsStorage::new(&base).unwrap();
        assert!(base.is_dir());
    }

    #[test]
    fn exists_false_on_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStorage::new(dir.path()).unwrap();
        assert!(!store.exists("era5/2020").unwrap());
    }

    #[test]
    fn write_then_exists_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStorage::new(dir.path()).unwrap();
        let req = json!({ "year": ["2020"] });

        let committed = store
            .write_artifact(&write("era5/2020", &req), &mut &b"GRIB data"[..])
            .unwrap();
        assert!(!committed.already_present);
        assert_eq!(committed.marker.bytes, 9);
        assert_eq!(committed.marker.artifact, "era5/2020.grib");
        assert_eq!(committed.marker.request, req);

        assert!(store.exists("era5/2020").unwrap());
        assert_eq!(
            fs::read(dir.path().join("era5/2020.grib")).unwrap(),
            b"GRIB data"
        );
        let marker = store.read_marker("era5/2020").unwrap().unwrap();
        assert_eq!(marker.blake3, hash::hash_bytes(b"GRIB data").to_hex().to_string());
    }

    #[test]
    fn growing_period_is_stored_without_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStorage::new(dir.path()).unwrap();
        let req = json!({});
        let mut w = write("era5/2020", &req);
        w.partial = true;

        let c = store.write_artifact(&w, &mut &b"first"[..]).unwrap();
        assert!(!c.already_present);
        assert_eq!(c.marker.bytes, 5);
        assert!(!store.exists("era5/2020").unwrap());

        // a later run overwrites the unmarked artifact
        store.write_artifact(&w, &mut &b"second"[..]).unwrap();
        assert_eq!(fs::read(dir.path().join("era5/2020.grib")).unwrap(), b"second");
        assert!(store.list("era5/").unwrap().is_empty());
    }

    #[test]
    fn failed_payload_leaves_no_marker_and_no_staging() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStorage::new(dir.path()).unwrap();
        let req = json!({});

        let err = store
            .write_artifact(&write("era5/2020", &req), &mut Truncated { sent: false })
            .unwrap_err();
        assert!(matches!(err, StorageError::Payload(_)));
        assert!(!store.exists("era5/2020").unwrap());
        assert!(!dir.path().join("era5/2020.grib").exists());
        assert!(!dir.path().join("era5/2020.grib.tmp").exists());
    }

    #[test]
    fn second_write_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStorage::new(dir.path()).unwrap();
        let req = json!({});

        let first = store
            .write_artifact(&write("era5/2020", &req), &mut &b"first"[..])
            .unwrap();
        let second = store
            .write_artifact(&write("era5/2020", &req), &mut &b"second"[..])
            .unwrap();
        assert!(second.already_present);
        assert_eq!(second.marker, first.marker);
        assert_eq!(fs::read(dir.path().join("era5/2020.grib")).unwrap(), b"first");
    }

    #[test]
    fn forced_write_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStorage::new(dir.path()).unwrap();
        let req = json!({});

        store
            .write_artifact(&write("era5/2020", &req), &mut &b"old"[..])
            .unwrap();
        let mut forced = write("era5/2020", &req);
        forced.force = true;
        let c = store.write_artifact(&forced, &mut &b"newer"[..]).unwrap();
        assert!(!c.already_present);
        assert_eq!(c.marker.bytes, 5);
        assert_eq!(fs::read(dir.path().join("era5/2020.grib")).unwrap(), b"newer");
    }

    #[test]
    fn orphan_artifact_without_marker_is_not_done() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStorage::new(dir.path()).unwrap();
        fs::create_dir_all(dir.path().join("era5")).unwrap();
        fs::write(dir.path().join("era5/2020.grib"), b"partial").unwrap();
        assert!(!store.exists("era5/2020").unwrap());
    }

    #[test]
    fn list_is_sorted_and_prefix_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStorage::new(dir.path()).unwrap();
        let req = json!({});
        for key in ["era5/2021-02", "era5/2020-12", "land/2020-01", "era5/2021-01"] {
            store
                .write_artifact(&write(key, &req), &mut &b"x"[..])
                .unwrap();
        }

        assert_eq!(
            store.list("era5/").unwrap(),
            vec!["era5/2020-12", "era5/2021-01", "era5/2021-02"]
        );
        assert_eq!(
            store.list("era5/2021").unwrap(),
            vec!["era5/2021-01", "era5/2021-02"]
        );
        assert_eq!(store.list("").unwrap().len(), 4);
    }

    #[test]
    fn cleanup_staging_removes_only_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStorage::new(dir.path()).unwrap();
        let req = json!({});
        store
            .write_artifact(&write("era5/2020", &req), &mut &b"keep"[..])
            .unwrap();
        fs::write(dir.path().join("era5/2021.grib.tmp"), b"stale").unwrap();

        assert_eq!(store.cleanup_staging().unwrap(), 1);
        assert!(!dir.path().join("era5/2021.grib.tmp").exists());
        assert!(dir.path().join("era5/2020.grib").exists());
        assert!(store.exists("era5/2020").unwrap());
    }

    #[test]
    fn verify_detects_corruption_and_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStorage::new(dir.path()).unwrap();
        let req = json!({});
        store
            .write_artifact(&write("era5/2020", &req), &mut &b"original"[..])
            .unwrap();
        assert!(store.verify("era5/2020").unwrap().ok());

        fs::write(dir.path().join("era5/2020.grib"), b"tampered").unwrap();
        let r = store.verify("era5/2020").unwrap();
        assert_eq!(r.checksum_ok, Some(false));
        assert!(!r.ok());

        fs::remove_file(dir.path().join("era5/2020.grib")).unwrap();
        let r = store.verify("era5/2020").unwrap();
        assert_eq!(r.actual_bytes, None);
        assert!(!r.ok());
    }

    #[test]
    fn corrupt_marker_is_an_error_not_missing() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStorage::new(dir.path()).unwrap();
        fs::create_dir_all(dir.path().join("era5")).unwrap();
        fs::write(dir.path().join("era5/2020.marker.json"), b"{not json").unwrap();
        assert!(store.exists("era5/2020").unwrap());
        assert!(matches!(
            store.read_marker("era5/2020"),
            Err(StorageError::Corrupt { .. })
        ));
    }

    #[test]
    fn rejects_escaping_keys() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsStorage::new(dir.path()).unwrap();
        assert!(matches!(
            store.exists("../outside"),
            Err(StorageError::InvalidKey(_))
        ));
    }
}
