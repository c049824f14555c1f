//! Backend-neutral storage contract

use std::io::{self, Read};

use cdsmirror_core::DateRange;
use serde_json::Value;

use crate::marker::CompletionMarker;

/// Copy buffer size (256KB)
pub(crate) const COPY_BUF_SIZE: usize = 256 * 1024;

#[derive(Debug)]
pub enum StorageError {
    /// Local filesystem failure
    Io { context: String, source: io::Error },
    /// Object store failure (connectivity, permissions, ...)
    Backend(String),
    /// The payload stream failed while being written
    Payload(io::Error),
    /// A marker exists but cannot be parsed
    Corrupt { key: String, message: String },
    /// Key would escape the storage root
    InvalidKey(String),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { context, source } => write!(f, "{context}: {source}"),
            Self::Backend(msg) => write!(f, "storage backend: {msg}"),
            Self::Payload(e) => write!(f, "payload stream: {e}"),
            Self::Corrupt { key, message } => write!(f, "corrupt marker for {key}: {message}"),
            Self::InvalidKey(msg) => write!(f, "invalid key: {msg}"),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Payload(e) => Some(e),
            _ => None,
        }
    }
}

impl StorageError {
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Everything a backend needs to commit one partition.
#[derive(Debug, Clone, Copy)]
pub struct ArtifactWrite<'a> {
    pub key: &'a str,
    pub extension: &'a str,
    pub range: DateRange,
    /// Effective request parameters, recorded in the marker
    pub request: &'a Value,
    /// Overwrite even if a marker already exists
    pub force: bool,
    /// The period is still being published: store the artifact but write
    /// no marker, so the key is planned again on the next run
    pub partial: bool,
}

/// Outcome of a successful `write_artifact`.
#[derive(Debug, Clone)]
pub struct Committed {
    /// Where the artifact lives (backend-specific display form)
    pub location: String,
    /// Describes the artifact; only persisted for complete periods
    pub marker: CompletionMarker,
    /// Marker was already present; nothing was written
    pub already_present: bool,
}

/// Integrity check of one stored partition against its marker.
#[derive(Debug, Clone)]
pub struct VerifyResult {
    pub key: String,
    pub expected_bytes: u64,
    /// `None` when the artifact is missing
    pub actual_bytes: Option<u64>,
    /// `None` when the backend only compares sizes
    pub checksum_ok: Option<bool>,
}

impl VerifyResult {
    pub fn ok(&self) -> bool {
        self.actual_bytes == Some(self.expected_bytes) && self.checksum_ok != Some(false)
    }
}

/// Uniform interface over a backing object namespace.
///
/// Implementations must make the marker visible only after the artifact
/// is completely persisted; a failure at any point leaves no marker.
pub trait Storage: Send + Sync {
    /// True iff a completion marker exists for `key`.
    fn exists(&self, key: &str) -> Result<bool, StorageError>;

    /// Stream `payload` into the artifact for `write.key`, then write its marker.
    ///
    /// A no-op returning the existing marker when one is present and
    /// `write.force` is false.
    fn write_artifact(
        &self,
        write: &ArtifactWrite<'_>,
        payload: &mut dyn Read,
    ) -> Result<Committed, StorageError>;

    /// Keys of all markers under `prefix`, sorted.
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    fn read_marker(&self, key: &str) -> Result<Option<CompletionMarker>, StorageError>;

    fn verify(&self, key: &str) -> Result<VerifyResult, StorageError>;

    /// Human-readable location, for logs
    fn describe(&self) -> String;

    /// Remove leftovers of interrupted writes. Returns how many were removed.
    fn cleanup_staging(&self) -> Result<usize, StorageError> {
        Ok(0)
    }
}

impl<S: Storage + ?Sized> Storage for Box<S> {
    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        (**self).exists(key)
    }
    fn write_artifact(
        &self,
        write: &ArtifactWrite<'_>,
        payload: &mut dyn Read,
    ) -> Result<Committed, StorageError> {
        (**self).write_artifact(write, payload)
    }
    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        (**self).list(prefix)
    }
    fn read_marker(&self, key: &str) -> Result<Option<CompletionMarker>, StorageError> {
        (**self).read_marker(key)
    }
    fn verify(&self, key: &str) -> Result<VerifyResult, StorageError> {
        (**self).verify(key)
    }
    fn describe(&self) -> String {
        (**self).describe()
    }
    fn cleanup_staging(&self) -> Result<usize, StorageError> {
        (**self).cleanup_staging()
    }
}

/// Copy `payload` into `sink` chunk by chunk while hashing.
///
/// Read failures surface as [`StorageError::Payload`] so callers can tell
/// a broken download from a broken backend.
pub(crate) fn pump(
    payload: &mut dyn Read,
    mut sink: impl FnMut(&[u8]) -> Result<(), StorageError>,
) -> Result<(u64, blake3::Hash), StorageError> {
    let mut buf = vec![0u8; COPY_BUF_SIZE];
    let mut hasher = blake3::Hasher::new();
    let mut total = 0u64;
    loop {
        let n = match payload.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StorageError::Payload(e)),
        };
        hasher.update(&buf[..n]);
        sink(&buf[..n])?;
        total += n as u64;
    }
    Ok((total, hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Broken;

    impl Read for Broken {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
        }
    }

    #[test]
    fn pump_counts_and_hashes() {
        let data = vec![3u8; COPY_BUF_SIZE * 2 + 17];
        let mut out = Vec::new();
        let (n, hash) = pump(&mut &data[..], |chunk| {
            out.extend_from_slice(chunk);
            Ok(())
        })
        .unwrap();
        assert_eq!(n, data.len() as u64);
        assert_eq!(hash, crate::hash::hash_bytes(&data));
        assert_eq!(out, data);
    }

    #[test]
    fn pump_reports_payload_errors() {
        let err = pump(&mut Broken, |_| Ok(())).unwrap_err();
        assert!(matches!(err, StorageError::Payload(_)));
    }

    #[test]
    fn verify_result_ok_rules() {
        let mut r = VerifyResult {
            key: "k".into(),
            expected_bytes: 10,
            actual_bytes: Some(10),
            checksum_ok: None,
        };
        assert!(r.ok());
        r.checksum_ok = Some(false);
        assert!(!r.ok());
        r.checksum_ok = Some(true);
        r.actual_bytes = None;
        assert!(!r.ok());
    }
}
