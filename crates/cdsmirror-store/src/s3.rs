//! S3-compatible object store backend
//!
//! Artifacts are streamed with a multipart upload; the marker is a single
//! `put` issued only after the upload has completed. An aborted upload
//! never becomes visible, so there is no staging area to clean up.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use cdsmirror_core::{SHARED_RUNTIME, block_on};
use futures_util::TryStreamExt;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload, RetryConfig, WriteMultipart};

use crate::marker::{
    self, CURRENT_FORMAT_VERSION, CompletionMarker, MARKER_SUFFIX, artifact_path, marker_path,
};
use crate::storage::{ArtifactWrite, Committed, Storage, StorageError, VerifyResult, pump};

/// In-flight multipart parts before the writer applies backpressure.
const MAX_PARTS_IN_FLIGHT: usize = 4;

/// Connection settings for an S3-compatible bucket.
///
/// Credentials come from the usual `AWS_*` environment variables.
#[derive(Debug, Clone, Default)]
pub struct S3Settings {
    pub bucket: String,
    /// Key prefix inside the bucket (no leading or trailing '/')
    pub prefix: String,
    pub region: Option<String>,
    /// Custom endpoint (MinIO, Ceph, ...)
    pub endpoint: Option<String>,
    pub allow_http: bool,
}

pub struct S3Storage {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    label: String,
}

fn backend(context: &str, e: object_store::Error) -> StorageError {
    StorageError::Backend(format!("{context}: {e}"))
}

impl S3Storage {
    pub fn new(settings: &S3Settings) -> Result<Self, StorageError> {
        let mut builder = AmazonS3Builder::from_env()
            .with_bucket_name(&settings.bucket)
            .with_allow_http(settings.allow_http)
            .with_retry(RetryConfig {
                max_retries: 3,
                retry_timeout: Duration::from_secs(120),
                ..Default::default()
            });
        if let Some(region) = &settings.region {
            builder = builder.with_region(region);
        }
        if let Some(endpoint) = &settings.endpoint {
            builder = builder.with_endpoint(endpoint);
        }
        let store = builder
            .build()
            .map_err(|e| backend("failed to create S3 client", e))?;

        let mut s = Self::with_store(Arc::new(store), &settings.prefix);
        s.label = format!("s3://{}/{}", settings.bucket, s.prefix);
        Ok(s)
    }

    /// Wrap an existing object store (tests use `InMemory`).
    pub fn with_store(store: Arc<dyn ObjectStore>, prefix: &str) -> Self {
        let prefix = prefix.trim_matches('/').to_string();
        Self {
            label: format!("object-store:{prefix}"),
            store,
            prefix,
        }
    }

    fn location(&self, rel: &str) -> Path {
        if self.prefix.is_empty() {
            Path::from(rel)
        } else {
            Path::from(format!("{}/{rel}", self.prefix))
        }
    }

    /// Strip the storage prefix from an object location.
    fn relative<'a>(&self, location: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            return location;
        }
        location
            .strip_prefix(self.prefix.as_str())
            .and_then(|s| s.strip_prefix('/'))
            .unwrap_or(location)
    }

    fn checked(&self, key: &str) -> Result<(), StorageError> {
        marker::validate_key(key).map_err(StorageError::InvalidKey)
    }

    /// Multipart upload of `payload` to `location`.
    ///
    /// The payload is read on the calling thread outside the runtime;
    /// only part submission and backpressure touch the async side.
    fn upload(
        &self,
        location: &Path,
        payload: &mut dyn Read,
    ) -> Result<(u64, blake3::Hash), StorageError> {
        let upload = block_on(self.store.put_multipart(location))
            .map_err(|e| backend(&format!("failed to start upload of {location}"), e))?;
        let mut writer = WriteMultipart::new(upload);

        let pumped = pump(payload, |chunk| {
            block_on(writer.wait_for_capacity(MAX_PARTS_IN_FLIGHT))
                .map_err(|e| backend(&format!("upload of {location} failed"), e))?;
            let _guard = SHARED_RUNTIME.enter();
            writer.write(chunk);
            Ok(())
        });

        match pumped {
            Ok(done) => {
                block_on(writer.finish())
                    .map_err(|e| backend(&format!("failed to complete upload of {location}"), e))?;
                Ok(done)
            }
            Err(e) => {
                if let Err(abort) = block_on(writer.abort()) {
                    log::warn!("failed to abort upload of {location}: {abort}");
                }
                Err(e)
            }
        }
    }
}

impl Storage for S3Storage {
    fn exists(&self, key: &str) -> Result<bool, StorageError> {
        self.checked(key)?;
        let location = self.location(&marker_path(key));
        match block_on(self.store.head(&location)) {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(backend(&format!("failed to stat {location}"), e)),
        }
    }

    fn write_artifact(
        &self,
        write: &ArtifactWrite<'_>,
        payload: &mut dyn Read,
    ) -> Result<Committed, StorageError> {
        self.checked(write.key)?;
        let rel_artifact = artifact_path(write.key, write.extension);
        let location = self.location(&rel_artifact);

        if !write.force {
            if let Some(existing) = self.read_marker(write.key)? {
                log::debug!("{}: marker present, skipping write", write.key);
                return Ok(Committed {
                    location: location.to_string(),
                    marker: existing,
                    already_present: true,
                });
            }
        }

        let (bytes, digest) = self.upload(&location, payload)?;

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
                location: location.to_string(),
                marker,
                already_present: false,
            });
        }
        let json = marker
            .to_json()
            .map_err(|e| StorageError::Backend(format!("failed to serialize marker: {e}")))?;
        let marker_location = self.location(&marker_path(write.key));
        block_on(self.store.put(&marker_location, PutPayload::from(json)))
            .map_err(|e| backend(&format!("failed to write {marker_location}"), e))?;

        Ok(Committed {
            location: location.to_string(),
            marker,
            already_present: false,
        })
    }

    fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        // Object store listing is segment-based; narrow to the deepest
        // complete directory and filter the rest by string prefix.
        let dir = match prefix.rsplit_once('/') {
            Some((dir, _)) if !dir.is_empty() => Some(self.location(dir)),
            _ if self.prefix.is_empty() => None,
            _ => Some(Path::from(self.prefix.as_str())),
        };
        let metas: Vec<_> = block_on(self.store.list(dir.as_ref()).try_collect())
            .map_err(|e| backend(&format!("failed to list {prefix:?}"), e))?;

        let mut keys: Vec<String> = metas
            .iter()
            .filter_map(|meta| {
                let location = meta.location.as_ref();
                let rel = self.relative(location);
                marker::key_from_marker_path(rel).map(str::to_string)
            })
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        log::debug!("listed {} markers under {prefix:?} ({MARKER_SUFFIX})", keys.len());
        Ok(keys)
    }

    fn read_marker(&self, key: &str) -> Result<Option<CompletionMarker>, StorageError> {
        self.checked(key)?;
        let location = self.location(&marker_path(key));
        let bytes = block_on(async {
            match self.store.get(&location).await {
                Ok(result) => result.bytes().await.map(Some),
                Err(object_store::Error::NotFound { .. }) => Ok(None),
                Err(e) => Err(e),
            }
        })
        .map_err(|e| backend(&format!("failed to read {location}"), e))?;

        match bytes {
            None => Ok(None),
            Some(bytes) => CompletionMarker::from_json(&bytes)
                .map(Some)
                .map_err(|e| StorageError::Corrupt {
                    key: key.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    /// Size-only check; a checksum would mean downloading the artifact.
    fn verify(&self, key: &str) -> Result<VerifyResult, StorageError> {
        let marker = self.read_marker(key)?.ok_or_else(|| StorageError::Corrupt {
            key: key.to_string(),
            message: "no marker".into(),
        })?;
        let location = self.location(&marker.artifact);
        let actual_bytes = match block_on(self.store.head(&location)) {
            Ok(meta) => Some(meta.size as u64),
            Err(object_store::Error::NotFound { .. }) => None,
            Err(e) => return Err(backend(&format!("failed to stat {location}"), e)),
        };
        Ok(VerifyResult {
            key: key.to_string(),
            expected_bytes: marker.bytes,
            actual_bytes,
            checksum_ok: None,
        })
    }

    fn describe(&self) -> String {
        self.label.clone()
    }
}
