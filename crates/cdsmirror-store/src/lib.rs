//! cdsmirror-store: idempotent ledger of materialized partitions
//!
//! Every partition is stored as an artifact object plus a completion
//! marker written only after the artifact is fully persisted. Marker
//! presence is the single source of truth for "already done".

pub mod fs;
pub mod hash;
pub mod marker;
pub mod s3;
pub mod storage;

pub use fs::FsStorage;
pub use hash::{hash_bytes, hash_file, short_hash};
pub use marker::{CompletionMarker, artifact_extension, artifact_path, marker_path};
pub use s3::{S3Settings, S3Storage};
pub use storage::{ArtifactWrite, Committed, Storage, StorageError, VerifyResult};
