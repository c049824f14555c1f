//! Completion marker: the durable record that a partition is fully stored

use cdsmirror_core::DateRange;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Bumped when the marker layout changes incompatibly.
pub const CURRENT_FORMAT_VERSION: u32 = 1;

/// Suffix appended to a partition key to form its marker object name.
pub const MARKER_SUFFIX: &str = ".marker.json";

/// Stored next to each artifact; written only after the artifact is complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionMarker {
    pub format_version: u32,
    /// Partition key, e.g. `reanalysis-era5-land/2025-08-01`
    pub key: String,
    /// Artifact object path relative to the storage root
    pub artifact: String,
    pub fetched_at: chrono::DateTime<chrono::Utc>,
    /// Artifact size in bytes
    pub bytes: u64,
    /// Full blake3 hex digest of the artifact
    pub blake3: String,
    /// Date range the request covered
    pub range: DateRange,
    /// Effective request parameters (for auditability)
    pub request: Value,
}

impl CompletionMarker {
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

pub fn marker_path(key: &str) -> String {
    format!("{key}{MARKER_SUFFIX}")
}

pub fn artifact_path(key: &str, extension: &str) -> String {
    format!("{key}.{extension}")
}

/// Inverse of [`marker_path`].
pub fn key_from_marker_path(path: &str) -> Option<&str> {
    path.strip_suffix(MARKER_SUFFIX)
}

/// File extension for the artifact, from the request's `data_format`
/// (new CDS) or `format` (legacy) parameter. Defaults to GRIB.
pub fn artifact_extension(params: &Map<String, Value>) -> &'static str {
    let format = params
        .get("data_format")
        .or_else(|| params.get("format"))
        .and_then(|v| match v {
            Value::String(s) => Some(s.as_str()),
            Value::Array(items) => items.first().and_then(Value::as_str),
            _ => None,
        })
        .unwrap_or("grib");
    match format {
        "netcdf" | "netcdf4" | "netcdf_legacy" | "nc" => "nc",
        "zip" | "netcdf.zip" => "zip",
        "tgz" | "tar.gz" => "tar.gz",
        "csv" => "csv",
        _ => "grib",
    }
}

/// Reject keys that would escape the storage root or produce odd object names.
pub fn validate_key(key: &str) -> Result<(), String> {
    if key.is_empty() {
        return Err("empty key".into());
    }
    if key.starts_with('/') || key.contains('\\') {
        return Err(format!("key must be a relative '/'-separated path: {key}"));
    }
    if key.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..") {
        return Err(format!("key has an empty or relative segment: {key}"));
    }
    Ok(())
}
