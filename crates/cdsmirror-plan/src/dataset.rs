//! Immutable per-dataset configuration

use std::fmt;
use std::path::PathBuf;

use cdsmirror_store::{FsStorage, S3Settings, S3Storage, Storage, StorageError};
use chrono::NaiveDate;

use crate::error::ConfigError;
use crate::granularity::Granularity;
use crate::request::RequestTemplate;

/// Where a dataset's artifacts and markers live.
#[derive(Debug, Clone)]
pub enum StorageTarget {
    Fs { base_dir: PathBuf },
    S3(S3Settings),
}

impl StorageTarget {
    pub fn open(&self) -> Result<Box<dyn Storage>, StorageError> {
        match self {
            Self::Fs { base_dir } => Ok(Box::new(FsStorage::new(base_dir)?)),
            Self::S3(settings) => Ok(Box::new(S3Storage::new(settings)?)),
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Fs { base_dir } => format!("fs:{}", base_dir.display()),
            Self::S3(s) => format!("s3://{}/{}", s.bucket, s.prefix),
        }
    }
}

/// Remote endpoint and credential for one dataset.
#[derive(Clone, Default)]
pub struct Endpoint {
    pub url: String,
    pub key: Option<String>,
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .field("key", &self.key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// One configured dataset. Built once at start-up, never mutated.
#[derive(Debug, Clone)]
pub struct DatasetSpec {
    /// Config table id (`[datasets.<id>]`)
    pub id: String,
    /// Remote dataset name; also the storage namespace of its keys
    pub name: String,
    pub granularity: Granularity,
    pub request: RequestTemplate,
    /// Inclusive lower bound
    pub min_date: Option<NaiveDate>,
    /// Explicit years, sorted and deduplicated
    pub years: Option<Vec<i32>>,
    /// Window start year when neither `years` nor `min_date` is set
    pub default_start_year: Option<i32>,
    pub embargo_days: u32,
    pub endpoint: Endpoint,
    pub storage: StorageTarget,
}

impl DatasetSpec {
    /// Validate and assemble a spec. `years` is normalized here.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        granularity: Granularity,
        request: serde_json::Map<String, serde_json::Value>,
        min_date: Option<NaiveDate>,
        years: Option<Vec<i32>>,
        embargo_days: u32,
        storage: StorageTarget,
    ) -> Result<Self, ConfigError> {
        let id = id.into();
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::MissingField {
                dataset: id,
                field: "name",
            });
        }
        if let Err(msg) = cdsmirror_store::marker::validate_key(&name) {
            return Err(ConfigError::Invalid {
                dataset: id,
                message: format!("name is not usable as a storage namespace: {msg}"),
            });
        }

        let years = match years {
            Some(ys) if ys.is_empty() => return Err(ConfigError::EmptyYears { dataset: id }),
            Some(mut ys) => {
                if let Some(bad) = ys.iter().find(|y| !(1..=9999).contains(*y)) {
                    return Err(ConfigError::Invalid {
                        dataset: id,
                        message: format!("year {bad} out of range"),
                    });
                }
                ys.sort_unstable();
                ys.dedup();
                Some(ys)
            }
            None => None,
        };

        let request = RequestTemplate::new(request).map_err(|message| ConfigError::Invalid {
            dataset: id.clone(),
            message,
        })?;

        Ok(Self {
            id,
            name,
            granularity,
            request,
            min_date,
            years,
            default_start_year: None,
            embargo_days,
            endpoint: Endpoint::default(),
            storage,
        })
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = endpoint;
        self
    }

    pub fn with_default_start_year(mut self, year: Option<i32>) -> Self {
        self.default_start_year = year;
        self
    }

    /// Key prefix shared by all of this dataset's partitions.
    pub fn key_prefix(&self) -> String {
        format!("{}/", self.name)
    }
}

/// Parse an ISO `YYYY-MM-DD` date for config field `field`.
pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate, ConfigError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| ConfigError::InvalidDate {
        field: field.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Map, json};

    fn fs_target() -> StorageTarget {
        StorageTarget::Fs {
            base_dir: PathBuf::from("/tmp/cdsmirror-test"),
        }
    }

    fn spec(years: Option<Vec<i32>>) -> Result<DatasetSpec, ConfigError> {
        DatasetSpec::new(
            "era5",
            "reanalysis-era5-single-levels",
            Granularity::Monthly,
            Map::new(),
            None,
            years,
            0,
            fs_target(),
        )
    }

    #[test]
    fn years_are_sorted_and_deduped() {
        let s = spec(Some(vec![2021, 2020, 2021])).unwrap();
        assert_eq!(s.years, Some(vec![2020, 2021]));
        assert_eq!(s.key_prefix(), "reanalysis-era5-single-levels/");
    }

    #[test]
    fn empty_years_rejected() {
        assert!(matches!(spec(Some(vec![])), Err(ConfigError::EmptyYears { .. })));
    }

    #[test]
    fn bad_name_rejected() {
        let r = DatasetSpec::new(
            "x",
            "../escape",
            Granularity::Daily,
            Map::new(),
            None,
            None,
            0,
            fs_target(),
        );
        assert!(matches!(r, Err(ConfigError::Invalid { .. })));

        let r = DatasetSpec::new("x", " ", Granularity::Daily, Map::new(), None, None, 0, fs_target());
        assert!(matches!(r, Err(ConfigError::MissingField { field: "name", .. })));
    }

    #[test]
    fn bad_template_rejected() {
        let request = json!({ "month": ["00"] }).as_object().unwrap().clone();
        let r = DatasetSpec::new("x", "ds", Granularity::Daily, request, None, None, 0, fs_target());
        assert!(matches!(r, Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn parse_iso_dates() {
        assert_eq!(
            parse_date("min_date", "2025-08-01").unwrap(),
            NaiveDate::from_ymd_opt(2025, 8, 1).unwrap()
        );
        assert!(matches!(
            parse_date("min_date", "08/01/2025"),
            Err(ConfigError::InvalidDate { .. })
        ));
    }

    #[test]
    fn endpoint_debug_hides_key() {
        let e = Endpoint {
            url: "https://example".into(),
            key: Some("secret-token".into()),
        };
        let shown = format!("{e:?}");
        assert!(!shown.contains("secret-token"));
        assert!(shown.contains("redacted"));
    }
}
