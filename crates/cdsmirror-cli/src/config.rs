//! Configuration loading from TOML files

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cdsmirror_core::{CdsSettings, RetryPolicy};
use cdsmirror_plan::{
    ConfigError, DatasetSpec, Endpoint, Granularity, StorageTarget, parse_date,
};
use cdsmirror_store::S3Settings;
use serde::Deserialize;
use serde_json::{Map, Value};

const ENV_CONFIG: &str = "CDSMIRROR_CONFIG";
const LOCAL_CONFIG: &str = "cdsmirror.toml";
const DEFAULT_URL: &str = "https://cds.climate.copernicus.eu/api";

/// Whole configuration file
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub defaults: DefaultsConfig,
    pub storage: StorageConfig,
    pub http: HttpConfig,
    pub run: RunConfig,
    pub datasets: BTreeMap<String, DatasetConfig>,
}

/// Values inherited by every dataset
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    pub url: String,
    pub key: Option<String>,
    pub embargo_days: u32,
    /// Window start when a dataset has neither `years` nor `min_date`
    pub years: Option<Vec<i32>>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_URL.to_string(),
            key: None,
            embargo_days: 0,
            years: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    #[default]
    Fs,
    S3,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(rename = "type")]
    pub kind: StorageKind,
    pub base_dir: PathBuf,
    pub bucket: Option<String>,
    pub prefix: String,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub allow_http: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::Fs,
            base_dir: PathBuf::from("./data"),
            bucket: None,
            prefix: String::new(),
            region: None,
            endpoint: None,
            allow_http: false,
        }
    }
}

impl StorageConfig {
    fn target(&self, dataset: &str) -> Result<StorageTarget, ConfigError> {
        match self.kind {
            StorageKind::Fs => Ok(StorageTarget::Fs {
                base_dir: self.base_dir.clone(),
            }),
            StorageKind::S3 => {
                let bucket = self.bucket.clone().ok_or_else(|| ConfigError::MissingField {
                    dataset: dataset.to_string(),
                    field: "storage.bucket",
                })?;
                Ok(StorageTarget::S3(S3Settings {
                    bucket,
                    prefix: self.prefix.trim_matches('/').to_string(),
                    region: self.region.clone(),
                    endpoint: self.endpoint.clone(),
                    allow_http: self.allow_http,
                }))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Retries for transient failures, per partition
    pub max_retries: u32,
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Per-read stall timeout (seconds)
    pub read_timeout: u64,
    pub poll_interval: u64,
    /// Ceiling for one fetch attempt (seconds)
    pub job_timeout: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_secs: 2,
            max_delay_secs: 300,
            read_timeout: 60,
            poll_interval: 5,
            job_timeout: 3 * 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Worker threads per dataset
    pub workers: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self { workers: 1 }
    }
}

/// One `[datasets.<id>]` table
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatasetConfig {
    /// Remote dataset name (defaults to the table id)
    pub name: Option<String>,
    pub granularity: String,
    pub min_date: Option<String>,
    pub years: Option<Vec<i32>>,
    pub embargo_days: Option<u32>,
    pub url: Option<String>,
    pub key: Option<String>,
    pub storage: Option<StorageConfig>,
    #[serde(default)]
    pub request: Map<String, Value>,
}

/// Replace `${VAR}` with the environment value; unknown variables stay as written.
pub fn expand_env_vars(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match std::env::var(name) {
                    Ok(value) if !name.is_empty() => out.push_str(&value),
                    _ => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Candidate config paths in lookup order.
fn search_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
    if let Some(path) = explicit {
        return vec![path.to_path_buf()];
    }
    let mut paths = Vec::new();
    if let Some(env) = std::env::var_os(ENV_CONFIG) {
        paths.push(PathBuf::from(env));
    }
    paths.push(PathBuf::from(LOCAL_CONFIG));
    if let Some(dirs) = directories::ProjectDirs::from("", "", "cdsmirror") {
        paths.push(dirs.config_dir().join("config.toml"));
    }
    paths
}

impl Config {
    /// Load configuration.
    ///
    /// Search order:
    /// 1. `--config PATH`
    /// 2. `$CDSMIRROR_CONFIG`
    /// 3. `./cdsmirror.toml`
    /// 4. `~/.config/cdsmirror/config.toml`
    pub fn load(explicit: Option<&Path>) -> Result<(Self, PathBuf), ConfigError> {
        let candidates = search_paths(explicit);
        for path in &candidates {
            if path.is_file() {
                return Ok((Self::from_file(path)?, path.clone()));
            }
        }
        let searched = candidates
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        Err(ConfigError::NotFound(searched))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config = Self::parse(&content, &path.display().to_string())?;
        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(&expand_env_vars(content)).map_err(|e| ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.http.max_retries,
            base_delay: Duration::from_secs(self.http.base_delay_secs),
            max_delay: Duration::from_secs(self.http.max_delay_secs.max(self.http.base_delay_secs)),
        }
    }

    /// CDS client settings for one dataset's endpoint.
    pub fn cds_settings(&self, endpoint: &Endpoint) -> CdsSettings {
        CdsSettings {
            url: endpoint.url.clone(),
            key: endpoint.key.clone(),
            poll_interval: Duration::from_secs(self.http.poll_interval.max(1)),
            job_timeout: Duration::from_secs(self.http.job_timeout),
            read_timeout: Duration::from_secs(self.http.read_timeout),
        }
    }

    /// Build the dataset specs to run: all of them in id order, or just `only`.
    pub fn dataset_specs(
        &self,
        only: Option<&str>,
        embargo_override: Option<u32>,
    ) -> Result<Vec<DatasetSpec>, ConfigError> {
        if self.datasets.is_empty() {
            return Err(ConfigError::Parse {
                path: "config".into(),
                message: "no [datasets.<id>] tables defined".into(),
            });
        }
        let selected: Vec<(&String, &DatasetConfig)> = match only {
            Some(id) => {
                let (k, v) = self
                    .datasets
                    .get_key_value(id)
                    .ok_or_else(|| ConfigError::UnknownDataset(id.to_string()))?;
                vec![(k, v)]
            }
            None => self.datasets.iter().collect(),
        };
        selected
            .into_iter()
            .map(|(id, ds)| self.dataset_spec(id, ds, embargo_override))
            .collect()
    }

    fn dataset_spec(
        &self,
        id: &str,
        ds: &DatasetConfig,
        embargo_override: Option<u32>,
    ) -> Result<DatasetSpec, ConfigError> {
        let granularity: Granularity = ds.granularity.parse()?;
        let min_date = ds
            .min_date
            .as_deref()
            .map(|v| parse_date(&format!("datasets.{id}.min_date"), v))
            .transpose()?;
        let storage = ds.storage.as_ref().unwrap_or(&self.storage).target(id)?;
        let embargo = embargo_override
            .or(ds.embargo_days)
            .unwrap_or(self.defaults.embargo_days);

        let endpoint = Endpoint {
            url: ds.url.clone().unwrap_or_else(|| self.defaults.url.clone()),
            key: ds.key.clone().or_else(|| self.defaults.key.clone()),
        };
        if endpoint.key.as_deref().is_some_and(|k| k.contains("${")) {
            log::warn!("{id}: key references an unset environment variable");
        }

        let spec = DatasetSpec::new(
            id,
            ds.name.clone().unwrap_or_else(|| id.to_string()),
            granularity,
            ds.request.clone(),
            min_date,
            ds.years.clone(),
            embargo,
            storage,
        )?
        .with_endpoint(endpoint)
        .with_default_start_year(
            self.defaults
                .years
                .as_ref()
                .and_then(|ys| ys.iter().min().copied()),
        );
        Ok(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[defaults]
key = "abc:123"
embargo_days = 5

[storage]
type = "fs"
base_dir = "/srv/cds"

[http]
max_retries = 5

[run]
workers = 3

[datasets.era5-monthly]
name = "reanalysis-era5-single-levels"
granularity = "monthly"
years = [2021, 2020]

[datasets.era5-monthly.request]
product_type = ["reanalysis"]
variable = ["2m_temperature"]
data_format = "netcdf"

[datasets.era5-daily]
name = "reanalysis-era5-single-levels"
granularity = "daily"
min_date = "2025-08-01"
embargo_days = 0
storage = { type = "s3", bucket = "mirror", prefix = "/cds/" }

[datasets.era5-daily.request]
month = ["08", "09"]
"#;

    #[test]
    fn parse_full_config() {
        let config = Config::parse(SAMPLE, "sample").unwrap();
        assert_eq!(config.run.workers, 3);
        assert_eq!(config.http.max_retries, 5);
        assert_eq!(config.http.read_timeout, 60);
        assert_eq!(config.defaults.url, DEFAULT_URL);
        assert_eq!(config.datasets.len(), 2);

        let specs = config.dataset_specs(None, None).unwrap();
        // id order
        assert_eq!(specs[0].id, "era5-daily");
        assert_eq!(specs[1].id, "era5-monthly");

        let daily = &specs[0];
        assert_eq!(daily.granularity, Granularity::Daily);
        assert_eq!(daily.embargo_days, 0);
        assert_eq!(daily.min_date, chrono::NaiveDate::from_ymd_opt(2025, 8, 1));
        match &daily.storage {
            StorageTarget::S3(s) => {
                assert_eq!(s.bucket, "mirror");
                assert_eq!(s.prefix, "cds");
            }
            other => panic!("unexpected storage {other:?}"),
        }

        let monthly = &specs[1];
        assert_eq!(monthly.years, Some(vec![2020, 2021]));
        assert_eq!(monthly.embargo_days, 5);
        assert_eq!(monthly.endpoint.key.as_deref(), Some("abc:123"));
        assert!(matches!(monthly.storage, StorageTarget::Fs { .. }));
        assert_eq!(monthly.request.params()["data_format"], "netcdf");
    }

    #[test]
    fn select_single_dataset() {
        let config = Config::parse(SAMPLE, "sample").unwrap();
        let specs = config.dataset_specs(Some("era5-monthly"), Some(9)).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].embargo_days, 9);
        assert!(matches!(
            config.dataset_specs(Some("nope"), None),
            Err(ConfigError::UnknownDataset(_))
        ));
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let bad_granularity = r#"
[datasets.x]
granularity = "hourly"
"#;
        let config = Config::parse(bad_granularity, "t").unwrap();
        assert!(matches!(
            config.dataset_specs(None, None),
            Err(ConfigError::UnknownGranularity(_))
        ));

        let bad_date = r#"
[datasets.x]
granularity = "daily"
min_date = "yesterday"
"#;
        let config = Config::parse(bad_date, "t").unwrap();
        assert!(matches!(
            config.dataset_specs(None, None),
            Err(ConfigError::InvalidDate { .. })
        ));

        let s3_without_bucket = r#"
[storage]
type = "s3"
[datasets.x]
granularity = "daily"
"#;
        let config = Config::parse(s3_without_bucket, "t").unwrap();
        assert!(matches!(
            config.dataset_specs(None, None),
            Err(ConfigError::MissingField { field: "storage.bucket", .. })
        ));
    }

    #[test]
    fn malformed_toml_is_parse_error() {
        assert!(matches!(
            Config::parse("[datasets.x\n", "t"),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            Config::parse("[unknown]\nx = 1\n", "t"),
            Err(ConfigError::Parse { .. })
        ));
    }

    #[test]
    fn no_datasets_is_an_error() {
        let config = Config::parse("[run]\nworkers = 2\n", "t").unwrap();
        assert!(config.dataset_specs(None, None).is_err());
    }

    #[test]
    fn name_defaults_to_id() {
        let config = Config::parse("[datasets.era5]\ngranularity = \"yearly\"\n", "t").unwrap();
        let specs = config.dataset_specs(None, None).unwrap();
        assert_eq!(specs[0].name, "era5");
    }

    #[test]
    fn default_years_set_window_start() {
        let raw = "[defaults]\nyears = [2019, 2018]\n[datasets.era5]\ngranularity = \"yearly\"\n";
        let specs = Config::parse(raw, "t").unwrap().dataset_specs(None, None).unwrap();
        assert_eq!(specs[0].default_start_year, Some(2018));
        assert_eq!(specs[0].years, None);
    }

    #[test]
    fn expand_known_and_unknown_vars() {
        std::env::set_var("CDSMIRROR_TEST_KEY", "uid:secret");
        assert_eq!(
            expand_env_vars("key = \"${CDSMIRROR_TEST_KEY}\""),
            "key = \"uid:secret\""
        );
        std::env::remove_var("CDSMIRROR_TEST_KEY");

        assert_eq!(
            expand_env_vars("a ${CDSMIRROR_NOPE_12345} b"),
            "a ${CDSMIRROR_NOPE_12345} b"
        );
        assert_eq!(expand_env_vars("open ${never closed"), "open ${never closed");
        assert_eq!(expand_env_vars("${}"), "${}");
        assert_eq!(expand_env_vars("no vars"), "no vars");
    }

    #[test]
    fn retry_policy_from_http() {
        let config = Config::parse("[http]\nmax_retries = 1\nbase_delay_secs = 4\n", "t").unwrap();
        let p = config.retry_policy();
        assert_eq!(p.max_retries, 1);
        assert_eq!(p.base_delay, Duration::from_secs(4));
        assert_eq!(p.max_delay, Duration::from_secs(300));
    }

    #[test]
    fn load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[datasets.a]\ngranularity = \"daily\"\n").unwrap();
        let (config, found) = Config::load(Some(&path)).unwrap();
        assert_eq!(found, path);
        assert!(config.datasets.contains_key("a"));

        let missing = dir.path().join("missing.toml");
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(ConfigError::NotFound(_))
        ));
    }
}
