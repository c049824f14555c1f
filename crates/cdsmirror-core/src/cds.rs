//! Climate Data Store retrieve API client
//!
//! A retrieval is an asynchronous job:
//! 1. `POST {url}/retrieve/v1/processes/{dataset}/execution` with `{"inputs": params}`
//! 2. poll `GET {url}/retrieve/v1/jobs/{id}` until the job settles
//! 3. `GET {url}/retrieve/v1/jobs/{id}/results` for the asset download link
//! 4. stream the asset
//!
//! Each call to [`CdsClient::fetch`] is one attempt; the executor decides
//! whether to try again.

use std::time::{Duration, Instant};

use serde_json::{Value, json};

use crate::error::FetchError;
use crate::fetch::{FetchRequest, FetchStream, Fetcher};
use crate::shutdown::is_shutdown_requested;
use crate::stream::{block_on, http_client, open_reader, send_checked};

const AUTH_HEADER: &str = "PRIVATE-TOKEN";

/// Connection settings for one CDS endpoint.
#[derive(Debug, Clone)]
pub struct CdsSettings {
    /// API root, e.g. `https://cds.climate.copernicus.eu/api`
    pub url: String,
    /// Personal access token
    pub key: Option<String>,
    pub poll_interval: Duration,
    /// Ceiling for one attempt: submit + queue + processing
    pub job_timeout: Duration,
    /// Stall detection while streaming the asset
    pub read_timeout: Duration,
}

impl Default for CdsSettings {
    fn default() -> Self {
        Self {
            url: "https://cds.climate.copernicus.eu/api".to_string(),
            key: None,
            poll_interval: Duration::from_secs(5),
            job_timeout: Duration::from_secs(3 * 3600),
            read_timeout: Duration::from_secs(60),
        }
    }
}

/// Job lifecycle as reported by the status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobStatus {
    Accepted,
    Running,
    Successful,
    Failed,
    Dismissed,
}

impl JobStatus {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "accepted" => Some(Self::Accepted),
            "running" => Some(Self::Running),
            "successful" => Some(Self::Successful),
            "failed" | "rejected" => Some(Self::Failed),
            "dismissed" | "deleted" => Some(Self::Dismissed),
            _ => None,
        }
    }
}

fn execution_url(base: &str, dataset: &str) -> String {
    format!(
        "{}/retrieve/v1/processes/{dataset}/execution",
        base.trim_end_matches('/')
    )
}

fn job_url(base: &str, job_id: &str) -> String {
    format!("{}/retrieve/v1/jobs/{job_id}", base.trim_end_matches('/'))
}

fn results_url(base: &str, job_id: &str) -> String {
    format!("{}/results", job_url(base, job_id))
}

fn job_id(body: &Value) -> Option<&str> {
    body.get("jobID").and_then(Value::as_str)
}

fn job_status(body: &Value) -> Option<JobStatus> {
    body.get("status").and_then(Value::as_str).and_then(JobStatus::parse)
}

fn asset_href(body: &Value) -> Option<&str> {
    body.pointer("/asset/value/href").and_then(Value::as_str)
}

/// Human-readable reason from an error document (`title` + `detail`).
fn error_message(body: &Value) -> String {
    let title = body.get("title").and_then(Value::as_str).unwrap_or("");
    let detail = body
        .get("detail")
        .or_else(|| body.pointer("/traceback"))
        .and_then(Value::as_str)
        .unwrap_or("");
    match (title.is_empty(), detail.is_empty()) {
        (false, false) => format!("{title}: {detail}"),
        (false, true) => title.to_string(),
        (true, false) => detail.to_string(),
        (true, true) => body.to_string(),
    }
}

/// Blocking CDS client.
pub struct CdsClient {
    settings: CdsSettings,
}

impl CdsClient {
    pub fn new(settings: CdsSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CdsSettings {
        &self.settings
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.settings.key {
            Some(key) => request.header(AUTH_HEADER, key),
            None => request,
        }
    }

    fn get_json(&self, url: &str) -> Result<Value, FetchError> {
        block_on(async {
            let response = send_checked(self.authorized(http_client().get(url))).await?;
            response
                .json::<Value>()
                .await
                .map_err(FetchError::from_reqwest)
        })
    }

    fn submit(&self, request: &FetchRequest) -> Result<String, FetchError> {
        let url = execution_url(&self.settings.url, &request.dataset);
        let payload = json!({ "inputs": request.params });
        let body: Value = block_on(async {
            let response =
                send_checked(self.authorized(http_client().post(&url).json(&payload))).await?;
            response
                .json::<Value>()
                .await
                .map_err(FetchError::from_reqwest)
        })?;
        job_id(&body)
            .map(str::to_string)
            .ok_or_else(|| FetchError::Transient(format!("no jobID in response: {body}")))
    }

    /// Poll until the job settles; returns the asset href.
    fn wait_for_asset(&self, job_id: &str) -> Result<String, FetchError> {
        let started = Instant::now();
        let mut last = JobStatus::Accepted;
        loop {
            let body = self.get_json(&job_url(&self.settings.url, job_id))?;
            let status = job_status(&body).ok_or_else(|| {
                FetchError::Transient(format!("job {job_id}: unrecognised status in {body}"))
            })?;
            if status != last {
                log::debug!("job {job_id}: {status:?}");
                last = status;
            }

            match status {
                JobStatus::Successful => {
                    let results = self.get_json(&results_url(&self.settings.url, job_id))?;
                    return asset_href(&results).map(str::to_string).ok_or_else(|| {
                        FetchError::Transient(format!("job {job_id}: no asset link in results"))
                    });
                }
                JobStatus::Failed => {
                    // The results endpoint carries the failure reason
                    return match self.get_json(&results_url(&self.settings.url, job_id)) {
                        Err(e) => Err(e),
                        Ok(body) => Err(FetchError::from_status(400, error_message(&body))),
                    };
                }
                JobStatus::Dismissed => {
                    return Err(FetchError::Transient(format!("job {job_id} was dismissed")));
                }
                JobStatus::Accepted | JobStatus::Running => {}
            }

            if started.elapsed() > self.settings.job_timeout {
                return Err(FetchError::Transient(format!(
                    "job {job_id} still {last:?} after {}s",
                    started.elapsed().as_secs()
                )));
            }
            if is_shutdown_requested() {
                return Err(FetchError::Transient(format!(
                    "job {job_id}: shutdown requested"
                )));
            }
            std::thread::sleep(self.settings.poll_interval);
        }
    }
}

impl Fetcher for CdsClient {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchStream, FetchError> {
        let job_id = self.submit(request)?;
        log::debug!("{} {}: submitted job {job_id}", request.dataset, request.range);
        let href = self.wait_for_asset(&job_id)?;
        let (reader, total) = open_reader(http_client().get(&href), self.settings.read_timeout)?;
        if let Some(total) = total {
            log::debug!("job {job_id}: downloading {total} bytes");
        }
        Ok(Box::new(reader))
    }
}
