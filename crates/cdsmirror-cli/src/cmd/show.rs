//! `--show-config`: resolved settings and per-dataset windows

use std::path::Path;

use comfy_table::Cell;

use cdsmirror_plan::{DatasetSpec, effective_window};

use super::new_table;
use crate::config::Config;

fn configured(value: Option<&str>) -> &'static str {
    if value.is_some() { "configured" } else { "not set" }
}

pub fn show(config: &Config, origin: &Path, specs: &[DatasetSpec]) {
    let mut table = new_table(&["Setting", "Value"]);

    table.add_row(vec!["Config file", &origin.display().to_string()]);
    table.add_row(vec!["CDS URL", &config.defaults.url]);
    table.add_row(vec!["CDS key", configured(config.defaults.key.as_deref())]);
    table.add_row(vec![
        "Embargo",
        &format!("{} days", config.defaults.embargo_days),
    ]);
    table.add_row(vec!["Workers", &config.run.workers.to_string()]);
    table.add_row(vec!["Max retries", &config.http.max_retries.to_string()]);
    table.add_row(vec![
        "Backoff",
        &format!(
            "{}s .. {}s",
            config.http.base_delay_secs, config.http.max_delay_secs
        ),
    ]);
    table.add_row(vec![
        "Read timeout",
        &format!("{}s", config.http.read_timeout),
    ]);
    table.add_row(vec![
        "Job timeout",
        &format!("{}s", config.http.job_timeout),
    ]);
    eprintln!("\n{table}");

    let today = chrono::Utc::now().date_naive();
    let mut datasets = new_table(&[
        "Dataset",
        "Name",
        "Granularity",
        "Window",
        "Storage",
        "Key",
    ]);
    for spec in specs {
        datasets.add_row(vec![
            Cell::new(&spec.id),
            Cell::new(&spec.name),
            Cell::new(spec.granularity),
            Cell::new(effective_window(spec, today)),
            Cell::new(spec.storage.describe()),
            Cell::new(configured(spec.endpoint.key.as_deref())),
        ]);
    }
    eprintln!("{datasets}");
}
