//! Default mode: plan every selected dataset and fetch what is missing

use std::process::ExitCode;

use comfy_table::{Cell, Color};
use indicatif::HumanBytes;

use cdsmirror_core::{CdsClient, Fetcher, ProgressContext, shutdown_flag};
use cdsmirror_plan::{
    Backends, DatasetReport, DatasetSpec, DatasetStatus, Driver, ExecutorOptions, RunSummary,
};
use cdsmirror_store::{Storage, StorageError};

use super::new_table;
use crate::config::Config;

/// Storage from each dataset's target, a CDS client per endpoint.
struct CliBackends<'a> {
    config: &'a Config,
}

impl Backends for CliBackends<'_> {
    fn storage(&self, spec: &DatasetSpec) -> Result<Box<dyn Storage>, StorageError> {
        spec.storage.open()
    }

    fn fetcher(&self, spec: &DatasetSpec) -> Box<dyn Fetcher> {
        Box::new(CdsClient::new(self.config.cds_settings(&spec.endpoint)))
    }
}

pub fn run(
    specs: &[DatasetSpec],
    config: &Config,
    options: ExecutorOptions,
    dry_run: bool,
    progress: &ProgressContext,
) -> RunSummary {
    // one clock reading for the whole run
    let now = chrono::Utc::now().date_naive();
    log::info!(
        "Run date {now}, {} dataset(s), {} worker(s) each",
        specs.len(),
        options.workers
    );

    let driver = Driver::new(now, options, progress, shutdown_flag()).dry_run(dry_run);
    let summary = driver.run(specs, &CliBackends { config });
    summary.log();

    if dry_run {
        print_plan(&summary);
    } else {
        print_summary(&summary);
    }
    summary
}

/// 0 on success, 1 on any failed partition or dataset, 130 if interrupted.
pub fn exit_code(summary: &RunSummary) -> ExitCode {
    ExitCode::from(exit_status(summary))
}

fn exit_status(summary: &RunSummary) -> u8 {
    if summary.interrupted {
        130
    } else if summary.has_failures() {
        1
    } else {
        0
    }
}

fn status_cell(report: &DatasetReport) -> Cell {
    let status = report.status();
    let color = match status {
        DatasetStatus::Complete | DatasetStatus::Planned => Color::Green,
        DatasetStatus::Deferred | DatasetStatus::Cancelled => Color::Yellow,
        DatasetStatus::Failed | DatasetStatus::Error => Color::Red,
    };
    Cell::new(status.as_str()).fg(color)
}

/// Per-dataset counts after a real run.
fn print_summary(summary: &RunSummary) {
    let mut table = new_table(&[
        "Dataset",
        "Planned",
        "Fetched",
        "Present",
        "Failed",
        "Deferred",
        "Cancelled",
        "Bytes",
        "Status",
    ]);
    for d in &summary.datasets {
        table.add_row(vec![
            Cell::new(&d.id),
            Cell::new(d.planned),
            Cell::new(d.outcome.fetched),
            Cell::new(d.present + d.outcome.already_present),
            Cell::new(d.outcome.failed_count()),
            Cell::new(d.outcome.deferred),
            Cell::new(d.outcome.cancelled),
            Cell::new(HumanBytes(d.outcome.bytes).to_string()),
            status_cell(d),
        ]);
    }
    eprintln!("\n{table}");

    for d in &summary.datasets {
        if let Some(err) = &d.error {
            eprintln!("  {}: {err}", d.id);
        }
        for f in &d.outcome.failed {
            eprintln!("  {}: {}", f.key, f.error);
        }
    }
    eprintln!(
        "\n{} fetched ({}), {} failed in {:.1}s",
        summary.fetched(),
        HumanBytes(summary.bytes()),
        summary.failed(),
        summary.elapsed.as_secs_f64()
    );
}

/// Compact range of missing keys: `first … last`.
fn key_span(keys: &[String]) -> String {
    match keys {
        [] => "-".to_string(),
        [only] => only.clone(),
        [first, .., last] => format!("{first} … {last}"),
    }
}

/// Dry run: window and missing keys per dataset.
fn print_plan(summary: &RunSummary) {
    let mut table = new_table(&["Dataset", "Window", "Present", "Missing", "Keys", "Status"]);
    for d in &summary.datasets {
        let window = d
            .window
            .map(|w| w.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(&d.id),
            Cell::new(window),
            Cell::new(d.present),
            Cell::new(d.missing.len()),
            Cell::new(key_span(&d.missing)),
            status_cell(d),
        ]);
    }
    eprintln!("\n{table}");
    for d in &summary.datasets {
        if let Some(err) = &d.error {
            eprintln!("  {}: {err}", d.id);
        }
        for key in &d.missing {
            log::debug!("would fetch {key}");
        }
    }
}
