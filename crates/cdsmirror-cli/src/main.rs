//! cdsmirror - incremental mirror of Copernicus climate reanalysis data
//!
//! Plans the date partitions each configured dataset is missing from
//! storage and fetches only those. Safe to rerun at any time.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

mod cmd;
mod config;

use cdsmirror_core::ProgressContext;
use cdsmirror_plan::{ConfigError, ExecutorOptions};
use config::Config;

#[derive(Parser)]
#[command(name = "cdsmirror")]
#[command(about = "Incremental mirror of date-partitioned CDS datasets")]
#[command(version)]
struct Cli {
    /// Only process this dataset id (default: every configured dataset)
    dataset: Option<String>,

    /// Config file path (default: $CDSMIRROR_CONFIG, ./cdsmirror.toml or the user config dir)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Concurrent fetches per dataset
    #[arg(short, long)]
    workers: Option<usize>,

    /// Maximum retry attempts for transient failures
    #[arg(long)]
    max_retries: Option<u32>,

    /// Override the embargo (days behind today) for every dataset
    #[arg(long)]
    embargo_days: Option<u32>,

    /// Plan only: show what would be fetched
    #[arg(long, group = "mode")]
    dry_run: bool,

    /// List completed partitions
    #[arg(long, group = "mode")]
    list: bool,

    /// Check stored artifacts against their markers
    #[arg(long, group = "mode")]
    verify: bool,

    /// Show resolved configuration and dataset windows
    #[arg(long, group = "mode")]
    show_config: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Progress context (TTY auto-detect)
    let progress = ProgressContext::new();

    // Logging:
    //   TTY:     warn unless --debug, progress bars show activity
    //   non-TTY: info unless --debug, logs are the only progress indicator
    let multi = progress.is_tty().then(|| progress.multi());
    cdsmirror_core::init_logging(cli.debug, multi);
    cdsmirror_core::install_signal_handlers();

    match dispatch(cli, &progress) {
        Ok(code) => code,
        Err(e) => {
            log::error!("{e:#}");
            if e.chain().any(|c| c.is::<ConfigError>()) {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn dispatch(cli: Cli, progress: &ProgressContext) -> Result<ExitCode> {
    let (config, origin) = Config::load(cli.config.as_deref())?;
    log::debug!("Loaded config from {}", origin.display());

    let specs = config
        .dataset_specs(cli.dataset.as_deref(), cli.embargo_days)
        .with_context(|| format!("invalid configuration in {}", origin.display()))?;

    if cli.show_config {
        cmd::show::show(&config, &origin, &specs);
        return Ok(ExitCode::SUCCESS);
    }
    if cli.list {
        cmd::markers::list(&specs)?;
        return Ok(ExitCode::SUCCESS);
    }
    if cli.verify {
        let bad = cmd::markers::verify(&specs)?;
        return Ok(if bad > 0 { ExitCode::FAILURE } else { ExitCode::SUCCESS });
    }

    let mut retry = config.retry_policy();
    if let Some(n) = cli.max_retries {
        retry.max_retries = n;
    }
    let options = ExecutorOptions {
        workers: cli.workers.unwrap_or(config.run.workers).max(1),
        retry,
    };
    let summary = cmd::run::run(&specs, &config, options, cli.dry_run, progress);
    Ok(cmd::run::exit_code(&summary))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn modes_are_exclusive() {
        assert!(Cli::try_parse_from(["cdsmirror", "--list", "--verify"]).is_err());
        assert!(Cli::try_parse_from(["cdsmirror", "--dry-run", "--show-config"]).is_err());
    }

    #[test]
    fn dataset_and_overrides() {
        let cli = Cli::try_parse_from([
            "cdsmirror",
            "era5-land-daily",
            "--workers",
            "4",
            "--embargo-days",
            "10",
            "--dry-run",
        ])
        .unwrap();
        assert_eq!(cli.dataset.as_deref(), Some("era5-land-daily"));
        assert_eq!(cli.workers, Some(4));
        assert_eq!(cli.embargo_days, Some(10));
        assert!(cli.dry_run);
        assert!(!cli.list);
    }
}
