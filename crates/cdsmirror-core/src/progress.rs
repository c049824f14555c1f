//! Progress reporting for TTY and non-TTY environments.
//!
//! TTY mode: one status line per dataset plus a spinner per in-flight partition.
//! Non-TTY mode: hidden bars, logs carry the progress.

use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

/// Per-partition line: spinner, key, bytes so far, status message
fn partition_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("  {spinner:.green} {prefix:<32.dim} {binary_bytes:>9} {wide_msg:.dim}")
        .expect("invalid template")
}

/// Dataset line: bar over planned partitions
fn dataset_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{prefix:<20.cyan.bold} {bar:30.green/dim} {pos:>5}/{len:5} {wide_msg}")
        .expect("invalid template")
        .progress_chars("━╸━")
}

/// Central progress context managing multi-progress bars.
pub struct ProgressContext {
    multi: MultiProgress,
    is_tty: bool,
}

impl ProgressContext {
    /// Create new context, detecting TTY automatically.
    pub fn new() -> Self {
        Self::with_tty(std::io::stderr().is_terminal())
    }

    /// Context that never draws (tests, `--dry-run`).
    pub fn hidden() -> Self {
        Self::with_tty(false)
    }

    fn with_tty(is_tty: bool) -> Self {
        Self {
            multi: MultiProgress::new(),
            is_tty,
        }
    }

    /// Bar counting a dataset's planned partitions.
    pub fn dataset_bar(&self, name: &str, planned: u64) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new(planned));
        pb.set_style(dataset_style());
        pb.set_prefix(truncate(name, 20).to_string());
        pb
    }

    /// Spinner for one in-flight partition. Clear it with `finish_and_clear`.
    pub fn partition_bar(&self, key: &str) -> ProgressBar {
        if !self.is_tty {
            return ProgressBar::hidden();
        }
        let pb = self.multi.add(ProgressBar::new_spinner());
        pb.set_style(partition_style());
        pb.set_prefix(truncate(key, 32).to_string());
        pb.enable_steady_tick(Duration::from_millis(120));
        pb
    }

    /// Whether running in TTY mode.
    pub fn is_tty(&self) -> bool {
        self.is_tty
    }

    /// Get reference to `MultiProgress` for log bridge.
    pub fn multi(&self) -> &MultiProgress {
        &self.multi
    }
}

impl Default for ProgressContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep the tail of long keys: the date part is the informative bit.
fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut start = s.len() - max;
    while !s.is_char_boundary(start) {
        start += 1;
    }
    &s[start..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_keeps_tail() {
        assert_eq!(truncate("era5/2025-08-01", 32), "era5/2025-08-01");
        assert_eq!(
            truncate("reanalysis-era5-single-levels/2025-08-01", 10),
            "2025-08-01"
        );
    }

    #[test]
    fn hidden_context_hands_out_hidden_bars() {
        let ctx = ProgressContext::hidden();
        assert!(!ctx.is_tty());
        assert!(ctx.partition_bar("era5/2020").is_hidden());
        assert!(ctx.dataset_bar("era5", 3).is_hidden());
    }
}
