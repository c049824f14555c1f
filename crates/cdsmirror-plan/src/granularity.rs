//! Calendar resolution of a dataset's partitions

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Months, NaiveDate};
use serde::Deserialize;

use crate::error::ConfigError;

/// Ordered coarse to fine, so `Yearly < Monthly < Daily`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Yearly,
    Monthly,
    Daily,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Yearly => "yearly",
            Self::Monthly => "monthly",
            Self::Daily => "daily",
        }
    }

    /// Start of the period containing `day`.
    pub fn floor(&self, day: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::Yearly => NaiveDate::from_ymd_opt(day.year(), 1, 1),
            Self::Monthly => day.with_day(1),
            Self::Daily => Some(day),
        }
    }

    /// Start of the period following the one starting at `start`.
    pub fn next(&self, start: NaiveDate) -> Option<NaiveDate> {
        match self {
            Self::Yearly => start.checked_add_months(Months::new(12)),
            Self::Monthly => start.checked_add_months(Months::new(1)),
            Self::Daily => start.succ_opt(),
        }
    }

    /// Canonical key suffix for the period starting at `start`.
    ///
    /// Zero-padded so lexicographic order equals chronological order.
    pub fn key_suffix(&self, start: NaiveDate) -> String {
        match self {
            Self::Yearly => format!("{:04}", start.year()),
            Self::Monthly => format!("{:04}-{:02}", start.year(), start.month()),
            Self::Daily => format!("{:04}-{:02}-{:02}", start.year(), start.month(), start.day()),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yearly" | "year" => Ok(Self::Yearly),
            "monthly" | "month" => Ok(Self::Monthly),
            "daily" | "day" => Ok(Self::Daily),
            other => Err(ConfigError::UnknownGranularity(other.to_string())),
        }
    }
}
