//! Configuration errors: fatal before any planning starts

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// No configuration file could be located
    NotFound(String),
    /// File exists but could not be read or parsed
    Parse { path: String, message: String },
    UnknownDataset(String),
    UnknownGranularity(String),
    InvalidDate { field: String, value: String },
    EmptyYears { dataset: String },
    MissingField { dataset: String, field: &'static str },
    /// Anything else wrong with a single dataset definition
    Invalid { dataset: String, message: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(searched) => write!(f, "no configuration file found (searched: {searched})"),
            Self::Parse { path, message } => write!(f, "{path}: {message}"),
            Self::UnknownDataset(id) => write!(f, "dataset '{id}' is not configured"),
            Self::UnknownGranularity(g) => {
                write!(f, "unknown granularity '{g}' (expected yearly, monthly or daily)")
            }
            Self::InvalidDate { field, value } => {
                write!(f, "{field}: '{value}' is not a YYYY-MM-DD date")
            }
            Self::EmptyYears { dataset } => write!(f, "{dataset}: 'years' is set but empty"),
            Self::MissingField { dataset, field } => {
                write!(f, "{dataset}: missing required field '{field}'")
            }
            Self::Invalid { dataset, message } => write!(f, "{dataset}: {message}"),
        }
    }
}

impl std::error::Error for ConfigError {}
