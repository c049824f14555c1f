//! Error type for the fetch capability

use crate::retry::Retryable;

/// Failure of a single fetch attempt.
///
/// The executor retries `Transient` with backoff, records `Permanent` as a
/// failed partition, and treats `Unavailable` as "the archive has not
/// published this period yet" (later periods are not tried either).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// Network, rate limit, timeout or server-side failure
    Transient(String),
    /// Malformed request, authentication or other client-side failure
    Permanent(String),
    /// Requested period not yet published by the archive
    Unavailable(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient(msg) => write!(f, "transient: {msg}"),
            Self::Permanent(msg) => write!(f, "permanent: {msg}"),
            Self::Unavailable(msg) => write!(f, "not available yet: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

impl Retryable for FetchError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Archive messages meaning "come back later" rather than "bad request".
fn is_unavailable_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("not available yet") || lower.contains("not yet available")
}

impl FetchError {
    /// Classify an HTTP status plus response body.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if is_unavailable_message(&message) {
            return Self::Unavailable(message);
        }
        match status {
            408 | 425 | 429 | 500..=599 => Self::Transient(format!("HTTP {status}: {message}")),
            _ => Self::Permanent(format!("HTTP {status}: {message}")),
        }
    }

    /// Classify a reqwest error. URLs are stripped so signed download
    /// links do not end up in logs.
    pub fn from_reqwest(e: reqwest::Error) -> Self {
        let status = e.status();
        let fatal = e.is_builder() || e.is_redirect();
        let message = e.without_url().to_string();
        if let Some(status) = status {
            return Self::from_status(status.as_u16(), message);
        }
        if fatal {
            Self::Permanent(message)
        } else {
            // connect, timeout, body and decode errors are worth another attempt
            Self::Transient(message)
        }
    }

    /// Classify a local I/O error hit while streaming the payload.
    pub fn from_io(e: &std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::StorageFull | std::io::ErrorKind::PermissionDenied => {
                Self::Permanent(format!("IO: {e}"))
            }
            _ => Self::Transient(format!("IO: {e}")),
        }
    }

    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;

    #[test]
    fn rate_limit_and_server_errors_are_transient() {
        assert!(FetchError::from_status(429, "slow down").is_retryable());
        assert!(FetchError::from_status(500, "oops").is_retryable());
        assert!(FetchError::from_status(503, "maintenance").is_retryable());
    }

    #[test]
    fn client_errors_are_permanent() {
        for status in [400, 401, 403, 404, 422] {
            let err = FetchError::from_status(status, "bad");
            assert!(matches!(err, FetchError::Permanent(_)), "{status}");
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn not_available_yet_wins_over_status() {
        let err = FetchError::from_status(
            400,
            "The job failed with: None of the data you have requested is available yet, \
             data not available yet for 2025-08-04",
        );
        assert!(err.is_unavailable());
        assert!(!err.is_retryable());
    }

    #[test]
    fn io_storage_full_is_permanent() {
        let err = FetchError::from_io(&std::io::Error::new(ErrorKind::StorageFull, "disk full"));
        assert!(matches!(err, FetchError::Permanent(_)));
    }

    #[test]
    fn io_reset_is_transient() {
        let err = FetchError::from_io(&std::io::Error::new(ErrorKind::ConnectionReset, "reset"));
        assert!(err.is_retryable());
    }

    #[test]
    fn display_prefixes_kind() {
        assert_eq!(
            FetchError::Transient("timeout".into()).to_string(),
            "transient: timeout"
        );
        assert!(FetchError::from_status(404, "gone")
            .to_string()
            .contains("HTTP 404"));
    }
}
