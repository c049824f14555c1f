//! Retry with bounded exponential backoff

use std::fmt::Display;
use std::time::Duration;

use indicatif::ProgressBar;

use crate::shutdown::is_shutdown_requested;

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

/// Bounded exponential backoff: `base * 2^(attempt-1)`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    /// Policy that retries without sleeping.
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Sleep in short slices so a shutdown request cuts the wait short.
fn sleep_unless_shutdown(total: Duration) {
    const SLICE: Duration = Duration::from_millis(250);
    let mut left = total;
    while !left.is_zero() && !is_shutdown_requested() {
        let step = left.min(SLICE);
        std::thread::sleep(step);
        left -= step;
    }
}

/// Retry a fallible operation with exponential backoff.
///
/// `attempt_fn` receives the 0-based attempt number. Retryable errors are
/// logged, shown on the progress bar and retried up to `policy.max_retries`
/// times; the final error (exhausted or non-retryable) is returned as is.
/// A pending shutdown stops further attempts.
pub fn retry_with_backoff<T, E>(
    label: &str,
    policy: &RetryPolicy,
    pb: &ProgressBar,
    mut attempt_fn: impl FnMut(u32) -> Result<T, E>,
) -> Result<T, E>
where
    E: Retryable + Display,
{
    let mut attempt = 0u32;
    loop {
        match attempt_fn(attempt) {
            Ok(v) => return Ok(v),
            Err(e)
                if attempt < policy.max_retries
                    && e.is_retryable()
                    && !is_shutdown_requested() =>
            {
                attempt += 1;
                let delay = policy.backoff(attempt);
                pb.set_message(format!("retry {attempt}/{}...", policy.max_retries));
                log::warn!(
                    "{label}: attempt {attempt}/{} failed: {e}, retrying in {delay:?}",
                    policy.max_retries
                );
                sleep_unless_shutdown(delay);
            }
            Err(e) => {
                if e.is_retryable() && attempt >= policy.max_retries {
                    log::error!("{label}: giving up after {} attempts: {e}", attempt + 1);
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Flaky(bool);

    impl Retryable for Flaky {
        fn is_retryable(&self) -> bool {
            self.0
        }
    }

    impl Display for Flaky {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "flaky({})", self.0)
        }
    }

    #[test]
    fn backoff_exponential() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
        assert_eq!(policy.backoff(3), Duration::from_secs(8));
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy {
            max_retries: 40,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        };
        assert_eq!(policy.backoff(10), Duration::from_secs(60));
        assert_eq!(policy.backoff(40), Duration::from_secs(60));
    }

    #[test]
    fn retries_transient_until_success() {
        let pb = ProgressBar::hidden();
        let mut calls = 0;
        let result = retry_with_backoff("t", &RetryPolicy::immediate(3), &pb, |_| {
            calls += 1;
            if calls < 3 { Err(Flaky(true)) } else { Ok(calls) }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn stops_after_max_retries() {
        let pb = ProgressBar::hidden();
        let mut calls = 0;
        let result: Result<(), Flaky> =
            retry_with_backoff("t", &RetryPolicy::immediate(2), &pb, |_| {
                calls += 1;
                Err(Flaky(true))
            });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn non_retryable_fails_immediately() {
        let pb = ProgressBar::hidden();
        let mut calls = 0;
        let result: Result<(), Flaky> =
            retry_with_backoff("t", &RetryPolicy::immediate(5), &pb, |_| {
                calls += 1;
                Err(Flaky(false))
            });
        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
