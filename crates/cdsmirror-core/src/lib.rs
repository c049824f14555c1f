//! cdsmirror core - shared infrastructure for the archive mirror
//!
//! HTTP plumbing, the fetch capability and its CDS implementation,
//! retry policy, logging, progress reporting and graceful shutdown.

pub mod cds;
pub mod error;
pub mod fetch;
pub mod logging;
pub mod period;
pub mod progress;
pub mod retry;
pub mod shutdown;
pub mod stream;
pub mod work_queue;

// Re-exports for convenience
pub use cds::{CdsClient, CdsSettings};
pub use error::FetchError;
pub use fetch::{FetchRequest, FetchStream, Fetcher};
pub use logging::{IndicatifLogger, init_logging};
pub use period::DateRange;
pub use progress::ProgressContext;
pub use retry::{Retryable, RetryPolicy, retry_with_backoff};
pub use shutdown::{install_signal_handlers, is_shutdown_requested, shutdown_flag};
pub use stream::{SHARED_RUNTIME, block_on, http_client};
pub use work_queue::WorkQueue;
