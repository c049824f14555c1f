//! cdsmirror-plan: incremental request planning and execution
//!
//! ```text
//! DatasetSpec ─► clamp (effective window) ─► enumerate (candidates)
//!                                              │
//!                    Storage::exists ◄─────────┘
//!                          │
//!                  missing partitions ─► Executor ─► Fetcher + Storage
//! ```

pub mod clamp;
pub mod dataset;
pub mod driver;
pub mod error;
pub mod executor;
pub mod granularity;
pub mod partition;
pub mod planner;
pub mod request;

pub use clamp::{ClampResolver, EffectiveWindow, SiblingOverlap, effective_window, sibling_overlaps};
pub use dataset::{DatasetSpec, Endpoint, StorageTarget, parse_date};
pub use driver::{Backends, DatasetReport, DatasetStatus, Driver, RunSummary};
pub use error::ConfigError;
pub use executor::{Claim, ClaimSet, Executor, ExecutorOptions, FailedPartition, Outcome, PartitionError};
pub use granularity::Granularity;
pub use partition::{CalendarFilter, Partition, enumerate, partition_key};
pub use planner::{Plan, plan};
pub use request::RequestTemplate;
