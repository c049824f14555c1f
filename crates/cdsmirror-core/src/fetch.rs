//! The fetch capability: one request in, one byte stream out

use std::io::Read;

use serde_json::{Map, Value};

use crate::error::FetchError;
use crate::period::DateRange;

/// Raw payload of a successful fetch.
pub type FetchStream = Box<dyn Read + Send>;

/// Concrete request for one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Remote dataset identifier
    pub dataset: String,
    /// Request template with the partition's year/month/day substituted
    pub params: Map<String, Value>,
    /// Date range the request covers (clipped to the effective window)
    pub range: DateRange,
}

/// Anything that can turn a [`FetchRequest`] into bytes.
///
/// Implementations classify their failures; the executor owns retries.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchStream, FetchError>;
}

impl<F: Fetcher + ?Sized> Fetcher for &F {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchStream, FetchError> {
        (**self).fetch(request)
    }
}

impl<F: Fetcher + ?Sized> Fetcher for Box<F> {
    fn fetch(&self, request: &FetchRequest) -> Result<FetchStream, FetchError> {
        (**self).fetch(request)
    }
}
