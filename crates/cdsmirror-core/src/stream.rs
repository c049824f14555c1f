//! HTTP streaming with read timeout.
//!
//! Uses async reqwest internally with tokio::time::timeout for stall detection,
//! but presents a sync `Read` interface so fetch workers stay plain threads.

use std::future::Future;
use std::io::{self, Read};
use std::pin::Pin;
use std::sync::LazyLock;
use std::task::Context;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncRead, ReadBuf};

use crate::error::FetchError;

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared async HTTP client with connection pooling.
static SHARED_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .pool_max_idle_per_host(8)
        .user_agent(concat!("cdsmirror/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("failed to build HTTP client")
});

/// Get shared HTTP client.
pub fn http_client() -> &'static reqwest::Client {
    &SHARED_CLIENT
}

/// Shared tokio runtime for HTTP and object-store operations.
pub static SHARED_RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .expect("failed to build tokio runtime")
});

/// Drive a future to completion on the shared runtime.
///
/// Must not be called from inside an async context.
pub fn block_on<F: Future>(fut: F) -> F::Output {
    SHARED_RUNTIME.handle().block_on(fut)
}

/// Streaming HTTP response body with length check and stall detection
pub type HttpReader = CountingReader<TimeoutReader>;

/// Send a request and turn a non-2xx response into a classified error.
///
/// The error body is kept in the message because the archive explains
/// "not available yet" there rather than in the status code.
pub async fn send_checked(request: reqwest::RequestBuilder) -> Result<reqwest::Response, FetchError> {
    let response = request.send().await.map_err(FetchError::from_reqwest)?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(FetchError::from_status(status.as_u16(), body))
}

/// HTTP GET → blocking reader over the body
///
/// Returns (reader, total_bytes). When the server announced a length the
/// reader fails at end of stream if the body does not match it.
pub fn open_reader(
    request: reqwest::RequestBuilder,
    read_timeout: Duration,
) -> Result<(HttpReader, Option<u64>), FetchError> {
    let (reader, total_bytes) = block_on(async {
        let response = send_checked(request).await?;
        let total_bytes = response.content_length();

        // Convert response body stream to AsyncRead
        let stream = response.bytes_stream();
        let async_reader = tokio_util::io::StreamReader::new(
            stream.map(|result| result.map_err(io::Error::other)),
        );

        Ok::<_, FetchError>((
            TimeoutReader::new(Box::pin(async_reader), read_timeout),
            total_bytes,
        ))
    })?;

    Ok((CountingReader::new(reader, total_bytes), total_bytes))
}

/// Reader wrapper that counts bytes and checks them against the expected
/// length, so a body cut short never reads as a clean end of stream.
pub struct CountingReader<R> {
    inner: R,
    count: u64,
    expected: Option<u64>,
}

impl<R> CountingReader<R> {
    pub fn new(inner: R, expected: Option<u64>) -> Self {
        Self {
            inner,
            count: 0,
            expected,
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<R: Read> Read for CountingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        match self.expected {
            Some(expected) if n == 0 && !buf.is_empty() && self.count < expected => {
                Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("body ended after {} of {expected} bytes", self.count),
                ))
            }
            Some(expected) if self.count > expected => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("body exceeds announced length of {expected} bytes"),
            )),
            _ => Ok(n),
        }
    }
}

/// Async-to-sync bridge with read timeout.
///
/// Each read has a timeout - if no data arrives within `timeout`, returns
/// a TimedOut error (which the executor treats as transient).
pub struct TimeoutReader {
    inner: Pin<Box<dyn AsyncRead + Send + Sync>>,
    timeout: Duration,
}

impl TimeoutReader {
    fn new(inner: Pin<Box<dyn AsyncRead + Send + Sync>>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

impl Read for TimeoutReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = self.timeout;
        block_on(async {
            let read_future = async {
                let mut read_buf = ReadBuf::new(buf);
                std::future::poll_fn(|cx: &mut Context<'_>| {
                    Pin::as_mut(&mut self.inner).poll_read(cx, &mut read_buf)
                })
                .await?;
                Ok::<_, io::Error>(read_buf.filled().len())
            };

            match tokio::time::timeout(timeout, read_future).await {
                Ok(result) => result,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("read timeout ({}s with no data)", timeout.as_secs()),
                )),
            }
        })
    }
}
