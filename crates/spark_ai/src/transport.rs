//! The single outbound HTTP seam.
//!
//! Dispatch never touches `reqwest` directly; it hands a fully-built
//! [`WireRequest`] to an [`HttpTransport`]. Swapping the transport is how
//! tests observe (and count) network traffic.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::StreamExt;
use tracing::{debug, warn};

/// Default whole-request timeout.
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Streams may legitimately run much longer than a single response.
const STREAM_TIMEOUT_FACTOR: u32 = 5;

/// Raw response body chunks of a streamed request.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

/// Failure before (or while) receiving an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("network error: {0}")]
    Other(String),
}

/// A POST with a JSON body, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct WireRequest {
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: serde_json::Value,
}

impl WireRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// A fully-read response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireResponse {
    pub status: u16,
    pub body: String,
}

impl WireResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A response whose body is consumed incrementally.
pub struct StreamingResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl StreamingResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Drain the body into a string (used for error bodies).
    pub async fn into_text(mut self) -> Result<String, TransportError> {
        let mut raw = Vec::new();
        while let Some(chunk) = self.body.next().await {
            raw.extend_from_slice(&chunk?);
        }
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send the request and read the whole body.
    async fn execute(&self, request: WireRequest) -> Result<WireResponse, TransportError>;

    /// Send the request and return as soon as the status line arrives.
    async fn execute_streaming(
        &self,
        request: WireRequest,
    ) -> Result<StreamingResponse, TransportError>;
}

// ---------------------------------------------------------------------------
// reqwest implementation
// ---------------------------------------------------------------------------

/// Production transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    /// `timeout` bounds both connecting and each whole request.
    pub fn try_new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client, timeout })
    }

    /// As [`try_new`](Self::try_new), falling back to a default client if the
    /// builder fails. Requests still carry the per-request timeout.
    pub fn new(timeout: Duration) -> Self {
        Self::try_new(timeout).unwrap_or_else(|e| {
            warn!("{e}; using default HTTP client without connect timeout");
            Self {
                client: reqwest::Client::new(),
                timeout,
            }
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn post(&self, request: &WireRequest, timeout: Duration) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(&request.url)
            .timeout(timeout)
            .header("Content-Type", "application/json")
            .json(&request.body);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        builder
    }
}

impl Default for ReqwestTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(REQUEST_TIMEOUT_SECS))
    }
}

/// Map a reqwest error to a [`TransportError`].
fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: WireRequest) -> Result<WireResponse, TransportError> {
        let resp = self
            .post(&request, self.timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(map_reqwest_error)?;
        debug!(status, bytes = body.len(), "response received");
        Ok(WireResponse { status, body })
    }

    async fn execute_streaming(
        &self,
        request: WireRequest,
    ) -> Result<StreamingResponse, TransportError> {
        let resp = self
            .post(&request, self.timeout * STREAM_TIMEOUT_FACTOR)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = resp.status().as_u16();
        debug!(status, "stream opened");
        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(map_reqwest_error))
            .boxed();
        Ok(StreamingResponse { status, body })
    }
}
