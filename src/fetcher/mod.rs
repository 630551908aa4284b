//! Transport boundary, wire decoding and request execution
//!
//! The [`Transport`] trait is the only place the crate touches the network. Everything
//! above it (status classification, retry, rate limiting, decoding) is
//! transport-agnostic so the engine can be driven by an in-memory fake in tests.

use async_trait::async_trait;
use std::time::Duration;

pub mod executor;
pub mod http;
pub mod kline;
pub mod retry;

pub use executor::{RateLimitedRequestExecutor, RequestFailure};
pub use kline::{KlineParser, KlineQuery};
pub use retry::ErrorKind;

/// Transport-level failure: the round trip did not produce a usable HTTP response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Request timed out
    #[error("request timed out: {0}")]
    Timeout(String),

    /// Connection refused, DNS failure or other offline condition
    #[error("connection failed: {0}")]
    Connect(String),

    /// Server answered with a 5xx status
    #[error("server error (HTTP {status}): {message}")]
    Server {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// Any other transport problem
    #[error("transport error: {0}")]
    Other(String),
}

/// Fetcher errors
///
/// `NetworkTransient` and `RateLimitExceeded` are retried by the executor,
/// `MalformedResponse` is retried within a smaller bound, the rest are fatal.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetcherError {
    /// Transient network or server failure
    #[error("transient network error: {0}")]
    NetworkTransient(#[from] TransportError),

    /// HTTP 429 / 418 from the exchange
    #[error("rate limit exceeded (HTTP {status})")]
    RateLimitExceeded {
        /// HTTP status code
        status: u16,
        /// Server-suggested wait before the next request
        retry_after: Option<Duration>,
    },

    /// HTTP 401 / 403
    #[error("authentication failed (HTTP {status}): {message}")]
    Authentication {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },

    /// Body could not be decoded into the expected rows
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Any other 4xx: the request itself is wrong
    #[error("request rejected (HTTP {status}): {message}")]
    Rejected {
        /// HTTP status code
        status: u16,
        /// Response body
        message: String,
    },
}

impl FetcherError {
    /// Classification used for retry decisions and user messaging
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetcherError::NetworkTransient(TransportError::Timeout(_)) => ErrorKind::NetworkTimeout,
            FetcherError::NetworkTransient(TransportError::Connect(_)) => ErrorKind::NetworkOffline,
            FetcherError::NetworkTransient(TransportError::Server { status, .. }) => {
                ErrorKind::ServerError(*status)
            }
            FetcherError::NetworkTransient(TransportError::Other(_)) => ErrorKind::NetworkGeneric,
            FetcherError::RateLimitExceeded { .. } => ErrorKind::RateLimit,
            FetcherError::Authentication { status, .. } => ErrorKind::AuthFailed(*status),
            FetcherError::MalformedResponse(_) => ErrorKind::MalformedResponse,
            FetcherError::Rejected { status: 400, .. } => ErrorKind::InvalidRequest,
            FetcherError::Rejected { status, .. } => ErrorKind::ClientError(*status),
        }
    }

    /// Server-suggested wait, if any
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetcherError::RateLimitExceeded { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

/// HTTP method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
        }
    }
}

/// Unclassified response from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code
    pub status: u16,
    /// Parsed `Retry-After` header
    pub retry_after: Option<Duration>,
    /// Response body
    pub body: String,
}

impl RawResponse {
    /// 200 response with the given body
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            retry_after: None,
            body: body.into(),
        }
    }

    /// Response with an arbitrary status
    pub fn with_status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            retry_after: None,
            body: body.into(),
        }
    }
}

/// Upstream HTTP capability
///
/// Implementations only perform the round trip. They must not retry, throttle or
/// interpret status codes; the executor owns all of that.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one request
    async fn execute(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<RawResponse, TransportError>;
}
