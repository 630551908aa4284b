//! reqwest-backed [`Transport`]

use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use crate::downloader::config::IngestConfig;
use crate::fetcher::{Method, RawResponse, Transport, TransportError};

/// HTTP transport over a shared [`reqwest::Client`]
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    /// Build a client with the configured timeout
    pub fn new(config: &IngestConfig) -> Result<Self, TransportError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .user_agent(concat!("kline-backfill/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, &config.base_url))
    }

    /// Wrap an existing client
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Base URL requests are issued against
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> Result<RawResponse, TransportError> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!("{} {} with {} params", method, url, params.len());

        let mut request = match method {
            Method::Get => self.client.get(&url),
        };
        request = request.query(params);
        for (name, value) in headers {
            request = request.header(*name, value);
        }

        let response = request.send().await.map_err(map_reqwest_error)?;
        let status = response.status().as_u16();
        let retry_after = parse_retry_after(response.headers());
        let body = response.text().await.map_err(map_reqwest_error)?;

        Ok(RawResponse {
            status,
            retry_after,
            body,
        })
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else {
        TransportError::Other(err.to_string())
    }
}

/// `Retry-After` as delta-seconds. HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
