//! Rate-limited request execution with retry and backoff
//!
//! One logical request may take several attempts. Every attempt first draws its
//! weight from the shared [`RateLimiter`], then goes through the [`Transport`],
//! status classification and the caller's decoder. The outcome of each attempt is
//! reported to the injected observer; the executor itself never logs about attempts.

use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::downloader::config::{IngestConfig, API_KEY_HEADER};
use crate::downloader::rate_limit::RateLimiter;
use crate::fetcher::retry::next_delay;
use crate::fetcher::{FetcherError, FetcherResult, Method, RawResponse, Transport, TransportError};
use crate::observer::{AttemptEvent, AttemptOutcome, IngestObserver};

/// A request that failed for good, with the number of attempts it consumed
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct RequestFailure {
    /// Attempts made, including the last one
    pub attempts: u32,
    /// The last error, unchanged
    pub error: FetcherError,
}

/// Executor shared by every job so all requests draw from one rate-limit budget
pub struct RateLimitedRequestExecutor {
    transport: Arc<dyn Transport>,
    config: Arc<IngestConfig>,
    observer: Arc<dyn IngestObserver>,
    rate_limiter: RateLimiter,
}

impl RateLimitedRequestExecutor {
    /// Create an executor with a rate limiter sized from `config`
    pub fn new(
        transport: Arc<dyn Transport>,
        config: Arc<IngestConfig>,
        observer: Arc<dyn IngestObserver>,
    ) -> Self {
        let rate_limiter = RateLimiter::from_config(&config.rate_limit);
        Self::with_rate_limiter(transport, config, observer, rate_limiter)
    }

    /// Create an executor around an existing limiter
    pub fn with_rate_limiter(
        transport: Arc<dyn Transport>,
        config: Arc<IngestConfig>,
        observer: Arc<dyn IngestObserver>,
        rate_limiter: RateLimiter,
    ) -> Self {
        Self {
            transport,
            config,
            observer,
            rate_limiter,
        }
    }

    /// The shared limiter
    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    /// Execute a request and return the parsed JSON body
    pub async fn execute(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<Value, RequestFailure> {
        self.execute_decoded(method, endpoint, params, Ok).await
    }

    /// Execute a request and decode the JSON body with `decode`.
    ///
    /// Decoding runs inside the retry loop so a [`FetcherError::MalformedResponse`]
    /// raised by `decode` is retried within the malformed-response bound.
    pub async fn execute_decoded<T, F>(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        decode: F,
    ) -> Result<T, RequestFailure>
    where
        F: Fn(Value) -> FetcherResult<T>,
    {
        let policy = &self.config.retry;
        let max_attempts = policy.max_attempts();
        let symbol = params
            .iter()
            .find(|(name, _)| *name == "symbol")
            .map(|(_, value)| value.as_str())
            .unwrap_or_default();
        let headers = self.headers();

        let mut malformed_retries = 0u32;
        let mut attempt = 0u32;
        let mut previous_backoff = None;

        loop {
            attempt += 1;

            self.rate_limiter
                .acquire(self.config.rate_limit.request_weight)
                .await
                .map_err(|e| RequestFailure {
                    attempts: attempt,
                    error: FetcherError::NetworkTransient(TransportError::Other(e.to_string())),
                })?;

            let started = Instant::now();
            let result = self
                .attempt_once(method, endpoint, params, &headers)
                .await
                .and_then(&decode);
            let latency = started.elapsed();

            let error = match result {
                Ok(value) => {
                    self.emit(endpoint, symbol, attempt, max_attempts, latency, AttemptOutcome::Success, None);
                    return Ok(value);
                }
                Err(error) => error,
            };

            let kind = error.kind();
            let within_bound = match error {
                FetcherError::MalformedResponse(_) => malformed_retries < policy.max_malformed_retries,
                _ => kind.is_retryable(),
            };

            if !within_bound || attempt >= max_attempts {
                self.emit(
                    endpoint,
                    symbol,
                    attempt,
                    max_attempts,
                    latency,
                    AttemptOutcome::Failed { kind },
                    Some(error.to_string()),
                );
                return Err(RequestFailure {
                    attempts: attempt,
                    error,
                });
            }

            if matches!(error, FetcherError::MalformedResponse(_)) {
                malformed_retries += 1;
            }

            let backoff = next_delay(policy, attempt, error.retry_after(), previous_backoff);
            previous_backoff = Some(backoff);
            self.emit(
                endpoint,
                symbol,
                attempt,
                max_attempts,
                latency,
                AttemptOutcome::Retrying { kind, backoff },
                Some(error.to_string()),
            );
            tokio::time::sleep(backoff).await;
        }
    }

    async fn attempt_once(
        &self,
        method: Method,
        endpoint: &str,
        params: &[(&str, String)],
        headers: &[(&str, String)],
    ) -> FetcherResult<Value> {
        let response = self
            .transport
            .execute(method, endpoint, params, headers)
            .await?;
        classify(response)
    }

    fn headers(&self) -> Vec<(&'static str, String)> {
        match &self.config.api_key {
            Some(key) => vec![(API_KEY_HEADER, key.clone())],
            None => Vec::new(),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn emit(
        &self,
        endpoint: &str,
        symbol: &str,
        attempt: u32,
        max_attempts: u32,
        latency: Duration,
        outcome: AttemptOutcome,
        message: Option<String>,
    ) {
        self.observer.on_attempt(&AttemptEvent {
            endpoint: endpoint.to_string(),
            symbol: symbol.to_string(),
            attempt,
            max_attempts,
            latency,
            outcome,
            message,
        });
    }
}

/// Map a raw response onto the error taxonomy
pub fn classify(response: RawResponse) -> FetcherResult<Value> {
    let RawResponse {
        status,
        retry_after,
        body,
    } = response;

    match status {
        200..=299 => serde_json::from_str(&body)
            .map_err(|e| FetcherError::MalformedResponse(format!("invalid JSON body: {e}"))),
        401 | 403 => Err(FetcherError::Authentication {
            status,
            message: body,
        }),
        418 | 429 => Err(FetcherError::RateLimitExceeded {
            status,
            retry_after,
        }),
        500..=599 => Err(FetcherError::NetworkTransient(TransportError::Server {
            status,
            message: body,
        })),
        _ => Err(FetcherError::Rejected {
            status,
            message: body,
        }),
    }
}
