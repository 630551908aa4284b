//! Ingestion configuration and its defaults

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default REST base URL (Binance spot).
pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Klines endpoint path.
pub const KLINES_ENDPOINT: &str = "/api/v3/klines";

/// Header carrying the API key, when one is configured.
pub const API_KEY_HEADER: &str = "X-MBX-APIKEY";

/// Maximum rows per klines request.
/// The exchange rejects larger limits, so this is also the upper bound accepted by config validation.
pub const API_MAX_BARS: u32 = 1000;

/// Pause between successful chunks in milliseconds.
pub const POLITENESS_DELAY_MS: u64 = 100;

/// Maximum number of retries for failed requests.
/// 5 retries with exponential backoff gives a total wait of roughly a minute.
pub const MAX_RETRIES: u32 = 5;

/// Maximum number of retries for responses that cannot be decoded.
pub const MAX_MALFORMED_RETRIES: u32 = 2;

/// Initial backoff delay in milliseconds.
pub const INITIAL_BACKOFF_MS: u64 = 1000; // 1 second

/// Maximum backoff delay in milliseconds.
pub const MAX_BACKOFF_MS: u64 = 30000; // 30 seconds

/// Upper bound of the random jitter added to each backoff, as a percentage of the base delay.
/// Must stay below 100 so successive delays keep increasing.
pub const BACKOFF_JITTER_PCT: u32 = 20;

/// Request weight budget per rate-limit window (Binance spot: 6000/min, kept conservative).
pub const RATE_LIMIT_WEIGHT: usize = 1200;

/// Rate-limit window in seconds.
pub const RATE_LIMIT_WINDOW_SECS: u64 = 60;

/// Weight of one klines request at limit 1000.
pub const KLINES_REQUEST_WEIGHT: usize = 2;

/// HTTP request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// `max_bars` outside `1..=API_MAX_BARS`
    #[error("max bars per request must be between 1 and {API_MAX_BARS}, got {0}")]
    MaxBars(u32),

    /// Jitter of 100% or more would let delays shrink between retries
    #[error("backoff jitter must be below 100%, got {0}%")]
    Jitter(u32),

    /// A single request would never fit in the rate-limit budget
    #[error("request weight {request_weight} exceeds rate-limit budget {max_weight}")]
    RequestWeight {
        /// Weight per request
        request_weight: usize,
        /// Budget per window
        max_weight: usize,
    },

    /// Empty base URL
    #[error("base URL must not be empty")]
    BaseUrl,
}

/// Retry and backoff policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt for transient and rate-limit failures
    pub max_retries: u32,
    /// Retries after a malformed response
    pub max_malformed_retries: u32,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Delay cap
    pub max_backoff: Duration,
    /// Jitter bound as a percentage of the base delay
    pub jitter_pct: u32,
}

impl RetryPolicy {
    /// Total attempts per request, including the first
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            max_malformed_retries: MAX_MALFORMED_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(MAX_BACKOFF_MS),
            jitter_pct: BACKOFF_JITTER_PCT,
        }
    }
}

/// Shared request budget
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Weight units available per window
    pub max_weight: usize,
    /// Window length
    pub window: Duration,
    /// Weight drawn by each request attempt
    pub request_weight: usize,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_weight: RATE_LIMIT_WEIGHT,
            window: Duration::from_secs(RATE_LIMIT_WINDOW_SECS),
            request_weight: KLINES_REQUEST_WEIGHT,
        }
    }
}

/// Immutable ingestion configuration, built once and shared as `Arc<IngestConfig>`
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestConfig {
    /// REST base URL
    pub base_url: String,
    /// Klines endpoint path
    pub klines_endpoint: String,
    /// Rows requested per window
    pub max_bars: u32,
    /// Pause after each successful chunk
    pub politeness_delay: Duration,
    /// Retry policy
    pub retry: RetryPolicy,
    /// Rate-limit budget
    pub rate_limit: RateLimitConfig,
    /// HTTP request timeout
    pub request_timeout: Duration,
    /// API key forwarded as a header; never written out
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            klines_endpoint: KLINES_ENDPOINT.to_string(),
            max_bars: API_MAX_BARS,
            politeness_delay: Duration::from_millis(POLITENESS_DELAY_MS),
            retry: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
            request_timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for IngestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestConfig")
            .field("base_url", &self.base_url)
            .field("klines_endpoint", &self.klines_endpoint)
            .field("max_bars", &self.max_bars)
            .field("politeness_delay", &self.politeness_delay)
            .field("retry", &self.retry)
            .field("rate_limit", &self.rate_limit)
            .field("request_timeout", &self.request_timeout)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl IngestConfig {
    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::BaseUrl);
        }
        if self.max_bars == 0 || self.max_bars > API_MAX_BARS {
            return Err(ConfigError::MaxBars(self.max_bars));
        }
        if self.retry.jitter_pct >= 100 {
            return Err(ConfigError::Jitter(self.retry.jitter_pct));
        }
        if self.rate_limit.request_weight > self.rate_limit.max_weight {
            return Err(ConfigError::RequestWeight {
                request_weight: self.rate_limit.request_weight,
                max_weight: self.rate_limit.max_weight,
            });
        }
        Ok(())
    }
}
