//! Error classification and backoff scheduling for retried requests.

use crate::downloader::config::RetryPolicy;
use rand::Rng;
use std::time::Duration;

/// Classification of request failures for retry decisions and user messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Network timeout or connection stalled long enough to trigger a timeout
    NetworkTimeout,
    /// Connection refused, DNS failure, or other offline scenarios
    NetworkOffline,
    /// HTTP 5xx server error
    ServerError(u16),
    /// Generic fallback when no better classification fits
    NetworkGeneric,
    /// HTTP 429 / 418 rate limit exceeded
    RateLimit,
    /// Authentication failures (401/403)
    AuthFailed(u16),
    /// Response body could not be decoded
    MalformedResponse,
    /// HTTP 400 invalid request / bad symbol
    InvalidRequest,
    /// Other client errors (4xx, except 429)
    ClientError(u16),
}

impl ErrorKind {
    /// User-friendly description string used inside retry log messages.
    pub fn description(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "network timeout",
            Self::NetworkOffline => "connection failed",
            Self::ServerError(code) => match code {
                500 => "internal server error",
                502 => "bad gateway",
                503 => "service unavailable",
                504 => "gateway timeout",
                _ => "server error",
            },
            Self::NetworkGeneric => "network error",
            Self::RateLimit => "rate limit exceeded",
            Self::AuthFailed(code) => match code {
                401 => "authentication failed (401)",
                403 => "authentication failed (403)",
                _ => "authentication failed",
            },
            Self::MalformedResponse => "malformed response",
            Self::InvalidRequest => "invalid request",
            Self::ClientError(code) => match code {
                404 => "resource not found",
                451 => "unavailable due to restrictions",
                _ => "client error",
            },
        }
    }

    /// Suggested remediation presented after a final failure.
    pub fn suggestion(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "Check your network connection and firewall settings",
            Self::NetworkOffline => "Verify internet connectivity and DNS resolution",
            Self::ServerError(_) => "Exchange may be experiencing issues, try again later",
            Self::NetworkGeneric => "Check network connectivity and try again",
            Self::RateLimit => "Consider reducing --concurrency or waiting longer",
            Self::AuthFailed(_) => "Verify your API key and its permissions",
            Self::MalformedResponse => "The endpoint may have changed its format, check --base-url",
            Self::InvalidRequest => "Check symbol, interval, and date range arguments for typos",
            Self::ClientError(_) => "Review request parameters or consult the exchange API docs",
        }
    }

    /// Whether the executor may retry this kind at all.
    ///
    /// Malformed responses are retryable here; the executor applies their own,
    /// smaller bound.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ErrorKind::AuthFailed(_) | ErrorKind::InvalidRequest | ErrorKind::ClientError(_)
        )
    }

    /// Short stable label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            Self::NetworkTimeout => "timeout",
            Self::NetworkOffline => "offline",
            Self::ServerError(_) => "server_error",
            Self::NetworkGeneric => "network",
            Self::RateLimit => "rate_limit",
            Self::AuthFailed(_) => "auth",
            Self::MalformedResponse => "malformed",
            Self::InvalidRequest => "invalid_request",
            Self::ClientError(_) => "client_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Exponential base delay before retry `attempt` (1-based): `initial * 2^(attempt-1)`, capped.
pub fn base_backoff(policy: &RetryPolicy, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let initial_ms = policy.initial_backoff.as_millis() as u64;
    let delay_ms = initial_ms.saturating_mul(1u64 << exponent);
    Duration::from_millis(delay_ms).min(policy.max_backoff)
}

/// Base delay plus `roll * jitter_pct%` of it, `roll` in `[0, 1)`.
pub fn backoff_with_roll(policy: &RetryPolicy, attempt: u32, roll: f64) -> Duration {
    let base = base_backoff(policy, attempt);
    let pct = f64::from(policy.jitter_pct.min(99)) / 100.0;
    let roll = roll.clamp(0.0, 1.0 - f64::EPSILON);
    base + base.mul_f64(pct * roll)
}

/// Jittered delay before retry `attempt`.
pub fn backoff_delay(policy: &RetryPolicy, attempt: u32) -> Duration {
    let roll: f64 = rand::thread_rng().gen();
    backoff_with_roll(policy, attempt, roll)
}

/// Smallest step a delay grows by once the cap or a server wait has flattened the curve
pub const MIN_BACKOFF_STEP: Duration = Duration::from_millis(1);

/// Delay before the next attempt.
///
/// A server-suggested wait is a floor. The result is always strictly longer
/// than `previous`, the delay before the prior attempt of the same request,
/// so waits keep growing after the exponential base hits `max_backoff`.
pub fn next_delay(
    policy: &RetryPolicy,
    attempt: u32,
    retry_after: Option<Duration>,
    previous: Option<Duration>,
) -> Duration {
    escalate(backoff_delay(policy, attempt), retry_after, previous)
}

fn escalate(delay: Duration, retry_after: Option<Duration>, previous: Option<Duration>) -> Duration {
    let delay = match retry_after {
        Some(server_wait) => delay.max(server_wait),
        None => delay,
    };
    match previous {
        Some(prev) => delay.max(prev + MIN_BACKOFF_STEP),
        None => delay,
    }
}
