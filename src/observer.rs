//! Observer interface for attempts, chunks and job outcomes
//!
//! The engine and executor report what happened through [`IngestObserver`]; formatting
//! and destinations belong to the implementations ([`TracingObserver`],
//! [`crate::metrics::MetricsObserver`], the CLI progress bars).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::downloader::{IngestError, IngestReport};
use crate::fetcher::ErrorKind;
use crate::{FetchWindow, Interval};

/// What came of a single request attempt
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The attempt produced a decoded response
    Success,
    /// The attempt failed and another one follows after `backoff`
    Retrying {
        /// Failure classification
        kind: ErrorKind,
        /// Delay before the next attempt
        backoff: Duration,
    },
    /// The attempt failed and no further attempt will be made
    Failed {
        /// Failure classification
        kind: ErrorKind,
    },
}

/// One request attempt
#[derive(Debug, Clone, PartialEq)]
pub struct AttemptEvent {
    /// Endpoint path
    pub endpoint: String,
    /// Symbol being requested, empty when the request has none
    pub symbol: String,
    /// 1-based attempt number
    pub attempt: u32,
    /// Attempt ceiling for this request
    pub max_attempts: u32,
    /// Time spent in the attempt, excluding rate-limit waits
    pub latency: Duration,
    /// Outcome
    pub outcome: AttemptOutcome,
    /// Error message for failed attempts
    pub message: Option<String>,
}

impl AttemptEvent {
    /// Standard retry message with attempt counters
    pub fn format_retry(&self) -> Option<String> {
        let AttemptOutcome::Retrying { kind, backoff } = &self.outcome else {
            return None;
        };
        let mut message = format!(
            "Retrying (attempt {}/{}) after {} - waiting {:.1} seconds...",
            self.attempt + 1,
            self.max_attempts,
            kind.description(),
            backoff.as_secs_f64()
        );
        if !self.symbol.is_empty() {
            message.push_str(&format!(" ({})", self.symbol));
        }
        Some(message)
    }

    /// Final failure summary with remediation hints
    pub fn format_failure(&self) -> Option<String> {
        let AttemptOutcome::Failed { kind } = &self.outcome else {
            return None;
        };
        let symbol = if self.symbol.is_empty() {
            "unknown"
        } else {
            &self.symbol
        };
        let lines = [
            format!("[FAILED] Request failed after {} attempt(s)", self.attempt),
            format!(
                "  Last error: {}",
                self.message.as_deref().unwrap_or(kind.description())
            ),
            format!("  Symbol: {symbol}"),
            format!("  Endpoint: {}", self.endpoint),
            format!("  Suggestion: {}", kind.suggestion()),
        ];
        Some(lines.join("\n"))
    }
}

/// One chunk handed to the sink
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkEvent {
    /// Symbol
    pub symbol: String,
    /// Interval
    pub interval: Interval,
    /// Window that was requested
    pub window: FetchWindow,
    /// Rows in the response
    pub received: usize,
    /// Rows appended after overlap and range trimming
    pub appended: usize,
    /// Cursor after advancing
    pub cursor: i64,
    /// Rows appended by the job so far
    pub total_appended: u64,
}

/// Receives structured events from the engine and executor.
///
/// Every method defaults to a no-op. Implementations must be cheap: they run
/// inline on the ingestion path.
pub trait IngestObserver: Send + Sync {
    /// A job resolved its effective range (after resume) and is about to fetch
    fn on_start(&self, _symbol: &str, _interval: Interval, _range: FetchWindow) {}

    /// A request attempt finished
    fn on_attempt(&self, _event: &AttemptEvent) {}

    /// A chunk was appended and the cursor advanced
    fn on_chunk(&self, _event: &ChunkEvent) {}

    /// A job terminated normally
    fn on_finish(&self, _report: &IngestReport) {}

    /// A job failed
    fn on_failure(&self, _symbol: &str, _error: &IngestError) {}
}

/// Discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl IngestObserver for NoopObserver {}

/// Emits `tracing` records for every event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl IngestObserver for TracingObserver {
    fn on_start(&self, symbol: &str, interval: Interval, range: FetchWindow) {
        info!(
            symbol = %symbol,
            interval = %interval,
            start = %format_millis(range.start),
            end = %format_millis(range.end),
            "Starting ingestion"
        );
    }

    fn on_attempt(&self, event: &AttemptEvent) {
        match &event.outcome {
            AttemptOutcome::Success => {
                debug!(
                    endpoint = %event.endpoint,
                    symbol = %event.symbol,
                    attempt = event.attempt,
                    latency_ms = event.latency.as_millis() as u64,
                    "Request succeeded"
                );
                if event.attempt > 1 {
                    info!(
                        "Retry attempt {}/{} succeeded - resuming ({})",
                        event.attempt, event.max_attempts, event.symbol
                    );
                }
            }
            AttemptOutcome::Retrying { kind, backoff } => {
                warn!(
                    endpoint = %event.endpoint,
                    symbol = %event.symbol,
                    attempt = event.attempt,
                    error_kind = kind.label(),
                    backoff_ms = backoff.as_millis() as u64,
                    error = event.message.as_deref().unwrap_or_default(),
                    "{}",
                    event.format_retry().unwrap_or_default()
                );
            }
            AttemptOutcome::Failed { kind } => {
                error!(
                    endpoint = %event.endpoint,
                    symbol = %event.symbol,
                    attempt = event.attempt,
                    error_kind = kind.label(),
                    "{}",
                    event.format_failure().unwrap_or_default()
                );
            }
        }
    }

    fn on_chunk(&self, event: &ChunkEvent) {
        debug!(
            symbol = %event.symbol,
            interval = %event.interval,
            window = %event.window,
            received = event.received,
            appended = event.appended,
            cursor = %format_millis(event.cursor),
            total = event.total_appended,
            "Chunk persisted"
        );
    }

    fn on_finish(&self, report: &IngestReport) {
        info!(
            symbol = %report.symbol,
            interval = %report.interval,
            candles = report.candles_ingested,
            requests = report.requests,
            final_cursor = %format_millis(report.final_cursor),
            end_reason = %report.end_reason,
            "Ingestion finished"
        );
    }

    fn on_failure(&self, symbol: &str, error: &IngestError) {
        error!(symbol = %symbol, error = %error, "Ingestion failed");
    }
}

/// Forwards every event to each inner observer in order
#[derive(Default, Clone)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn IngestObserver>>,
}

impl FanoutObserver {
    /// Create an empty fanout
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an observer
    pub fn with(mut self, observer: Arc<dyn IngestObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Number of inner observers
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    /// Whether the fanout has no observers
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

impl IngestObserver for FanoutObserver {
    fn on_start(&self, symbol: &str, interval: Interval, range: FetchWindow) {
        for observer in &self.observers {
            observer.on_start(symbol, interval, range);
        }
    }

    fn on_attempt(&self, event: &AttemptEvent) {
        for observer in &self.observers {
            observer.on_attempt(event);
        }
    }

    fn on_chunk(&self, event: &ChunkEvent) {
        for observer in &self.observers {
            observer.on_chunk(event);
        }
    }

    fn on_finish(&self, report: &IngestReport) {
        for observer in &self.observers {
            observer.on_finish(report);
        }
    }

    fn on_failure(&self, symbol: &str, error: &IngestError) {
        for observer in &self.observers {
            observer.on_failure(symbol, error);
        }
    }
}

/// Render epoch milliseconds as UTC `YYYY-MM-DD HH:MM:SS`
pub fn format_millis(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| millis.to_string())
}
