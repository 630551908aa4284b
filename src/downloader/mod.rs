//! Ingestion engine, jobs and configuration
//!
//! # Overview
//!
//! 1. **Job**: what to ingest, [`job::IngestJob`]
//! 2. **Engine**: the windowed fetch loop, [`engine::PaginationCursorEngine`]
//! 3. **Cursor**: the per-job state machine, [`cursor::CursorState`]
//! 4. **Rate limiting**: one budget shared by every job, [`rate_limit::RateLimiter`]
//! 5. **Configuration**: [`config::IngestConfig`], built once and shared
//!
//! # Error Handling
//!
//! Jobs return `Result<IngestReport, IngestError>`. Errors that reach the caller are
//! final: retryable failures were already retried by the executor. Whatever was
//! appended before the failure stays on disk and the job resumes from it.

pub mod config;
pub mod cursor;
pub mod engine;
pub mod job;
pub mod rate_limit;

pub use config::{ConfigError, IngestConfig, RateLimitConfig, RetryPolicy};
pub use cursor::{CursorState, CursorStatus, InvalidTransition};
pub use engine::PaginationCursorEngine;
pub use job::{EndReason, IngestJob, IngestReport};
pub use rate_limit::{RateLimitError, RateLimiter};

use crate::calendar::CalendarError;
use crate::fetcher::FetcherError;
use crate::output::OutputError;
use crate::{FetchWindow, Interval};

/// Job-level errors
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Interval symbol not recognized; raised before any request
    #[error(transparent)]
    UnsupportedInterval(#[from] CalendarError),

    /// End not after start
    #[error("invalid range: end ({end}) must be after start ({start})")]
    InvalidRange {
        /// Start (epoch ms)
        start: i64,
        /// End (epoch ms)
        end: i64,
    },

    /// Blank symbol
    #[error("symbol must not be empty")]
    EmptySymbol,

    /// A window request failed for good
    #[error("fetch failed for {symbol} {interval} window {window} after {attempts} attempt(s): {source}")]
    Fetch {
        /// Symbol
        symbol: String,
        /// Interval
        interval: Interval,
        /// Window being fetched
        window: FetchWindow,
        /// Attempts used
        attempts: u32,
        /// Last fetch error
        source: FetcherError,
    },

    /// The sink refused or failed to persist a chunk
    #[error("persisting {symbol} {interval} window {window} failed: {source}")]
    Sink {
        /// Symbol
        symbol: String,
        /// Interval
        interval: Interval,
        /// Window the chunk came from
        window: FetchWindow,
        /// Sink error
        source: OutputError,
    },

    /// A non-empty response did not move the cursor forward
    #[error("cursor stalled for {symbol} {interval} in window {window}: last returned bar {last_open_time} is before cursor {cursor}")]
    StalledCursor {
        /// Symbol
        symbol: String,
        /// Interval
        interval: Interval,
        /// Window being fetched
        window: FetchWindow,
        /// Cursor position
        cursor: i64,
        /// Last open time in the response
        last_open_time: i64,
    },

    /// Engine bug: the cursor lifecycle was violated
    #[error(transparent)]
    Transition(#[from] InvalidTransition),
}

impl IngestError {
    /// Window the job was working on, if the failure happened mid-loop
    pub fn window(&self) -> Option<FetchWindow> {
        match self {
            IngestError::Fetch { window, .. }
            | IngestError::Sink { window, .. }
            | IngestError::StalledCursor { window, .. } => Some(*window),
            _ => None,
        }
    }

    /// Interval of a job that failed after it started fetching
    pub fn started_interval(&self) -> Option<Interval> {
        match self {
            IngestError::Fetch { interval, .. }
            | IngestError::Sink { interval, .. }
            | IngestError::StalledCursor { interval, .. } => Some(*interval),
            _ => None,
        }
    }

    /// Request attempts consumed by the failing window
    pub fn attempts(&self) -> Option<u32> {
        match self {
            IngestError::Fetch { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    /// Short stable label for metrics
    pub fn label(&self) -> &'static str {
        match self {
            IngestError::UnsupportedInterval(_) => "unsupported_interval",
            IngestError::InvalidRange { .. } => "invalid_range",
            IngestError::EmptySymbol => "empty_symbol",
            IngestError::Fetch { source, .. } => source.kind().label(),
            IngestError::Sink { .. } => "sink",
            IngestError::StalledCursor { .. } => "stalled_cursor",
            IngestError::Transition(_) => "internal",
        }
    }
}
