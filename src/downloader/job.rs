//! Ingestion job specification and report

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use super::cursor::CursorStatus;
use super::IngestError;
use crate::Interval;

/// One symbol/interval pair over `[start_time, end_time)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestJob {
    /// Trading symbol (e.g., "BTCUSDT")
    pub symbol: String,
    /// Interval symbol (e.g., "1h"); parsed when the job runs
    pub interval: String,
    /// Start time (Unix timestamp in milliseconds, inclusive)
    pub start_time: i64,
    /// End time (Unix timestamp in milliseconds, exclusive)
    pub end_time: i64,
}

impl IngestJob {
    /// Create a job
    pub fn new(
        symbol: impl Into<String>,
        interval: impl Into<String>,
        start_time: i64,
        end_time: i64,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            interval: interval.into(),
            start_time,
            end_time,
        }
    }

    /// Validate job parameters and resolve the interval.
    ///
    /// Never touches the network.
    pub fn validate(&self) -> Result<Interval, IngestError> {
        let interval = Interval::from_str(&self.interval)?;

        if self.symbol.trim().is_empty() {
            return Err(IngestError::EmptySymbol);
        }

        if self.end_time <= self.start_time {
            return Err(IngestError::InvalidRange {
                start: self.start_time,
                end: self.end_time,
            });
        }

        Ok(interval)
    }
}

/// Why a job stopped without error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    /// The cursor reached the end of the requested range
    RangeCovered,
    /// The API returned an empty window
    LiveEdge,
    /// Shutdown was requested at a chunk boundary
    Cancelled,
    /// Persisted data already covered the range
    AlreadyComplete,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            EndReason::RangeCovered => "range covered",
            EndReason::LiveEdge => "live edge reached",
            EndReason::Cancelled => "cancelled",
            EndReason::AlreadyComplete => "already complete",
        };
        f.write_str(text)
    }
}

/// Outcome of a job that terminated normally
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReport {
    /// Symbol
    pub symbol: String,
    /// Interval
    pub interval: Interval,
    /// First open time requested after resume resolution
    pub effective_start: i64,
    /// Rows appended by this run
    pub candles_ingested: u64,
    /// Window requests issued (each may have taken several attempts)
    pub requests: u64,
    /// Cursor position when the loop exited
    pub final_cursor: i64,
    /// Final cursor status
    pub status: CursorStatus,
    /// Why the job stopped
    pub end_reason: EndReason,
}
