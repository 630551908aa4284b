//! Series sinks
//!
//! A [`SeriesSink`] persists validated chunks in `open_time` order. Every append is
//! durable before it returns, so the engine only advances its cursor past data that
//! survives a crash.

use crate::resume::ResumeError;
use crate::Candle;

pub mod csv;

/// Output writer errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// CSV write or read error
    #[error("CSV error: {0}")]
    CsvError(String),

    /// Buffer flush error
    #[error("flush error: {0}")]
    FlushError(String),

    /// A candle does not come strictly after the last persisted one
    #[error("out-of-order data: open time {open_time} is not after {previous}")]
    OutOfOrder {
        /// Last persisted (or preceding in the chunk) open time
        previous: i64,
        /// Offending open time
        open_time: i64,
    },

    /// Existing output could not be interpreted
    #[error("corrupt output at line {line}: {reason}")]
    Corrupt {
        /// 1-based line number
        line: u64,
        /// What was wrong
        reason: String,
    },

    /// Output lock could not be taken
    #[error(transparent)]
    Lock(#[from] ResumeError),
}

/// Result type for output operations
pub type OutputResult<T> = Result<T, OutputError>;

/// Incremental, ordered persistence of candles
pub trait SeriesSink: Send {
    /// Durably append an ordered chunk and return the number of rows written.
    ///
    /// The whole chunk is checked before anything is written: if any candle's
    /// `open_time` is not strictly greater than its predecessor (or the last
    /// persisted row), nothing is appended and [`OutputError::OutOfOrder`] is returned.
    fn append(&mut self, candles: &[Candle]) -> OutputResult<usize>;

    /// `open_time` of the last durably written candle
    fn last_open_time(&self) -> Option<i64>;
}

/// Check that `candles` continue strictly after `last`
pub fn check_order(last: Option<i64>, candles: &[Candle]) -> OutputResult<()> {
    let mut previous = last;
    for candle in candles {
        if let Some(prev) = previous {
            if candle.open_time <= prev {
                return Err(OutputError::OutOfOrder {
                    previous: prev,
                    open_time: candle.open_time,
                });
            }
        }
        previous = Some(candle.open_time);
    }
    Ok(())
}

/// In-memory sink, used by tests and callers that post-process the series themselves
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    candles: Vec<Candle>,
    appends: usize,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that already holds `candles`, as if resumed
    pub fn with_candles(candles: Vec<Candle>) -> OutputResult<Self> {
        check_order(None, &candles)?;
        Ok(Self {
            candles,
            appends: 0,
        })
    }

    /// Persisted candles
    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    /// Consume the sink
    pub fn into_candles(self) -> Vec<Candle> {
        self.candles
    }

    /// Number of successful `append` calls
    pub fn append_calls(&self) -> usize {
        self.appends
    }
}

impl SeriesSink for MemorySink {
    fn append(&mut self, candles: &[Candle]) -> OutputResult<usize> {
        check_order(self.last_open_time(), candles)?;
        self.candles.extend_from_slice(candles);
        self.appends += 1;
        Ok(candles.len())
    }

    fn last_open_time(&self) -> Option<i64> {
        self.candles.last().map(|c| c.open_time)
    }
}
