//! # Kline Backfill Library
//!
//! Chunked, resumable ingestion of historical candlestick (OHLCV) series from a
//! rate-limited, paginated REST market-data API. The result is a contiguous,
//! gap-free, duplicate-free series persisted incrementally for downstream
//! analysis.
//!
//! ## Features
//!
//! - **Windowed pagination**: arbitrarily long ranges are split into API-sized windows
//! - **Live edge detection**: an empty window ends the job normally
//! - **Retry with backoff**: transient and rate-limit failures are retried with jittered backoff
//! - **Shared rate limiting**: concurrent jobs draw from one request budget
//! - **Durable, resumable output**: every chunk is flushed before the cursor advances
//!
//! ## Quick Start
//!
//! ```no_run
//! use kline_backfill::downloader::{IngestConfig, IngestJob, PaginationCursorEngine};
//! use kline_backfill::fetcher::{http::ReqwestTransport, RateLimitedRequestExecutor};
//! use kline_backfill::observer::TracingObserver;
//! use kline_backfill::output::csv::CsvSeriesSink;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Arc::new(IngestConfig::default());
//! let observer = Arc::new(TracingObserver);
//! let transport = Arc::new(ReqwestTransport::new(&config)?);
//! let executor = Arc::new(RateLimitedRequestExecutor::new(
//!     transport,
//!     config.clone(),
//!     observer.clone(),
//! ));
//! let engine = PaginationCursorEngine::new(executor, config, observer);
//!
//! let job = IngestJob::new(
//!     "BTCUSDT",
//!     "1h",
//!     1640995200000, // 2022-01-01 00:00:00 UTC
//!     1672531200000, // 2023-01-01 00:00:00 UTC
//! );
//! let mut sink = CsvSeriesSink::open("./BTCUSDT_1h.csv")?;
//! let report = engine.run(&job, &mut sink).await?;
//! println!("{} candles ingested", report.candles_ingested);
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! - [`calendar`] - Interval symbols, durations and window boundaries
//! - [`fetcher`] - Transport boundary, wire decoding and the rate-limited request executor
//! - [`downloader`] - The pagination cursor engine and job configuration
//! - [`output`] - Series sinks (CSV, in-memory)
//! - [`resume`] - Resume position and exclusive output locking
//! - [`observer`] - Injected observer interface for attempts, chunks and job reports

#![warn(missing_docs)]
#![warn(clippy::all)]

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Interval calendar
pub mod calendar;

/// CLI command implementations
pub mod cli;

/// Ingestion engine and job configuration
pub mod downloader;

/// Transport, wire decoding and request execution
pub mod fetcher;

/// Prometheus metrics
pub mod metrics;

/// Observer interface
pub mod observer;

/// Series sinks
pub mod output;

/// Resume position and output locking
pub mod resume;

/// Cancellation coordination shared across jobs
pub mod shutdown;

pub use calendar::{FetchWindow, Interval};

/// One OHLCV bar
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    /// Open time (Unix timestamp in milliseconds), the series key
    pub open_time: i64,
    /// Open price
    pub open: Decimal,
    /// High price
    pub high: Decimal,
    /// Low price
    pub low: Decimal,
    /// Close price
    pub close: Decimal,
    /// Volume (base asset)
    pub volume: Decimal,
    /// Close time (Unix timestamp in milliseconds)
    pub close_time: i64,
    /// Quote asset volume
    pub quote_volume: Decimal,
    /// Number of trades
    pub trade_count: u64,
    /// Taker buy base asset volume
    pub taker_buy_base_volume: Decimal,
    /// Taker buy quote asset volume
    pub taker_buy_quote_volume: Decimal,
}

impl Candle {
    /// Validate price/volume relationships within the bar
    pub fn validate(&self) -> Result<(), String> {
        if self.close_time <= self.open_time {
            return Err(format!(
                "Close time ({}) must be after open time ({})",
                self.close_time, self.open_time
            ));
        }

        if self.high < self.open || self.high < self.close {
            return Err(format!(
                "High ({}) must be >= open ({}) and close ({})",
                self.high, self.open, self.close
            ));
        }

        if self.low > self.open || self.low > self.close {
            return Err(format!(
                "Low ({}) must be <= open ({}) and close ({})",
                self.low, self.open, self.close
            ));
        }

        if self.volume < Decimal::ZERO {
            return Err(format!("Volume must be non-negative, got {}", self.volume));
        }

        Ok(())
    }

    /// Check that the bar covers exactly one interval.
    ///
    /// The exchange reports `close_time` as the last millisecond of the bar, so both
    /// `interval_ms - 1` and `interval_ms` are accepted. Calendar months vary in
    /// length, so `1M` bars only need a close after the open.
    pub fn spans_interval(&self, interval: Interval) -> bool {
        if interval == Interval::OneMonth {
            return self.close_time > self.open_time;
        }
        let span = self.close_time - self.open_time;
        let interval_ms = interval.to_milliseconds();
        span == interval_ms || span == interval_ms - 1
    }
}
