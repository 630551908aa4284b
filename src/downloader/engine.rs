//! Pagination cursor engine
//!
//! Drives one job through its windows: plan the window, fetch it through the shared
//! executor, drop rows the sink already has or the range excludes, append, advance
//! the cursor one interval past the last returned bar, pause, repeat.
//!
//! Fetching stops when the range is covered, when the API answers a window with
//! an empty array (live edge), when shutdown is requested at a chunk boundary, or
//! on the first error that survives the executor's retries.

use std::sync::Arc;
use tracing::{info_span, Instrument};

use super::config::IngestConfig;
use super::cursor::{CursorState, CursorStatus, Stalled};
use super::job::{EndReason, IngestJob, IngestReport};
use super::IngestError;
use crate::fetcher::{KlineParser, KlineQuery, Method, RateLimitedRequestExecutor};
use crate::observer::{ChunkEvent, IngestObserver};
use crate::output::SeriesSink;
use crate::resume::resume_start;
use crate::shutdown::SharedShutdown;
use crate::{Candle, FetchWindow, Interval};

/// Runs ingestion jobs against a shared executor
pub struct PaginationCursorEngine {
    executor: Arc<RateLimitedRequestExecutor>,
    config: Arc<IngestConfig>,
    observer: Arc<dyn IngestObserver>,
    shutdown: Option<SharedShutdown>,
}

impl PaginationCursorEngine {
    /// Create an engine
    pub fn new(
        executor: Arc<RateLimitedRequestExecutor>,
        config: Arc<IngestConfig>,
        observer: Arc<dyn IngestObserver>,
    ) -> Self {
        Self {
            executor,
            config,
            observer,
            shutdown: None,
        }
    }

    /// Honor `shutdown` at chunk boundaries
    pub fn with_shutdown(mut self, shutdown: SharedShutdown) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Run `job`, appending to `sink`.
    ///
    /// The start is moved past whatever `sink` already holds, so re-running a job
    /// after a failure or on a complete file appends only missing rows.
    pub async fn run<S>(&self, job: &IngestJob, sink: &mut S) -> Result<IngestReport, IngestError>
    where
        S: SeriesSink + ?Sized,
    {
        let span = info_span!("ingest", symbol = %job.symbol, interval = %job.interval);
        let result = self.run_job(job, sink).instrument(span).await;
        match &result {
            Ok(report) => self.observer.on_finish(report),
            Err(error) => self.observer.on_failure(&job.symbol, error),
        }
        result
    }

    async fn run_job<S>(&self, job: &IngestJob, sink: &mut S) -> Result<IngestReport, IngestError>
    where
        S: SeriesSink + ?Sized,
    {
        let interval = job.validate()?;
        let interval_ms = interval.to_milliseconds();
        let start = resume_start(job.start_time, sink.last_open_time(), interval_ms);

        let mut cursor = CursorState::new(start, job.end_time, interval_ms);
        let mut report = IngestReport {
            symbol: job.symbol.clone(),
            interval,
            effective_start: start,
            candles_ingested: 0,
            requests: 0,
            final_cursor: start,
            status: cursor.status(),
            end_reason: EndReason::RangeCovered,
        };

        if cursor.is_covered() {
            cursor.transition(CursorStatus::Terminated)?;
            return Ok(finish(report, &cursor, EndReason::AlreadyComplete));
        }

        self.observer.on_start(
            &job.symbol,
            interval,
            FetchWindow {
                start,
                end: job.end_time,
            },
        );

        loop {
            if self.is_cancelled() {
                cursor.transition(CursorStatus::Terminated)?;
                return Ok(finish(report, &cursor, EndReason::Cancelled));
            }

            let window = cursor.next_window(self.config.max_bars);
            cursor.transition(CursorStatus::Fetching)?;

            report.requests += 1;
            let candles = match self.fetch_window(&job.symbol, interval, window).await {
                Ok(candles) => candles,
                Err(failure) => {
                    cursor.transition(CursorStatus::Failed)?;
                    return Err(IngestError::Fetch {
                        symbol: job.symbol.clone(),
                        interval,
                        window,
                        attempts: failure.attempts,
                        source: failure.error,
                    });
                }
            };

            let Some(last_open_time) = candles.last().map(|c| c.open_time) else {
                cursor.transition(CursorStatus::Exhausted)?;
                cursor.transition(CursorStatus::Terminated)?;
                return Ok(finish(report, &cursor, EndReason::LiveEdge));
            };

            cursor.transition(CursorStatus::Advancing)?;
            let received = candles.len();
            let fresh = fresh_rows(candles, cursor.current_start(), cursor.target_end());

            let appended = if fresh.is_empty() {
                0
            } else {
                match sink.append(&fresh) {
                    Ok(count) => count,
                    Err(source) => {
                        cursor.transition(CursorStatus::Failed)?;
                        return Err(IngestError::Sink {
                            symbol: job.symbol.clone(),
                            interval,
                            window,
                            source,
                        });
                    }
                }
            };
            report.candles_ingested += appended as u64;

            if let Err(Stalled {
                cursor: position,
                last_open_time,
            }) = cursor.advance_past(last_open_time)
            {
                cursor.transition(CursorStatus::Failed)?;
                return Err(IngestError::StalledCursor {
                    symbol: job.symbol.clone(),
                    interval,
                    window,
                    cursor: position,
                    last_open_time,
                });
            }

            self.observer.on_chunk(&ChunkEvent {
                symbol: job.symbol.clone(),
                interval,
                window,
                received,
                appended,
                cursor: cursor.current_start(),
                total_appended: report.candles_ingested,
            });

            if cursor.is_covered() {
                cursor.transition(CursorStatus::Terminated)?;
                return Ok(finish(report, &cursor, EndReason::RangeCovered));
            }

            self.pause().await;
        }
    }

    async fn fetch_window(
        &self,
        symbol: &str,
        interval: Interval,
        window: FetchWindow,
    ) -> Result<Vec<Candle>, crate::fetcher::RequestFailure> {
        let query = KlineQuery::for_window(symbol, interval, window, self.config.max_bars);
        let params = query.to_params();
        self.executor
            .execute_decoded(Method::Get, &self.config.klines_endpoint, &params, |body| {
                KlineParser::parse_klines(body, interval)
            })
            .await
    }

    fn is_cancelled(&self) -> bool {
        self.shutdown
            .as_ref()
            .is_some_and(|shutdown| shutdown.is_shutdown_requested())
    }

    /// Politeness delay; returns early on shutdown, which the next loop turn observes
    async fn pause(&self) {
        let delay = self.config.politeness_delay;
        match &self.shutdown {
            Some(shutdown) => {
                shutdown.sleep_or_shutdown(delay).await;
            }
            None if !delay.is_zero() => tokio::time::sleep(delay).await,
            None => {}
        }
    }
}

/// Rows with `open_time` in `[cursor, target_end)`: drops overlap with what is
/// already persisted and anything past the requested range.
fn fresh_rows(candles: Vec<Candle>, cursor: i64, target_end: i64) -> Vec<Candle> {
    candles
        .into_iter()
        .filter(|c| c.open_time >= cursor && c.open_time < target_end)
        .collect()
}

fn finish(mut report: IngestReport, cursor: &CursorState, reason: EndReason) -> IngestReport {
    report.final_cursor = cursor.current_start();
    report.status = cursor.status();
    report.end_reason = reason;
    report
}
