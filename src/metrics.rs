//! Prometheus metrics for ingestion
//!
//! ## Architecture
//!
//! - Uses `metrics` crate for low-overhead metric collection
//! - Prometheus exporter for scraping endpoint (e.g. `:9090/metrics`)
//! - Recording goes through [`MetricsObserver`]; without an installed exporter the
//!   macros are no-ops

use metrics::{counter, describe_counter, describe_histogram, gauge, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::Lazy;
use std::net::SocketAddr;
use std::sync::Mutex;
use tracing::{debug, info};

use crate::downloader::{IngestError, IngestReport};
use crate::observer::{AttemptEvent, AttemptOutcome, ChunkEvent, IngestObserver};
use crate::{FetchWindow, Interval};

/// Global metrics initialization flag
static METRICS_INITIALIZED: Lazy<Mutex<bool>> = Lazy::new(|| Mutex::new(false));

/// Metrics initialization errors
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Exporter could not be installed
    #[error("failed to install Prometheus exporter: {0}")]
    Install(String),
}

/// Initialize metrics system with Prometheus exporter
///
/// Idempotent: later calls are no-ops once an exporter is installed.
///
/// # Arguments
/// * `addr` - Socket address to bind Prometheus scrape endpoint (e.g., "0.0.0.0:9090")
pub fn init_metrics(addr: SocketAddr) -> Result<(), MetricsError> {
    let mut initialized = METRICS_INITIALIZED
        .lock()
        .map_err(|e| MetricsError::Install(e.to_string()))?;
    if *initialized {
        debug!("Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install(e.to_string()))?;

    describe_metrics();

    *initialized = true;
    info!("Metrics system initialized successfully on {}", addr);
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "http_requests_total",
        Unit::Count,
        "Total number of request attempts, by outcome"
    );

    describe_counter!(
        "http_429_errors_total",
        Unit::Count,
        "Total number of rate limit errors received"
    );

    describe_counter!(
        "http_retries_total",
        Unit::Count,
        "Total number of retry attempts"
    );

    describe_histogram!(
        "http_request_duration_seconds",
        Unit::Seconds,
        "Request attempt duration in seconds"
    );

    describe_histogram!(
        "retry_backoff_duration_seconds",
        Unit::Seconds,
        "Duration of retry backoff in seconds"
    );

    describe_counter!(
        "candles_ingested_total",
        Unit::Count,
        "Total number of candles appended to sinks"
    );

    describe_counter!(
        "chunks_persisted_total",
        Unit::Count,
        "Total number of chunks appended to sinks"
    );

    describe_counter!(
        "ingest_jobs_completed_total",
        Unit::Count,
        "Total number of ingestion jobs that terminated normally"
    );

    describe_counter!(
        "ingest_jobs_failed_total",
        Unit::Count,
        "Total number of failed ingestion jobs"
    );
}

/// Records observer events as Prometheus metrics
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsObserver;

impl IngestObserver for MetricsObserver {
    fn on_start(&self, symbol: &str, interval: Interval, _range: FetchWindow) {
        gauge!(
            "ingest_jobs_running",
            "symbol" => symbol.to_string(),
            "interval" => interval.to_string(),
        )
        .increment(1.0);
    }

    fn on_attempt(&self, event: &AttemptEvent) {
        let outcome = match &event.outcome {
            AttemptOutcome::Success => "success",
            AttemptOutcome::Retrying { kind, .. } | AttemptOutcome::Failed { kind } => kind.label(),
        };

        counter!(
            "http_requests_total",
            "endpoint" => event.endpoint.clone(),
            "outcome" => outcome,
            "attempt" => event.attempt.to_string(),
        )
        .increment(1);

        histogram!(
            "http_request_duration_seconds",
            "endpoint" => event.endpoint.clone(),
        )
        .record(event.latency.as_secs_f64());

        if outcome == "rate_limit" {
            counter!(
                "http_429_errors_total",
                "endpoint" => event.endpoint.clone(),
            )
            .increment(1);
        }

        if let AttemptOutcome::Retrying { backoff, .. } = &event.outcome {
            counter!(
                "http_retries_total",
                "attempt" => event.attempt.to_string(),
            )
            .increment(1);

            histogram!(
                "retry_backoff_duration_seconds",
                "attempt" => event.attempt.to_string(),
            )
            .record(backoff.as_secs_f64());
        }
    }

    fn on_chunk(&self, event: &ChunkEvent) {
        counter!(
            "chunks_persisted_total",
            "symbol" => event.symbol.clone(),
            "interval" => event.interval.to_string(),
        )
        .increment(1);

        counter!(
            "candles_ingested_total",
            "symbol" => event.symbol.clone(),
            "interval" => event.interval.to_string(),
        )
        .increment(event.appended as u64);
    }

    fn on_finish(&self, report: &IngestReport) {
        counter!(
            "ingest_jobs_completed_total",
            "symbol" => report.symbol.clone(),
            "interval" => report.interval.to_string(),
            "end_reason" => report.end_reason.to_string(),
        )
        .increment(1);

        if report.end_reason != crate::downloader::EndReason::AlreadyComplete {
            gauge!(
                "ingest_jobs_running",
                "symbol" => report.symbol.clone(),
                "interval" => report.interval.to_string(),
            )
            .decrement(1.0);
        }
    }

    fn on_failure(&self, symbol: &str, error: &IngestError) {
        counter!(
            "ingest_jobs_failed_total",
            "symbol" => symbol.to_string(),
            "error" => error.label(),
        )
        .increment(1);

        // Validation failures never reached on_start
        if let Some(interval) = error.started_interval() {
            gauge!(
                "ingest_jobs_running",
                "symbol" => symbol.to_string(),
                "interval" => interval.to_string(),
            )
            .decrement(1.0);
        }
    }
}
