//! CLI error types and conversions

use crate::downloader::{ConfigError, IngestError};
use crate::fetcher::TransportError;
use crate::metrics::MetricsError;
use crate::output::OutputError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Ingestion error
    #[error("ingest error: {0}")]
    IngestError(#[from] IngestError),

    /// Output error
    #[error("output error: {0}")]
    OutputError(#[from] OutputError),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(#[from] ConfigError),

    /// HTTP client could not be built
    #[error("transport error: {0}")]
    TransportError(#[from] TransportError),

    /// Metrics exporter error
    #[error("metrics error: {0}")]
    MetricsError(#[from] MetricsError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Some jobs of a multi-symbol run failed
    #[error("{failed} of {total} job(s) failed")]
    JobsFailed {
        /// Failed jobs
        failed: usize,
        /// All jobs
        total: usize,
    },

    /// A persisted series did not pass validation
    #[error("series validation failed: {0}")]
    ValidationFailed(String),
}
