//! CLI command implementations

pub mod error;
pub mod fetch;
pub mod progress;
pub mod time;
pub mod validate;

use clap::{Parser, Subcommand};
use std::str::FromStr;

pub use error::CliError;
pub use fetch::FetchArgs;
pub use validate::ValidateArgs;

/// Command-line interface
#[derive(Parser, Debug)]
#[command(name = "kline-backfill")]
#[command(about = "Backfill historical kline (OHLCV) data into CSV files", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fetch klines for one or more symbols
    Fetch(FetchArgs),

    /// Check a persisted CSV series for ordering and gaps
    Validate(ValidateArgs),

    /// List supported intervals
    Intervals,
}

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}
