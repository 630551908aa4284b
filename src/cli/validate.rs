//! `validate` and `intervals` subcommands

use clap::Args;
use std::path::PathBuf;

use super::{CliError, OutputFormat};
use crate::output::csv::{format_timestamp, validate_series, SeriesCheck};
use crate::Interval;

/// Number of gaps listed individually in human output
const MAX_LISTED_GAPS: usize = 10;

/// Re-read a persisted CSV series and check it
#[derive(Args, Debug, Clone)]
pub struct ValidateArgs {
    /// CSV file written by `fetch`
    pub file: PathBuf,

    /// Interval the file was fetched with
    #[arg(long)]
    pub interval: Interval,

    /// Treat gaps as failures
    #[arg(long, default_value_t = false)]
    pub strict: bool,
}

impl ValidateArgs {
    /// Execute the validation command
    pub fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        let check = validate_series(&self.file, self.interval)?;

        match format {
            OutputFormat::Json => self.print_json(&check),
            OutputFormat::Human => self.print_human(&check),
        }

        if !check.is_ordered() {
            return Err(CliError::ValidationFailed(format!(
                "{}: {} duplicate and {} out-of-order row(s)",
                self.file.display(),
                check.duplicates.len(),
                check.out_of_order.len()
            )));
        }
        if self.strict && !check.gaps.is_empty() {
            return Err(CliError::ValidationFailed(format!(
                "{}: {} gap(s)",
                self.file.display(),
                check.gaps.len()
            )));
        }
        Ok(())
    }

    fn print_human(&self, check: &SeriesCheck) {
        println!("File: {}", self.file.display());
        println!("Interval: {}", self.interval);
        println!("Rows: {}", check.rows);
        if let (Some(first), Some(last)) = (check.first, check.last) {
            println!("Range: {} .. {}", format_timestamp(first), format_timestamp(last));
        }
        println!("Duplicates: {}", check.duplicates.len());
        println!("Out of order: {}", check.out_of_order.len());
        println!("Gaps: {}", check.gaps.len());
        for gap in check.gaps.iter().take(MAX_LISTED_GAPS) {
            println!(
                "  {} -> {} ({} missing)",
                format_timestamp(gap.after),
                format_timestamp(gap.before),
                gap.missing_bars
            );
        }
        if check.gaps.len() > MAX_LISTED_GAPS {
            println!("  ... {} more", check.gaps.len() - MAX_LISTED_GAPS);
        }
    }

    fn print_json(&self, check: &SeriesCheck) {
        let gaps: Vec<_> = check
            .gaps
            .iter()
            .map(|gap| {
                serde_json::json!({
                    "after": gap.after,
                    "before": gap.before,
                    "missing_bars": gap.missing_bars,
                })
            })
            .collect();
        let output = serde_json::json!({
            "file": self.file.display().to_string(),
            "interval": self.interval,
            "rows": check.rows,
            "first": check.first,
            "last": check.last,
            "duplicates": check.duplicates,
            "out_of_order": check.out_of_order,
            "gaps": gaps,
        });
        println!("{output}");
    }
}

/// List supported intervals and their lengths
pub fn list_intervals(format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let intervals: Vec<_> = Interval::ALL
                .iter()
                .map(|interval| {
                    serde_json::json!({
                        "interval": interval.as_str(),
                        "milliseconds": interval.to_milliseconds(),
                    })
                })
                .collect();
            println!("{}", serde_json::Value::Array(intervals));
        }
        OutputFormat::Human => {
            println!("{:<6} {:>14}", "NAME", "MILLISECONDS");
            for interval in Interval::ALL {
                println!("{:<6} {:>14}", interval.as_str(), interval.to_milliseconds());
            }
            println!("\n1M is nominal; month bars follow calendar months.");
        }
    }
}
