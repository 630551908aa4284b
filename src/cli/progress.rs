//! Per-job progress bars

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::calendar::expected_bars;
use crate::downloader::{IngestError, IngestReport};
use crate::observer::{ChunkEvent, IngestObserver};
use crate::{FetchWindow, Interval};

const TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}";

/// Drives one progress bar from engine events
pub struct ProgressObserver {
    bar: ProgressBar,
}

impl ProgressObserver {
    /// Bar attached to `multi`, labelled with the job
    pub fn new(multi: &MultiProgress, symbol: &str, interval: &str) -> Self {
        let bar = multi.add(ProgressBar::new(0));
        bar.set_style(style());
        bar.set_message(format!("{symbol} {interval}"));
        Self { bar }
    }

    /// Bar that never draws
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Current position (rows appended)
    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    /// Expected total rows
    pub fn length(&self) -> Option<u64> {
        self.bar.length()
    }
}

fn style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(TEMPLATE)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

impl IngestObserver for ProgressObserver {
    fn on_start(&self, symbol: &str, interval: Interval, range: FetchWindow) {
        self.bar.set_length(expected_bars(
            range.start,
            range.end,
            interval.to_milliseconds(),
        ));
        self.bar.set_message(format!("Fetching {symbol} {interval}"));
    }

    fn on_chunk(&self, event: &ChunkEvent) {
        self.bar.inc(event.appended as u64);
    }

    fn on_finish(&self, report: &IngestReport) {
        self.bar.finish_with_message(format!(
            "{} {}: {} candles ({})",
            report.symbol, report.interval, report.candles_ingested, report.end_reason
        ));
    }

    fn on_failure(&self, symbol: &str, _error: &IngestError) {
        self.bar.abandon_with_message(format!("{symbol}: failed"));
    }
}
