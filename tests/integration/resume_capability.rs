//! End-to-end runs into CSV files: durability, resume and locking

use std::fs;
use std::io::Write;
use std::sync::Arc;

use tempfile::TempDir;

use kline_backfill::downloader::{EndReason, IngestError, IngestJob, PaginationCursorEngine};
use kline_backfill::fetcher::RawResponse;
use kline_backfill::output::csv::{validate_series, CsvSeriesSink};
use kline_backfill::output::{OutputError, SeriesSink};
use kline_backfill::resume::ResumeError;
use kline_backfill::Interval;

use crate::support::{executor, test_config, RecordingObserver, SeriesTransport, HOUR, T0};

fn engine_over(transport: Arc<SeriesTransport>, max_bars: u32) -> PaginationCursorEngine {
    let config = Arc::new(test_config(max_bars));
    let observer = RecordingObserver::new();
    let executor = executor(transport, config.clone(), observer.clone());
    PaginationCursorEngine::new(executor, config, observer)
}

fn data_lines(path: &std::path::Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap()
        .lines()
        .skip(1)
        .map(str::to_string)
        .collect()
}

#[tokio::test]
async fn test_fetch_into_csv() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("BTCUSDT_1h.csv");
    let engine = engine_over(Arc::new(SeriesTransport::contiguous(T0, 10, HOUR)), 4);

    let mut sink = CsvSeriesSink::open(&path).unwrap();
    let job = IngestJob::new("BTCUSDT", "1h", T0, T0 + 10 * HOUR);
    let report = engine.run(&job, &mut sink).await.unwrap();
    drop(sink);

    assert_eq!(report.candles_ingested, 10);

    let contents = fs::read_to_string(&path).unwrap();
    let mut lines = contents.lines();
    assert_eq!(lines.next(), Some("timestamp,open,high,low,close,volume"));
    assert_eq!(
        lines.next(),
        Some("2024-01-01 00:00:00,100.0,110.0,90.0,105.0,1.5")
    );
    assert_eq!(
        data_lines(&path).last().map(String::as_str),
        Some("2024-01-01 09:00:00,100.0,110.0,90.0,105.0,1.5")
    );

    let check = validate_series(&path, Interval::OneHour).unwrap();
    assert_eq!(check.rows, 10);
    assert!(check.is_contiguous());
}

#[tokio::test(start_paused = true)]
async fn test_resume_after_failure_completes_without_duplicates() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("BTCUSDT_1h.csv");
    let job = IngestJob::new("BTCUSDT", "1h", T0, T0 + 10 * HOUR);

    // Third request is rejected for good
    let failing = Arc::new(
        SeriesTransport::contiguous(T0, 10, HOUR)
            .failing_from(3, RawResponse::with_status(401, "expired key")),
    );
    {
        let engine = engine_over(failing, 4);
        let mut sink = CsvSeriesSink::open(&path).unwrap();
        let err = engine.run(&job, &mut sink).await.unwrap_err();
        assert!(matches!(err, IngestError::Fetch { .. }));
    }
    assert_eq!(data_lines(&path).len(), 8);

    let healthy = Arc::new(SeriesTransport::contiguous(T0, 10, HOUR));
    let engine = engine_over(healthy.clone(), 4);
    let mut sink = CsvSeriesSink::open(&path).unwrap();
    assert_eq!(sink.last_open_time(), Some(T0 + 7 * HOUR));

    let report = engine.run(&job, &mut sink).await.unwrap();
    drop(sink);

    assert_eq!(report.effective_start, T0 + 8 * HOUR);
    assert_eq!(report.candles_ingested, 2);
    assert_eq!(healthy.calls()[0].param_i64("startTime"), Some(T0 + 8 * HOUR));

    let check = validate_series(&path, Interval::OneHour).unwrap();
    assert_eq!(check.rows, 10);
    assert!(check.is_contiguous());
}

#[tokio::test]
async fn test_rerun_of_complete_file_appends_nothing() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("BTCUSDT_1h.csv");
    let job = IngestJob::new("BTCUSDT", "1h", T0, T0 + 10 * HOUR);

    for _ in 0..2 {
        let engine = engine_over(Arc::new(SeriesTransport::contiguous(T0, 10, HOUR)), 4);
        let mut sink = CsvSeriesSink::open(&path).unwrap();
        engine.run(&job, &mut sink).await.unwrap();
    }

    let engine = engine_over(Arc::new(SeriesTransport::contiguous(T0, 10, HOUR)), 4);
    let mut sink = CsvSeriesSink::open(&path).unwrap();
    let report = engine.run(&job, &mut sink).await.unwrap();
    drop(sink);

    assert_eq!(report.end_reason, EndReason::AlreadyComplete);
    assert_eq!(data_lines(&path).len(), 10);
}

#[tokio::test]
async fn test_partial_trailing_line_is_repaired() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("BTCUSDT_1h.csv");
    {
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "timestamp,open,high,low,close,volume").unwrap();
        writeln!(file, "2024-01-01 00:00:00,100.0,110.0,90.0,105.0,1.5").unwrap();
        writeln!(file, "2024-01-01 01:00:00,100.0,110.0,90.0,105.0,1.5").unwrap();
        write!(file, "2024-01-01 02:00:00,100.0,11").unwrap();
    }

    let engine = engine_over(Arc::new(SeriesTransport::contiguous(T0, 4, HOUR)), 1000);
    let mut sink = CsvSeriesSink::open(&path).unwrap();
    assert_eq!(sink.last_open_time(), Some(T0 + HOUR));

    let job = IngestJob::new("BTCUSDT", "1h", T0, T0 + 4 * HOUR);
    let report = engine.run(&job, &mut sink).await.unwrap();
    drop(sink);

    assert_eq!(report.candles_ingested, 2);
    let check = validate_series(&path, Interval::OneHour).unwrap();
    assert_eq!(check.rows, 4);
    assert!(check.is_contiguous());
}

#[tokio::test]
async fn test_fresh_sink_discards_existing_rows() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("BTCUSDT_1h.csv");
    let job = IngestJob::new("BTCUSDT", "1h", T0, T0 + 4 * HOUR);

    {
        let engine = engine_over(Arc::new(SeriesTransport::contiguous(T0, 4, HOUR)), 1000);
        let mut sink = CsvSeriesSink::open(&path).unwrap();
        engine.run(&job, &mut sink).await.unwrap();
    }

    let engine = engine_over(Arc::new(SeriesTransport::contiguous(T0, 4, HOUR)), 1000);
    let mut sink = CsvSeriesSink::create(&path).unwrap();
    assert_eq!(sink.last_open_time(), None);
    let report = engine.run(&job, &mut sink).await.unwrap();
    drop(sink);

    assert_eq!(report.candles_ingested, 4);
    assert_eq!(data_lines(&path).len(), 4);
}

#[test]
fn test_second_writer_is_locked_out() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("BTCUSDT_1h.csv");

    let _first = CsvSeriesSink::open(&path).unwrap();
    let second = CsvSeriesSink::open(&path);
    assert!(matches!(
        second,
        Err(OutputError::Lock(ResumeError::LockHeld { .. }))
    ));
}
