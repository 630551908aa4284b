//! Windowed pagination against a simulated exchange

use std::sync::Arc;

use kline_backfill::downloader::{
    CursorStatus, EndReason, IngestError, IngestJob, PaginationCursorEngine,
};
use kline_backfill::fetcher::KlineParser;
use kline_backfill::output::{MemorySink, SeriesSink};
use kline_backfill::Interval;

use crate::support::{
    executor, test_config, RecordingObserver, ScriptedTransport, SeriesTransport, HOUR, MINUTE, T0,
};

fn engine_over(
    transport: Arc<dyn kline_backfill::fetcher::Transport>,
    max_bars: u32,
    observer: Arc<RecordingObserver>,
) -> PaginationCursorEngine {
    let config = Arc::new(test_config(max_bars));
    let executor = executor(transport, config.clone(), observer.clone());
    PaginationCursorEngine::new(executor, config, observer)
}

/// Monthly rows as `(open, next_open)` pairs
fn month_rows(spans: &[(i64, i64)]) -> serde_json::Value {
    spans
        .iter()
        .map(|(open, next)| {
            serde_json::json!([
                open, "1", "2", "0.5", "1.5", "10", next - 1, "15", 3, "5", "7", "0"
            ])
        })
        .collect()
}

fn open_times(sink: &MemorySink) -> Vec<i64> {
    sink.candles().iter().map(|c| c.open_time).collect()
}

#[tokio::test]
async fn test_range_split_into_max_bar_windows() {
    let transport = Arc::new(SeriesTransport::contiguous(T0, 10, HOUR));
    let observer = RecordingObserver::new();
    let engine = engine_over(transport.clone(), 4, observer.clone());

    let job = IngestJob::new("BTCUSDT", "1h", T0, T0 + 10 * HOUR);
    let mut sink = MemorySink::new();
    let report = engine.run(&job, &mut sink).await.unwrap();

    // 4 + 4 + 2
    let calls = transport.calls();
    assert_eq!(calls.len(), 3);
    let starts: Vec<_> = calls.iter().map(|c| c.param_i64("startTime").unwrap()).collect();
    assert_eq!(starts, vec![T0, T0 + 4 * HOUR, T0 + 8 * HOUR]);
    let ends: Vec<_> = calls.iter().map(|c| c.param_i64("endTime").unwrap()).collect();
    assert_eq!(
        ends,
        vec![T0 + 4 * HOUR - 1, T0 + 8 * HOUR - 1, T0 + 10 * HOUR - 1]
    );
    assert!(calls.iter().all(|c| c.param("limit") == Some("4")));
    assert!(calls.iter().all(|c| c.param("interval") == Some("1h")));
    assert!(calls.iter().all(|c| c.endpoint == "/api/v3/klines"));

    let expected: Vec<_> = (0..10).map(|i| T0 + i * HOUR).collect();
    assert_eq!(open_times(&sink), expected);
    assert_eq!(sink.append_calls(), 3);

    assert_eq!(report.candles_ingested, 10);
    assert_eq!(report.requests, 3);
    assert_eq!(report.end_reason, EndReason::RangeCovered);
    assert_eq!(report.status, CursorStatus::Terminated);
    assert_eq!(report.final_cursor, T0 + 10 * HOUR);

    let chunks = observer.chunks();
    assert_eq!(chunks.len(), 3);
    assert_eq!(chunks[2].total_appended, 10);
    assert_eq!(observer.finished.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_overlapping_rows_are_not_duplicated() {
    // Second answer repeats the last row of the first
    let transport = Arc::new(
        ScriptedTransport::new()
            .respond_rows((0..4).map(|i| T0 + i * HOUR), HOUR)
            .respond_rows((3..8).map(|i| T0 + i * HOUR), HOUR)
            .respond_rows((7..10).map(|i| T0 + i * HOUR), HOUR),
    );
    let observer = RecordingObserver::new();
    let engine = engine_over(transport.clone(), 4, observer.clone());

    let job = IngestJob::new("BTCUSDT", "1h", T0, T0 + 10 * HOUR);
    let mut sink = MemorySink::new();
    let report = engine.run(&job, &mut sink).await.unwrap();

    let expected: Vec<_> = (0..10).map(|i| T0 + i * HOUR).collect();
    assert_eq!(open_times(&sink), expected);
    assert_eq!(report.candles_ingested, 10);

    let chunks = observer.chunks();
    assert_eq!(chunks[1].received, 5);
    assert_eq!(chunks[1].appended, 4);
}

#[tokio::test]
async fn test_rows_past_range_end_are_trimmed() {
    let transport = Arc::new(
        ScriptedTransport::new().respond_rows((0..6).map(|i| T0 + i * MINUTE), MINUTE),
    );
    let engine = engine_over(transport, 1000, RecordingObserver::new());

    let job = IngestJob::new("ETHUSDT", "1m", T0, T0 + 4 * MINUTE);
    let mut sink = MemorySink::new();
    let report = engine.run(&job, &mut sink).await.unwrap();

    assert_eq!(open_times(&sink).len(), 4);
    assert_eq!(sink.last_open_time(), Some(T0 + 3 * MINUTE));
    assert_eq!(report.end_reason, EndReason::RangeCovered);
}

#[tokio::test]
async fn test_empty_window_is_live_edge() {
    let transport = Arc::new(
        ScriptedTransport::new()
            .respond_rows((0..4).map(|i| T0 + i * HOUR), HOUR)
            .respond_rows((4..6).map(|i| T0 + i * HOUR), HOUR)
            .respond(kline_backfill::fetcher::RawResponse::ok("[]")),
    );
    let engine = engine_over(transport.clone(), 4, RecordingObserver::new());

    let job = IngestJob::new("BTCUSDT", "1h", T0, T0 + 100 * HOUR);
    let mut sink = MemorySink::new();
    let report = engine.run(&job, &mut sink).await.unwrap();

    assert_eq!(transport.call_count(), 3);
    assert_eq!(open_times(&sink).len(), 6);
    assert_eq!(report.end_reason, EndReason::LiveEdge);
    assert_eq!(report.status, CursorStatus::Terminated);
    assert_eq!(report.final_cursor, T0 + 6 * HOUR);
}

#[tokio::test]
async fn test_short_window_does_not_end_job() {
    // Exchange downtime leaves a hole; later windows still have data
    let mut times: Vec<i64> = (0..3).map(|i| T0 + i * HOUR).collect();
    times.extend((6..10).map(|i| T0 + i * HOUR));
    let transport = Arc::new(SeriesTransport::with_open_times(times.clone(), HOUR));
    let engine = engine_over(transport, 4, RecordingObserver::new());

    let job = IngestJob::new("BTCUSDT", "1h", T0, T0 + 10 * HOUR);
    let mut sink = MemorySink::new();
    let report = engine.run(&job, &mut sink).await.unwrap();

    assert_eq!(open_times(&sink), times);
    assert_eq!(report.end_reason, EndReason::RangeCovered);
}

#[tokio::test]
async fn test_rerun_on_complete_sink_is_noop() {
    let transport = Arc::new(SeriesTransport::contiguous(T0, 10, HOUR));
    let engine = engine_over(transport.clone(), 4, RecordingObserver::new());
    let job = IngestJob::new("BTCUSDT", "1h", T0, T0 + 10 * HOUR);

    let mut sink = MemorySink::new();
    engine.run(&job, &mut sink).await.unwrap();
    let calls_after_first = transport.call_count();

    let report = engine.run(&job, &mut sink).await.unwrap();
    assert_eq!(report.candles_ingested, 0);
    assert_eq!(report.requests, 0);
    assert_eq!(report.end_reason, EndReason::AlreadyComplete);
    assert_eq!(transport.call_count(), calls_after_first);
    assert_eq!(open_times(&sink).len(), 10);
}

#[tokio::test]
async fn test_resume_starts_after_last_persisted_row() {
    let transport = Arc::new(SeriesTransport::contiguous(T0, 10, HOUR));
    let observer = RecordingObserver::new();
    let engine = engine_over(transport.clone(), 4, observer.clone());

    let mut sink = MemorySink::new();
    let seed = IngestJob::new("BTCUSDT", "1h", T0, T0 + 3 * HOUR);
    engine.run(&seed, &mut sink).await.unwrap();
    assert_eq!(open_times(&sink).len(), 3);

    let job = IngestJob::new("BTCUSDT", "1h", T0, T0 + 10 * HOUR);
    let report = engine.run(&job, &mut sink).await.unwrap();

    assert_eq!(report.effective_start, T0 + 3 * HOUR);
    assert_eq!(report.candles_ingested, 7);
    let expected: Vec<_> = (0..10).map(|i| T0 + i * HOUR).collect();
    assert_eq!(open_times(&sink), expected);

    let last_start = observer.starts.lock().unwrap().last().cloned().unwrap();
    assert_eq!(last_start.2.start, T0 + 3 * HOUR);
}

#[tokio::test]
async fn test_unsupported_interval_makes_no_request() {
    let transport = Arc::new(ScriptedTransport::new());
    let engine = engine_over(transport.clone(), 1000, RecordingObserver::new());

    let job = IngestJob::new("BTCUSDT", "7m", T0, T0 + HOUR);
    let mut sink = MemorySink::new();
    let err = engine.run(&job, &mut sink).await.unwrap_err();

    assert!(matches!(err, IngestError::UnsupportedInterval(_)));
    assert_eq!(transport.call_count(), 0);
    assert!(sink.candles().is_empty());
}

#[tokio::test]
async fn test_invalid_range_makes_no_request() {
    let transport = Arc::new(ScriptedTransport::new());
    let engine = engine_over(transport.clone(), 1000, RecordingObserver::new());

    let job = IngestJob::new("BTCUSDT", "1h", T0 + HOUR, T0);
    let err = engine.run(&job, &mut MemorySink::new()).await.unwrap_err();

    assert!(matches!(err, IngestError::InvalidRange { .. }));
    assert_eq!(transport.call_count(), 0);
}

#[tokio::test]
async fn test_rows_behind_cursor_stall_the_job() {
    // Second answer only repeats rows that are already persisted
    let transport = Arc::new(
        ScriptedTransport::new()
            .respond_rows((0..4).map(|i| T0 + i * HOUR), HOUR)
            .respond_rows((0..2).map(|i| T0 + i * HOUR), HOUR),
    );
    let observer = RecordingObserver::new();
    let engine = engine_over(transport, 4, observer.clone());

    let job = IngestJob::new("BTCUSDT", "1h", T0, T0 + 10 * HOUR);
    let mut sink = MemorySink::new();
    let err = engine.run(&job, &mut sink).await.unwrap_err();

    match err {
        IngestError::StalledCursor {
            cursor,
            last_open_time,
            ..
        } => {
            assert_eq!(cursor, T0 + 4 * HOUR);
            assert_eq!(last_open_time, T0 + HOUR);
        }
        other => panic!("expected stalled cursor, got {other:?}"),
    }
    assert_eq!(open_times(&sink).len(), 4);
    assert_eq!(observer.failures.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_month_interval_windows() {
    // 2024-01-01 .. 2024-04-01, calendar months
    let months = vec![
        T0,
        1_706_745_600_000, // 2024-02-01
        1_709_251_200_000, // 2024-03-01
    ];
    let end = 1_711_929_600_000; // 2024-04-01
    let body: Vec<_> = months
        .iter()
        .zip(months.iter().skip(1).chain(std::iter::once(&end)))
        .map(|(open, next)| {
            serde_json::json!([
                open, "1", "2", "0.5", "1.5", "10", next - 1, "15", 3, "5", "7", "0"
            ])
        })
        .collect();
    let transport = Arc::new(ScriptedTransport::new().respond(
        kline_backfill::fetcher::RawResponse::ok(serde_json::Value::Array(body).to_string()),
    ));
    let engine = engine_over(transport.clone(), 1000, RecordingObserver::new());

    let job = IngestJob::new("BTCUSDT", "1M", T0, end);
    let mut sink = MemorySink::new();
    let report = engine.run(&job, &mut sink).await.unwrap();

    assert_eq!(open_times(&sink), months);
    assert_eq!(report.interval, Interval::OneMonth);
    assert_eq!(report.end_reason, EndReason::RangeCovered);
    assert_eq!(report.final_cursor, end);
    assert_eq!(transport.call_count(), 1);
    assert_eq!(transport.calls()[0].param("interval"), Some("1M"));
}

#[tokio::test]
async fn test_month_resume_after_february() {
    let feb = 1_706_745_600_000; // 2024-02-01
    let mar = 1_709_251_200_000; // 2024-03-01
    let apr = 1_711_929_600_000; // 2024-04-01
    let transport = Arc::new(ScriptedTransport::new().respond(
        kline_backfill::fetcher::RawResponse::ok(month_rows(&[(mar, apr)]).to_string()),
    ));
    let engine = engine_over(transport.clone(), 1000, RecordingObserver::new());

    let seed = KlineParser::parse_klines(month_rows(&[(feb, mar)]), Interval::OneMonth).unwrap();
    let mut sink = MemorySink::new();
    sink.append(&seed).unwrap();

    let job = IngestJob::new("BTCUSDT", "1M", T0, apr);
    let report = engine.run(&job, &mut sink).await.unwrap();

    assert_eq!(report.effective_start, mar);
    assert_eq!(transport.calls()[0].param_i64("startTime"), Some(mar));
    assert_eq!(open_times(&sink), vec![feb, mar]);
    assert_eq!(report.end_reason, EndReason::RangeCovered);
}
