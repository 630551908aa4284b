//! Cancellation at chunk boundaries

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use kline_backfill::downloader::{CursorStatus, EndReason, IngestJob, PaginationCursorEngine};
use kline_backfill::observer::{ChunkEvent, FanoutObserver, IngestObserver};
use kline_backfill::output::{MemorySink, SeriesSink};
use kline_backfill::shutdown::{ShutdownCoordinator, SharedShutdown};

use crate::support::{executor, test_config, RecordingObserver, SeriesTransport, HOUR, T0};

/// Requests shutdown once `after` chunks were appended
struct CancelAfter {
    shutdown: SharedShutdown,
    after: usize,
    seen: AtomicUsize,
}

impl IngestObserver for CancelAfter {
    fn on_chunk(&self, _event: &ChunkEvent) {
        if self.seen.fetch_add(1, Ordering::SeqCst) + 1 == self.after {
            self.shutdown.request_shutdown();
        }
    }
}

fn engine(
    transport: Arc<SeriesTransport>,
    shutdown: SharedShutdown,
    extra: Arc<dyn IngestObserver>,
    politeness: Duration,
) -> PaginationCursorEngine {
    let mut config = test_config(2);
    config.politeness_delay = politeness;
    let config = Arc::new(config);
    let observer: Arc<dyn IngestObserver> =
        Arc::new(FanoutObserver::new().with(RecordingObserver::new()).with(extra));
    let executor = executor(transport, config.clone(), observer.clone());
    PaginationCursorEngine::new(executor, config, observer).with_shutdown(shutdown)
}

#[tokio::test]
async fn test_cancel_between_chunks_keeps_complete_prefix() {
    let shutdown = ShutdownCoordinator::shared();
    let transport = Arc::new(SeriesTransport::contiguous(T0, 10, HOUR));
    let cancel = Arc::new(CancelAfter {
        shutdown: shutdown.clone(),
        after: 2,
        seen: AtomicUsize::new(0),
    });
    let engine = engine(transport.clone(), shutdown, cancel, Duration::ZERO);

    let job = IngestJob::new("BTCUSDT", "1h", T0, T0 + 10 * HOUR);
    let mut sink = MemorySink::new();
    let report = engine.run(&job, &mut sink).await.unwrap();

    assert_eq!(report.end_reason, EndReason::Cancelled);
    assert_eq!(report.status, CursorStatus::Terminated);
    assert_eq!(transport.call_count(), 2);
    assert_eq!(sink.candles().len(), 4);
    assert_eq!(sink.last_open_time(), Some(T0 + 3 * HOUR));
    assert_eq!(report.final_cursor, T0 + 4 * HOUR);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_interrupts_politeness_pause() {
    let shutdown = ShutdownCoordinator::shared();
    let transport = Arc::new(SeriesTransport::contiguous(T0, 10, HOUR));
    let engine = engine(
        transport.clone(),
        shutdown.clone(),
        RecordingObserver::new(),
        Duration::from_secs(3600),
    );

    let job = IngestJob::new("BTCUSDT", "1h", T0, T0 + 10 * HOUR);
    let run = tokio::spawn(async move {
        let mut sink = MemorySink::new();
        let report = engine.run(&job, &mut sink).await;
        (report, sink)
    });

    tokio::time::sleep(Duration::from_secs(1)).await;
    shutdown.request_shutdown();

    let (report, sink) = run.await.unwrap();
    let report = report.unwrap();
    assert_eq!(report.end_reason, EndReason::Cancelled);
    assert_eq!(transport.call_count(), 1);
    assert_eq!(sink.candles().len(), 2);
}

#[tokio::test]
async fn test_cancel_before_first_request() {
    let shutdown = ShutdownCoordinator::shared();
    shutdown.request_shutdown();
    let transport = Arc::new(SeriesTransport::contiguous(T0, 10, HOUR));
    let engine = engine(transport.clone(), shutdown, RecordingObserver::new(), Duration::ZERO);

    let job = IngestJob::new("BTCUSDT", "1h", T0, T0 + 10 * HOUR);
    let report = engine.run(&job, &mut MemorySink::new()).await.unwrap();

    assert_eq!(report.end_reason, EndReason::Cancelled);
    assert_eq!(report.requests, 0);
    assert_eq!(transport.call_count(), 0);
}
