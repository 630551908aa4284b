//! Interval table and window arithmetic

use std::str::FromStr;

use kline_backfill::calendar::{expected_bars, to_millis, window_end, CalendarError};
use kline_backfill::downloader::CursorState;
use kline_backfill::{FetchWindow, Interval};

#[test]
fn test_every_interval_round_trips() {
    for interval in Interval::ALL {
        let parsed = Interval::from_str(interval.as_str()).unwrap();
        assert_eq!(parsed, interval);
        assert_eq!(to_millis(&interval.to_string()).unwrap(), interval.to_milliseconds());
    }
}

#[test]
fn test_interval_durations() {
    let expected = [
        ("1m", 60_000),
        ("3m", 180_000),
        ("5m", 300_000),
        ("15m", 900_000),
        ("30m", 1_800_000),
        ("1h", 3_600_000),
        ("2h", 7_200_000),
        ("4h", 14_400_000),
        ("6h", 21_600_000),
        ("8h", 28_800_000),
        ("12h", 43_200_000),
        ("1d", 86_400_000),
        ("3d", 259_200_000),
        ("1w", 604_800_000),
        ("1M", 2_592_000_000),
    ];
    for (symbol, ms) in expected {
        assert_eq!(to_millis(symbol).unwrap(), ms, "{symbol}");
    }
}

#[test]
fn test_symbols_are_case_sensitive() {
    assert_ne!(to_millis("1m").unwrap(), to_millis("1M").unwrap());
    assert_eq!(
        to_millis("1H"),
        Err(CalendarError::UnsupportedInterval("1H".to_string()))
    );
    assert!(to_millis("").is_err());
}

#[test]
fn test_full_window_advances_by_max_bars() {
    let start = 1_704_067_200_000;
    for interval in Interval::ALL {
        let ms = interval.to_milliseconds();
        let end = window_end(start, ms, 1000, i64::MAX);
        assert_eq!(end - start, 1000 * ms);

        // Cursor after a full window of bars
        let mut cursor = CursorState::new(start, i64::MAX, ms);
        let last = start + 999 * ms;
        assert_eq!(cursor.advance_past(last).unwrap(), start + 1000 * ms);
    }
}

#[test]
fn test_window_clamped_to_range_end() {
    let window = FetchWindow::plan(0, 60_000, 1000, 90_000);
    assert_eq!(window, FetchWindow { start: 0, end: 90_000 });
    assert_eq!(window.bar_slots(60_000), 2);
    assert_eq!(expected_bars(0, 0, 60_000), 0);
}
