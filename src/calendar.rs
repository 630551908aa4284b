//! Interval symbols, durations and fetch window boundaries
//!
//! The calendar is pure arithmetic: it never touches the network, so an
//! unsupported interval is rejected before any request is issued.

use chrono::{DateTime, Months, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Calendar errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CalendarError {
    /// Interval symbol not recognized
    #[error("unsupported interval: {0:?}")]
    UnsupportedInterval(String),
}

/// Time interval for OHLCV bars
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    /// 1 minute
    #[serde(rename = "1m")]
    OneMinute,
    /// 3 minutes
    #[serde(rename = "3m")]
    ThreeMinutes,
    /// 5 minutes
    #[serde(rename = "5m")]
    FiveMinutes,
    /// 15 minutes
    #[serde(rename = "15m")]
    FifteenMinutes,
    /// 30 minutes
    #[serde(rename = "30m")]
    ThirtyMinutes,
    /// 1 hour
    #[serde(rename = "1h")]
    OneHour,
    /// 2 hours
    #[serde(rename = "2h")]
    TwoHours,
    /// 4 hours
    #[serde(rename = "4h")]
    FourHours,
    /// 6 hours
    #[serde(rename = "6h")]
    SixHours,
    /// 8 hours
    #[serde(rename = "8h")]
    EightHours,
    /// 12 hours
    #[serde(rename = "12h")]
    TwelveHours,
    /// 1 day
    #[serde(rename = "1d")]
    OneDay,
    /// 3 days
    #[serde(rename = "3d")]
    ThreeDays,
    /// 1 week
    #[serde(rename = "1w")]
    OneWeek,
    /// 1 month (fixed 30-day approximation)
    #[serde(rename = "1M")]
    OneMonth,
}

impl Interval {
    /// Every supported interval, shortest first
    pub const ALL: [Interval; 15] = [
        Interval::OneMinute,
        Interval::ThreeMinutes,
        Interval::FiveMinutes,
        Interval::FifteenMinutes,
        Interval::ThirtyMinutes,
        Interval::OneHour,
        Interval::TwoHours,
        Interval::FourHours,
        Interval::SixHours,
        Interval::EightHours,
        Interval::TwelveHours,
        Interval::OneDay,
        Interval::ThreeDays,
        Interval::OneWeek,
        Interval::OneMonth,
    ];

    /// Convert interval to milliseconds
    pub fn to_milliseconds(&self) -> i64 {
        match self {
            Interval::OneMinute => 60_000,
            Interval::ThreeMinutes => 180_000,
            Interval::FiveMinutes => 300_000,
            Interval::FifteenMinutes => 900_000,
            Interval::ThirtyMinutes => 1_800_000,
            Interval::OneHour => 3_600_000,
            Interval::TwoHours => 7_200_000,
            Interval::FourHours => 14_400_000,
            Interval::SixHours => 21_600_000,
            Interval::EightHours => 28_800_000,
            Interval::TwelveHours => 43_200_000,
            Interval::OneDay => 86_400_000,
            Interval::ThreeDays => 259_200_000,
            Interval::OneWeek => 604_800_000,
            Interval::OneMonth => 2_592_000_000, // Approximate: 30 days
        }
    }

    /// Wire symbol for this interval (e.g. "1h")
    pub fn as_str(&self) -> &'static str {
        match self {
            Interval::OneMinute => "1m",
            Interval::ThreeMinutes => "3m",
            Interval::FiveMinutes => "5m",
            Interval::FifteenMinutes => "15m",
            Interval::ThirtyMinutes => "30m",
            Interval::OneHour => "1h",
            Interval::TwoHours => "2h",
            Interval::FourHours => "4h",
            Interval::SixHours => "6h",
            Interval::EightHours => "8h",
            Interval::TwelveHours => "12h",
            Interval::OneDay => "1d",
            Interval::ThreeDays => "3d",
            Interval::OneWeek => "1w",
            Interval::OneMonth => "1M",
        }
    }
}

impl std::fmt::Display for Interval {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = CalendarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Interval::ALL
            .iter()
            .copied()
            .find(|interval| interval.as_str() == s)
            .ok_or_else(|| CalendarError::UnsupportedInterval(s.to_string()))
    }
}

/// Translate an interval symbol into its duration in milliseconds
pub fn to_millis(symbol: &str) -> Result<i64, CalendarError> {
    Interval::from_str(symbol).map(|interval| interval.to_milliseconds())
}

/// One API-call-sized slice of the requested range: `[start, end)` in epoch ms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchWindow {
    /// Inclusive start (epoch ms)
    pub start: i64,
    /// Exclusive end (epoch ms)
    pub end: i64,
}

impl FetchWindow {
    /// Plan the window starting at `start`
    pub fn plan(start: i64, interval_ms: i64, max_bars: u32, global_end: i64) -> Self {
        Self {
            start,
            end: window_end(start, interval_ms, max_bars, global_end),
        }
    }

    /// Number of bar slots the window can hold
    pub fn bar_slots(&self, interval_ms: i64) -> u64 {
        expected_bars(self.start, self.end, interval_ms)
    }

    /// Whether the window covers no time at all
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

impl std::fmt::Display for FetchWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// `min(start + max_bars * interval_ms, global_end)`
pub fn window_end(start: i64, interval_ms: i64, max_bars: u32, global_end: i64) -> i64 {
    let span = interval_ms.saturating_mul(i64::from(max_bars));
    start.saturating_add(span).min(global_end)
}

/// Open time of the bar after the one opening at `open_time`.
///
/// `1M` bars open on calendar month boundaries, so its step is one calendar
/// month rather than the fixed 30-day duration. Every other interval steps
/// by `interval_ms`.
pub fn next_open_time(open_time: i64, interval_ms: i64) -> i64 {
    if interval_ms == Interval::OneMonth.to_milliseconds() {
        if let Some(next) = DateTime::<Utc>::from_timestamp_millis(open_time)
            .and_then(|open| open.checked_add_months(Months::new(1)))
        {
            return next.timestamp_millis();
        }
    }
    open_time.saturating_add(interval_ms)
}

/// Number of bars whose open time falls in `[start, end)`
pub fn expected_bars(start: i64, end: i64, interval_ms: i64) -> u64 {
    if end <= start || interval_ms <= 0 {
        return 0;
    }
    ((end - start + interval_ms - 1) / interval_ms) as u64
}
