//! Kline query parameters and response decoding
//!
//! Wire format of one row:
//! `[open_time, open, high, low, close, volume, close_time, quote_volume, trades,
//! taker_buy_base, taker_buy_quote, ignore]`

use crate::fetcher::{FetcherError, FetcherResult};
use crate::{Candle, FetchWindow, Interval};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Default trading pair
pub const DEFAULT_SYMBOL: &str = "BTCUSDT";

/// Default bar interval
pub const DEFAULT_INTERVAL: Interval = Interval::OneMinute;

/// Exchange cap on rows per klines request
pub const DEFAULT_LIMIT: u32 = 1000;

/// Explicit klines request configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KlineQuery {
    /// Trading symbol (e.g., "BTCUSDT")
    pub symbol: String,
    /// Bar interval
    pub interval: Interval,
    /// Inclusive start (epoch ms)
    pub start_time: Option<i64>,
    /// Inclusive end (epoch ms)
    pub end_time: Option<i64>,
    /// Maximum rows to return
    pub limit: u32,
}

impl Default for KlineQuery {
    fn default() -> Self {
        Self {
            symbol: DEFAULT_SYMBOL.to_string(),
            interval: DEFAULT_INTERVAL,
            start_time: None,
            end_time: None,
            limit: DEFAULT_LIMIT,
        }
    }
}

impl KlineQuery {
    /// Query covering a half-open window.
    ///
    /// The exchange treats `endTime` as inclusive, so the last millisecond of the
    /// window is sent.
    pub fn for_window(symbol: &str, interval: Interval, window: FetchWindow, limit: u32) -> Self {
        Self {
            symbol: symbol.to_string(),
            interval,
            start_time: Some(window.start),
            end_time: Some(window.end - 1),
            limit,
        }
    }

    /// Query string parameters in wire order
    pub fn to_params(&self) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("symbol", self.symbol.clone()),
            ("interval", self.interval.to_string()),
        ];
        if let Some(start) = self.start_time {
            params.push(("startTime", start.to_string()));
        }
        if let Some(end) = self.end_time {
            params.push(("endTime", end.to_string()));
        }
        params.push(("limit", self.limit.to_string()));
        params
    }
}

/// Stateless decoder for klines responses
pub struct KlineParser;

impl KlineParser {
    /// Decode a klines body into candles for `interval`.
    ///
    /// Any structural or value problem makes the whole response malformed.
    pub fn parse_klines(body: Value, interval: Interval) -> FetcherResult<Vec<Candle>> {
        let rows = match body {
            Value::Array(rows) => rows,
            other => {
                return Err(FetcherError::MalformedResponse(format!(
                    "expected an array of klines, got {}",
                    json_type(&other)
                )))
            }
        };

        let mut candles = Vec::with_capacity(rows.len());
        for (index, row) in rows.iter().enumerate() {
            let candle = Self::parse_row(row)
                .map_err(|reason| FetcherError::MalformedResponse(format!("row {index}: {reason}")))?;

            candle
                .validate()
                .map_err(|reason| FetcherError::MalformedResponse(format!("row {index}: {reason}")))?;

            if !candle.spans_interval(interval) {
                return Err(FetcherError::MalformedResponse(format!(
                    "row {index}: bar spans {}ms, expected one {} interval",
                    candle.close_time - candle.open_time,
                    interval
                )));
            }

            candles.push(candle);
        }

        Ok(candles)
    }

    fn parse_row(row: &Value) -> Result<Candle, String> {
        let arr = row.as_array().ok_or("kline is not an array")?;

        if arr.len() < 11 {
            return Err(format!("expected at least 11 elements in kline, got {}", arr.len()));
        }

        let open_time = arr[0].as_i64().ok_or("invalid open_time")?;
        let close_time = arr[6].as_i64().ok_or("invalid close_time")?;
        let trade_count = arr[8].as_u64().ok_or("invalid trades count")?;

        Ok(Candle {
            open_time,
            open: parse_decimal(&arr[1], "open")?,
            high: parse_decimal(&arr[2], "high")?,
            low: parse_decimal(&arr[3], "low")?,
            close: parse_decimal(&arr[4], "close")?,
            volume: parse_decimal(&arr[5], "volume")?,
            close_time,
            quote_volume: parse_decimal(&arr[7], "quote_volume")?,
            trade_count,
            taker_buy_base_volume: parse_decimal(&arr[9], "taker_buy_base_volume")?,
            taker_buy_quote_volume: parse_decimal(&arr[10], "taker_buy_quote_volume")?,
        })
    }
}

fn parse_decimal(value: &Value, field_name: &str) -> Result<Decimal, String> {
    let s = value
        .as_str()
        .ok_or_else(|| format!("{field_name} is not a string"))?;

    Decimal::from_str(s).map_err(|e| format!("failed to parse {field_name}: {e}"))
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
