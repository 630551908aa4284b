//! Time range arguments
//!
//! Accepted forms:
//! - `YYYY-MM-DD` (start of day UTC; an end date covers the whole day)
//! - RFC3339, with or without a zone designator (no zone means UTC)
//! - relative `--days-ago START[,END]`, counted back from now

use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, Utc};

use super::CliError;

const DAY_MS: i64 = 86_400_000;

/// Try to parse datetime from RFC3339 format
///
/// - "2024-01-01T00:00:00Z" - explicit UTC
/// - "2024-01-01T00:00:00+01:00" - explicit offset
/// - "2024-01-01T00:00:00" - no timezone, assumed UTC
fn try_parse_datetime_rfc3339(input: &str) -> Option<i64> {
    let input = input.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.timestamp_millis());
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(&format!("{input}Z")) {
        return Some(dt.timestamp_millis());
    }

    None
}

fn parse_date(input: &str, what: &str) -> Result<i64, CliError> {
    let date = NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|e| CliError::InvalidArgument(format!("Invalid {what} time {input:?}: {e}")))?;
    let datetime = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| CliError::InvalidArgument(format!("Invalid {what} time")))?;
    Ok(datetime.and_utc().timestamp_millis())
}

/// Parse a start time; a bare date means 00:00:00 UTC that day.
pub fn parse_start_time(input: &str) -> Result<i64, CliError> {
    if let Some(ts) = try_parse_datetime_rfc3339(input) {
        return Ok(ts);
    }
    parse_date(input, "start")
}

/// Parse an exclusive end time; a bare date means midnight after that day, so the
/// whole day is included.
pub fn parse_end_time(input: &str) -> Result<i64, CliError> {
    if let Some(ts) = try_parse_datetime_rfc3339(input) {
        return Ok(ts);
    }
    Ok(parse_date(input, "end")? + DAY_MS)
}

/// Parse `START[,END]` days back from now into `(start_days, end_days)`.
pub fn parse_days_ago(input: &str) -> Result<(u32, u32), String> {
    let mut parts = input.split(',').map(str::trim);
    let start: u32 = parts
        .next()
        .unwrap_or_default()
        .parse()
        .map_err(|_| format!("'{input}' is not START[,END] in days"))?;
    let end: u32 = match parts.next() {
        Some(value) => value
            .parse()
            .map_err(|_| format!("'{input}' is not START[,END] in days"))?,
        None => 0,
    };
    if parts.next().is_some() {
        return Err(format!("'{input}' has more than two values"));
    }
    if start <= end {
        return Err(format!(
            "start ({start} days ago) must be further back than end ({end} days ago)"
        ));
    }
    Ok((start, end))
}

/// Resolve CLI time arguments into `[start, end)` epoch milliseconds.
pub fn resolve_range(
    start: Option<&str>,
    end: Option<&str>,
    days_ago: Option<(u32, u32)>,
    now: DateTime<Utc>,
) -> Result<(i64, i64), CliError> {
    let (start_ms, end_ms) = match (start, days_ago) {
        (Some(_), Some(_)) => {
            return Err(CliError::InvalidArgument(
                "--start and --days-ago are mutually exclusive".to_string(),
            ))
        }
        (None, None) => {
            return Err(CliError::InvalidArgument(
                "either --start or --days-ago is required".to_string(),
            ))
        }
        (Some(start), None) => {
            let end_ms = match end {
                Some(end) => parse_end_time(end)?,
                None => now.timestamp_millis(),
            };
            (parse_start_time(start)?, end_ms)
        }
        (None, Some((start_days, end_days))) => {
            if end.is_some() {
                return Err(CliError::InvalidArgument(
                    "--end cannot be combined with --days-ago".to_string(),
                ));
            }
            let start = now - ChronoDuration::days(i64::from(start_days));
            let end = now - ChronoDuration::days(i64::from(end_days));
            (start.timestamp_millis(), end.timestamp_millis())
        }
    };

    if end_ms <= start_ms {
        return Err(CliError::InvalidArgument(format!(
            "end ({end_ms}) must be after start ({start_ms})"
        )));
    }
    Ok((start_ms, end_ms))
}
