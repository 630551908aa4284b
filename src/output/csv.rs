//! CSV series sink
//!
//! Layout: header `timestamp,open,high,low,close,volume`, one row per candle, with
//! `timestamp` as the UTC open time rendered `YYYY-MM-DD HH:MM:SS`.

use chrono::{DateTime, NaiveDateTime, Utc};
use csv::{Writer, WriterBuilder};
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::{check_order, OutputError, OutputResult, SeriesSink};
use crate::resume::OutputLock;
use crate::{Candle, Interval};

/// Column names, in order
pub const HEADER: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

/// Timestamp format of the `timestamp` column
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer
const TAIL_CHUNK: u64 = 4096;

/// CSV record for one candle
#[derive(Debug, Serialize)]
struct CandleRecord {
    timestamp: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
}

impl From<&Candle> for CandleRecord {
    fn from(candle: &Candle) -> Self {
        Self {
            timestamp: format_timestamp(candle.open_time),
            open: candle.open.to_string(),
            high: candle.high.to_string(),
            low: candle.low.to_string(),
            close: candle.close.to_string(),
            volume: candle.volume.to_string(),
        }
    }
}

/// Render epoch milliseconds in the `timestamp` column format
pub fn format_timestamp(millis: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(millis)
        .map(|dt| dt.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| millis.to_string())
}

/// Parse a `timestamp` column value back to epoch milliseconds
pub fn parse_timestamp(value: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(value.trim(), TIMESTAMP_FORMAT)
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// Append-only CSV sink holding an exclusive lock on its file
pub struct CsvSeriesSink {
    writer: Writer<BufWriter<File>>,
    path: PathBuf,
    last_open_time: Option<i64>,
    rows_written: u64,
    _lock: OutputLock,
}

impl CsvSeriesSink {
    /// Open `path` for resuming: existing rows are kept and appends continue after
    /// the last one. A missing or empty file gets a header.
    pub fn open<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        Self::open_with(path.as_ref(), false)
    }

    /// Open `path` discarding any existing content
    pub fn create<P: AsRef<Path>>(path: P) -> OutputResult<Self> {
        Self::open_with(path.as_ref(), true)
    }

    fn open_with(path: &Path, truncate: bool) -> OutputResult<Self> {
        info!("Opening CSV sink: path={} fresh={}", path.display(), truncate);

        let lock = OutputLock::try_acquire(path)?;

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(truncate)
            .open(path)
            .map_err(|e| OutputError::IoError(format!("Failed to open {}: {e}", path.display())))?;

        let tail = read_tail(&mut file, path)?;
        file.seek(SeekFrom::End(0))
            .map_err(|e| OutputError::IoError(format!("Failed to seek: {e}")))?;

        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .from_writer(BufWriter::with_capacity(DEFAULT_BUFFER_SIZE, file));

        if tail.empty {
            writer
                .write_record(HEADER)
                .map_err(|e| OutputError::CsvError(format!("Failed to write header: {e}")))?;
            sync(&mut writer)?;
        }

        if let Some(last) = tail.last_open_time {
            info!(
                "Resuming {} after last persisted row {}",
                path.display(),
                format_timestamp(last)
            );
        }

        Ok(Self {
            writer,
            path: path.to_path_buf(),
            last_open_time: tail.last_open_time,
            rows_written: 0,
            _lock: lock,
        })
    }

    /// Output path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rows appended through this handle
    pub fn rows_written(&self) -> u64 {
        self.rows_written
    }
}

impl SeriesSink for CsvSeriesSink {
    fn append(&mut self, candles: &[Candle]) -> OutputResult<usize> {
        check_order(self.last_open_time, candles)?;
        let Some(last) = candles.last() else {
            return Ok(0);
        };

        for candle in candles {
            self.writer
                .serialize(CandleRecord::from(candle))
                .map_err(|e| OutputError::CsvError(format!("Failed to write candle: {e}")))?;
        }
        sync(&mut self.writer)?;

        self.last_open_time = Some(last.open_time);
        self.rows_written += candles.len() as u64;
        debug!(
            "Appended {} rows to {} (last {})",
            candles.len(),
            self.path.display(),
            format_timestamp(last.open_time)
        );
        Ok(candles.len())
    }

    fn last_open_time(&self) -> Option<i64> {
        self.last_open_time
    }
}

/// Flush the CSV buffer and fsync the file
fn sync(writer: &mut Writer<BufWriter<File>>) -> OutputResult<()> {
    writer
        .flush()
        .map_err(|e| OutputError::FlushError(format!("Failed to flush: {e}")))?;
    writer
        .get_ref()
        .get_ref()
        .sync_data()
        .map_err(|e| OutputError::IoError(format!("Failed to sync file: {e}")))
}

struct Tail {
    empty: bool,
    last_open_time: Option<i64>,
}

/// Find the last complete row. A trailing partial line left by an interrupted write
/// is cut off so appends start on a clean line.
fn read_tail(file: &mut File, path: &Path) -> OutputResult<Tail> {
    let len = file
        .metadata()
        .map_err(|e| OutputError::IoError(e.to_string()))?
        .len();
    if len == 0 {
        return Ok(Tail {
            empty: true,
            last_open_time: None,
        });
    }

    let mut window = TAIL_CHUNK.min(len);
    let buffer = loop {
        let mut buffer = vec![0u8; window as usize];
        file.seek(SeekFrom::Start(len - window))
            .and_then(|_| file.read_exact(&mut buffer))
            .map_err(|e| OutputError::IoError(format!("Failed to read tail: {e}")))?;

        // Need at least one full line (two newlines, or the whole file)
        let newlines = buffer.iter().filter(|&&b| b == b'\n').count();
        if window == len || newlines >= 2 {
            break buffer;
        }
        window = (window * 2).min(len);
    };

    let mut complete = buffer.as_slice();
    if buffer.last() != Some(&b'\n') {
        let keep = buffer.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);
        let new_len = len - window + keep as u64;
        warn!(
            "Discarding partial trailing line in {} ({} bytes)",
            path.display(),
            len - new_len
        );
        file.set_len(new_len)
            .map_err(|e| OutputError::IoError(format!("Failed to truncate partial line: {e}")))?;
        if new_len == 0 {
            return Ok(Tail {
                empty: true,
                last_open_time: None,
            });
        }
        complete = &buffer[..keep];
    }

    let text = String::from_utf8_lossy(complete);
    let last_line = text.lines().rev().find(|line| !line.trim().is_empty());
    let Some(last_line) = last_line else {
        return Ok(Tail {
            empty: true,
            last_open_time: None,
        });
    };

    let first_field = last_line.split(',').next().unwrap_or_default();
    if first_field == HEADER[0] {
        return Ok(Tail {
            empty: false,
            last_open_time: None,
        });
    }

    match parse_timestamp(first_field) {
        Some(ts) => Ok(Tail {
            empty: false,
            last_open_time: Some(ts),
        }),
        None => Err(OutputError::Corrupt {
            line: count_lines(file)?,
            reason: format!("cannot parse timestamp {first_field:?}"),
        }),
    }
}

fn count_lines(file: &mut File) -> OutputResult<u64> {
    file.seek(SeekFrom::Start(0))
        .map_err(|e| OutputError::IoError(e.to_string()))?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)
        .map_err(|e| OutputError::IoError(e.to_string()))?;
    Ok(contents.iter().filter(|&&b| b == b'\n').count() as u64)
}

/// Missing stretch between two consecutive rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gap {
    /// Open time of the row before the gap
    pub after: i64,
    /// Open time of the row after the gap
    pub before: i64,
    /// Bars missing in between
    pub missing_bars: u64,
}

/// Result of re-reading a persisted series
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeriesCheck {
    /// Data rows
    pub rows: u64,
    /// First open time
    pub first: Option<i64>,
    /// Last open time
    pub last: Option<i64>,
    /// Line numbers where the timestamp went backwards
    pub out_of_order: Vec<u64>,
    /// Line numbers repeating the previous timestamp
    pub duplicates: Vec<u64>,
    /// Stretches where consecutive rows are more than one interval apart
    pub gaps: Vec<Gap>,
}

impl SeriesCheck {
    /// No ordering or duplicate violations
    pub fn is_ordered(&self) -> bool {
        self.out_of_order.is_empty() && self.duplicates.is_empty()
    }

    /// Ordered and gap-free
    pub fn is_contiguous(&self) -> bool {
        self.is_ordered() && self.gaps.is_empty()
    }
}

/// Re-read a CSV series and check ordering, duplicates and spacing
pub fn validate_series<P: AsRef<Path>>(path: P, interval: Interval) -> OutputResult<SeriesCheck> {
    let path = path.as_ref();
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| OutputError::CsvError(format!("Failed to open {}: {e}", path.display())))?;

    let headers = reader
        .headers()
        .map_err(|e| OutputError::CsvError(e.to_string()))?
        .clone();
    if headers.get(0) != Some(HEADER[0]) {
        return Err(OutputError::Corrupt {
            line: 1,
            reason: format!("expected first column {:?}", HEADER[0]),
        });
    }

    let interval_ms = interval.to_milliseconds();
    let mut check = SeriesCheck::default();
    let mut previous: Option<i64> = None;

    for (index, record) in reader.records().enumerate() {
        let line = index as u64 + 2;
        let record = record.map_err(|e| OutputError::CsvError(e.to_string()))?;
        let field = record.get(0).unwrap_or_default();
        let ts = parse_timestamp(field).ok_or_else(|| OutputError::Corrupt {
            line,
            reason: format!("cannot parse timestamp {field:?}"),
        })?;

        check.rows += 1;
        check.first.get_or_insert(ts);

        if let Some(prev) = previous {
            if ts == prev {
                check.duplicates.push(line);
            } else if ts < prev {
                check.out_of_order.push(line);
            } else if interval != Interval::OneMonth && ts - prev != interval_ms {
                check.gaps.push(Gap {
                    after: prev,
                    before: ts,
                    missing_bars: ((ts - prev) / interval_ms).saturating_sub(1) as u64,
                });
            }
        }

        if previous.map_or(true, |prev| ts > prev) {
            previous = Some(ts);
        }
        check.last = Some(ts);
    }

    Ok(check)
}
