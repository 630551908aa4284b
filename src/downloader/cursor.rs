//! Cursor state machine for one ingestion job

use serde::{Deserialize, Serialize};

use crate::calendar::{next_open_time, FetchWindow};

/// Cursor lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorStatus {
    /// Created, nothing requested yet
    Initialized,
    /// A window request is in flight
    Fetching,
    /// A non-empty chunk is being persisted and the cursor moved past it
    Advancing,
    /// The API returned an empty window (live edge)
    Exhausted,
    /// An error ended the job
    Failed,
    /// The loop exited normally
    Terminated,
}

impl CursorStatus {
    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: CursorStatus) -> bool {
        use CursorStatus::*;
        matches!(
            (self, next),
            (Initialized, Fetching)
                | (Initialized, Terminated)
                | (Fetching, Advancing)
                | (Fetching, Exhausted)
                | (Fetching, Failed)
                | (Advancing, Fetching)
                | (Advancing, Failed)
                | (Advancing, Terminated)
                | (Exhausted, Terminated)
        )
    }

    /// No further transitions possible
    pub fn is_final(self) -> bool {
        matches!(self, CursorStatus::Failed | CursorStatus::Terminated)
    }
}

impl std::fmt::Display for CursorStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CursorStatus::Initialized => "initialized",
            CursorStatus::Fetching => "fetching",
            CursorStatus::Advancing => "advancing",
            CursorStatus::Exhausted => "exhausted",
            CursorStatus::Failed => "failed",
            CursorStatus::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Illegal state machine transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal cursor transition {from} -> {to}")]
pub struct InvalidTransition {
    /// Current status
    pub from: CursorStatus,
    /// Requested status
    pub to: CursorStatus,
}

/// The cursor was asked to move to a position that is not after its current one
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stalled {
    /// Cursor position
    pub cursor: i64,
    /// Last open time the response carried
    pub last_open_time: i64,
}

/// Position of one job in its requested range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorState {
    current_start: i64,
    target_end: i64,
    interval_ms: i64,
    status: CursorStatus,
}

impl CursorState {
    /// Cursor at `start` covering `[start, target_end)`
    pub fn new(start: i64, target_end: i64, interval_ms: i64) -> Self {
        Self {
            current_start: start,
            target_end,
            interval_ms,
            status: CursorStatus::Initialized,
        }
    }

    /// Next open time to request
    pub fn current_start(&self) -> i64 {
        self.current_start
    }

    /// Exclusive end of the range
    pub fn target_end(&self) -> i64 {
        self.target_end
    }

    /// Bar duration
    pub fn interval_ms(&self) -> i64 {
        self.interval_ms
    }

    /// Current status
    pub fn status(&self) -> CursorStatus {
        self.status
    }

    /// Whether the whole range has been consumed
    pub fn is_covered(&self) -> bool {
        self.current_start >= self.target_end
    }

    /// Window for the next request
    pub fn next_window(&self, max_bars: u32) -> FetchWindow {
        FetchWindow::plan(self.current_start, self.interval_ms, max_bars, self.target_end)
    }

    /// Move to `next`, rejecting transitions the lifecycle does not allow
    pub fn transition(&mut self, next: CursorStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Put the cursor on the bar after `last_open_time`.
    ///
    /// Fails without moving if that would not move it forward.
    pub fn advance_past(&mut self, last_open_time: i64) -> Result<i64, Stalled> {
        let next = next_open_time(last_open_time, self.interval_ms);
        if next <= self.current_start {
            return Err(Stalled {
                cursor: self.current_start,
                last_open_time,
            });
        }
        self.current_start = next;
        Ok(next)
    }
}
