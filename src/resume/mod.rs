//! Resume position and exclusive output locking
//!
//! A job never keeps separate checkpoint state: the last row of its output is the
//! checkpoint. Resuming means starting one interval after that row.

pub mod lock;

pub use lock::OutputLock;

use std::path::PathBuf;

use crate::calendar::next_open_time;

/// Resume and locking errors
#[derive(Debug, thiserror::Error)]
pub enum ResumeError {
    /// IO error
    #[error("IO error: {0}")]
    IoError(String),

    /// Another process holds the output
    #[error("output {} is locked by another process", path.display())]
    LockHeld {
        /// Locked output path
        path: PathBuf,
    },

    /// Lock could not be acquired for another reason
    #[error("lock error: {0}")]
    LockError(String),
}

/// First open time to request when `last_persisted` is already on disk.
///
/// Never moves before the caller's requested start.
pub fn resume_start(requested_start: i64, last_persisted: Option<i64>, interval_ms: i64) -> i64 {
    match last_persisted {
        Some(last) => requested_start.max(next_open_time(last, interval_ms)),
        None => requested_start,
    }
}
