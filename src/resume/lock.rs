//! Exclusive output locking
//!
//! Advisory lock on `<output>.lock` via fd-lock, held for as long as the
//! [`OutputLock`] lives. Two jobs writing the same file would interleave rows and
//! break ordering, so the second one fails fast instead of waiting.

use super::ResumeError;
use fd_lock::RwLock;
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Exclusive lock on an output file
pub struct OutputLock {
    // The guard is forgotten on acquisition; the OS lock is released when this file closes.
    _lock: RwLock<File>,
    lock_path: PathBuf,
}

impl std::fmt::Debug for OutputLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputLock")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

impl OutputLock {
    /// Lock file path for `output`
    pub fn lock_path(output: &Path) -> PathBuf {
        let mut name = OsString::from(output.as_os_str());
        name.push(".lock");
        PathBuf::from(name)
    }

    /// Try to take the lock for `output` without blocking
    pub fn try_acquire(output: &Path) -> Result<Self, ResumeError> {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
        }

        let lock_path = Self::lock_path(output);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| ResumeError::LockError(format!("Failed to open lock file: {e}")))?;

        let mut lock = RwLock::new(file);
        match lock.try_write() {
            Ok(guard) => std::mem::forget(guard),
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                return Err(ResumeError::LockHeld {
                    path: output.to_path_buf(),
                })
            }
            Err(e) => {
                return Err(ResumeError::LockError(format!("Failed to acquire lock: {e}")))
            }
        }

        debug!("Acquired output lock {}", lock_path.display());
        Ok(Self {
            _lock: lock,
            lock_path,
        })
    }

    /// Path of the lock file
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}
