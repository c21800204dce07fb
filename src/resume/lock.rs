//! Exclusive ownership of a run target

use super::state::ResumeError;
use fd_lock::RwLock;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Held for the lifetime of a run; released when dropped
#[derive(Debug)]
pub struct RunLock {
    _lock: RwLock<File>,
    path: PathBuf,
}

impl RunLock {
    /// Take the lock without blocking.
    ///
    /// A second process (or a second handle in this process) working on the
    /// same target fails fast with [`ResumeError::TargetBusy`].
    pub fn try_acquire(path: &Path, target: &str) -> Result<Self, ResumeError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ResumeError::IoError(e.to_string()))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| ResumeError::LockError(format!("Failed to open lock file: {e}")))?;

        let mut lock = RwLock::new(file);
        match lock.try_write() {
            // The OS lock lives as long as the file handle; skipping the
            // guard's unlock keeps it held until this RunLock is dropped.
            Ok(guard) => std::mem::forget(guard),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                return Err(ResumeError::TargetBusy(target.to_string()));
            }
            Err(e) => {
                return Err(ResumeError::LockError(format!("Failed to acquire lock: {e}")));
            }
        }

        debug!(path = %path.display(), target = target, "Acquired run lock");
        Ok(Self {
            _lock: lock,
            path: path.to_path_buf(),
        })
    }

    /// Lock file location
    pub fn path(&self) -> &Path {
        &self.path
    }
}
