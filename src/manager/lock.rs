//! The working-directory update lock.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::fs_std::FileExt;
use tracing::debug;

use crate::core::{Result, UpdateError};

/// Exclusive lock over a working directory.
///
/// Backed by an OS file lock on `update.lock`; a second process (or a
/// second manager in the same process) attempting to acquire it fails
/// with [`UpdateError::LockContended`] instead of blocking. The lock is
/// released and the lock file deleted when the guard is dropped.
#[derive(Debug)]
pub struct UpdateLock {
    file: File,
    path: PathBuf,
}

impl UpdateLock {
    /// Tries to acquire the lock at `path`, creating parent directories
    /// and the lock file as needed.
    pub fn acquire(path: &Path) -> Result<Self> {
        if path.is_dir() {
            return Err(UpdateError::misconfigured(format!(
                "lock file path is a directory: {}",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;
        let acquired = file.try_lock_exclusive()?;
        if !acquired {
            return Err(UpdateError::LockContended {
                path: path.to_path_buf(),
            });
        }
        debug!("acquired update lock at {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for UpdateLock {
    fn drop(&mut self) {
        if let Err(err) = FileExt::unlock(&self.file) {
            debug!("failed to unlock {}: {err}", self.path.display());
        }
        // Best effort; a leftover lock file does not prevent the next
        // acquisition.
        let _ = fs::remove_file(&self.path);
        debug!("released update lock at {}", self.path.display());
    }
}
