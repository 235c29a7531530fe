//! Filesystem helpers used across the engine.

use std::fs;
use std::path::{Path, PathBuf};

use rand::distributions::Alphanumeric;
use rand::Rng;

use crate::core::Result;

/// Atomically writes bytes to a file using a write-then-rename strategy.
///
/// The content is written to a sibling temporary file which is then
/// renamed over the target, so readers never observe a partial write.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Recursively copies `from` into `to`, creating `to` if necessary.
///
/// Used as the fallback when a scratch directory cannot be renamed into
/// the working directory because the two live on different filesystems.
pub fn copy_dir_all(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Removes a directory tree if it exists; absence is not an error.
pub fn remove_dir_all_if_exists(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Generates a random alphanumeric string, e.g. for staging directories.
pub fn random_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Returns the first component of `path` relative to `base`, if `path`
/// lies underneath it.
///
/// For a process executing at `<wd>/current/bin/app` with base `<wd>`
/// this returns `current`, the directory that must survive pruning.
pub fn first_component_under(path: &Path, base: &Path) -> Option<PathBuf> {
    let relative = path.strip_prefix(base).ok()?;
    relative
        .components()
        .next()
        .map(|c| PathBuf::from(c.as_os_str()))
}
