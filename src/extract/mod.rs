//! Archive extraction.
//!
//! The extractor contract is deliberately small: given an archive file
//! and an output directory, reproduce the archive's relative paths under
//! the output directory and reject entries that would escape it. The
//! update pipeline always extracts into a private scratch directory, so
//! a failed extraction never touches the working directory.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::core::{Result, UpdateError};

/// Supported archive codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveType {
    /// A `.zip` archive.
    Zip,
    /// A gzip-compressed tarball (`.tar.gz`).
    TarGz,
}

/// Extracts `archive` into `out_dir`, creating it if necessary.
pub fn extract_archive(archive_type: ArchiveType, archive: &Path, out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir)?;
    debug!(
        "extracting {} to {} as {archive_type:?}",
        archive.display(),
        out_dir.display()
    );
    match archive_type {
        ArchiveType::Zip => extract_zip(archive, out_dir),
        ArchiveType::TarGz => extract_tar_gz(archive, out_dir),
    }
}

fn extract_zip(archive_path: &Path, out_dir: &Path) -> Result<()> {
    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)
        .map_err(|err| UpdateError::extraction(format!("failed to open zip archive: {err}")))?;

    for index in 0..archive.len() {
        let mut entry = archive
            .by_index(index)
            .map_err(|err| UpdateError::extraction(format!("failed to read zip entry: {err}")))?;
        let relative = entry.enclosed_name().ok_or_else(|| {
            UpdateError::extraction(format!(
                "zip entry {:?} escapes the output directory",
                entry.name()
            ))
        })?;
        let target = out_dir.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::File::create(&target)?;
        io::copy(&mut entry, &mut out)?;

        #[cfg(unix)]
        if let Some(mode) = entry.unix_mode() {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

fn extract_tar_gz(archive_path: &Path, out_dir: &Path) -> Result<()> {
    let file = fs::File::open(archive_path)?;
    let decoder = flate2::read::GzDecoder::new(file);
    let mut archive = tar::Archive::new(decoder);
    // tar's unpack refuses entries that would land outside out_dir.
    archive
        .unpack(out_dir)
        .map_err(|err| UpdateError::extraction(format!("failed to unpack tarball: {err}")))
}
