//! Version sentinels and working-directory layout scanning.
//!
//! A version directory is only trusted when it carries a sentinel: a
//! small `key=value` text file named `.sentinel` at its root whose
//! `version` key matches the directory name. The sentinel is written
//! last during an update, so its presence asserts that extraction and
//! all content operations completed.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::core::Result;
use crate::utils::fs::atomic_write;
use crate::version::VersionNumber;

/// Name of the sentinel file inside a version directory.
pub const SENTINEL_FILENAME: &str = ".sentinel";

/// Writes the sentinel for `directory`, recording `version`.
///
/// The write is atomic (write-and-replace), so a crash never leaves a
/// torn sentinel behind.
pub fn write(directory: &Path, version: &VersionNumber) -> Result<()> {
    let content = format!("version={version}\n");
    atomic_write(&directory.join(SENTINEL_FILENAME), content.as_bytes())
}

/// Reads the sentinel of `directory`.
///
/// Returns `None` when the sentinel is missing, unreadable, unparseable
/// or lacks the `version` key; absence is never an error.
pub fn read(directory: &Path) -> Option<VersionNumber> {
    let content = fs::read_to_string(directory.join(SENTINEL_FILENAME)).ok()?;
    decode(&content)
}

/// Parses sentinel content: `key=value` lines separated by LF or CRLF.
/// Unknown keys are ignored; the single required key is `version`. When
/// a key repeats, the last occurrence wins.
fn decode(content: &str) -> Option<VersionNumber> {
    let mut version = None;
    for line in content.lines() {
        let line = line.trim_end_matches('\r');
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        if key == "version" {
            version = VersionNumber::parse(value).ok();
        }
    }
    version
}

/// A version directory that passed all validity checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionDirectory {
    /// Version parsed from the directory name (and confirmed by the
    /// sentinel).
    pub version: VersionNumber,
    /// Absolute path of the directory.
    pub path: PathBuf,
}

/// Scans the direct children of `working_dir` for valid version
/// directories and returns the greatest, or `None` if there is none.
///
/// A child is a candidate when its filename parses as a version, its
/// sentinel reads successfully and the sentinel's version equals the
/// parsed filename. Children listed in `exclude` are skipped.
///
/// When two distinct candidates compare equal (e.g. `2.1` and `2.1.0`)
/// the layout is inconsistent and `None` is returned, prompting the
/// caller to re-download.
pub fn latest_version_directory(
    working_dir: &Path,
    exclude: &[&str],
) -> Result<Option<VersionDirectory>> {
    fs::create_dir_all(working_dir)?;

    let mut candidates: Vec<VersionDirectory> = Vec::new();
    for entry in fs::read_dir(working_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if exclude.contains(&name) {
            continue;
        }
        let Ok(directory_version) = VersionNumber::parse(name) else {
            continue;
        };
        let Some(sentinel_version) = read(&entry.path()) else {
            debug!("ignoring {name}: missing or invalid sentinel");
            continue;
        };
        if sentinel_version != directory_version {
            debug!("ignoring {name}: sentinel reports version {sentinel_version}");
            continue;
        }
        candidates.push(VersionDirectory {
            version: directory_version,
            path: entry.path(),
        });
    }

    candidates.sort_by(|a, b| a.version.cmp(&b.version));
    if candidates
        .windows(2)
        .any(|pair| pair[0].version == pair[1].version)
    {
        // Two directories represent the same version; the working
        // directory is inconsistent and the caller should clear and
        // re-download.
        debug!("working directory holds duplicate version directories");
        return Ok(None);
    }
    Ok(candidates.pop())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn v(s: &str) -> VersionNumber {
        VersionNumber::parse(s).unwrap()
    }

    fn make_version_dir(wd: &Path, name: &str, sentinel_version: Option<&str>) {
        let dir = wd.join(name);
        fs::create_dir_all(&dir).unwrap();
        if let Some(version) = sentinel_version {
            write(&dir, &v(version)).unwrap();
        }
    }

    #[test]
    fn write_read_round_trip() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), &v("1.2.3")).unwrap();
        assert_eq!(read(dir.path()), Some(v("1.2.3")));
    }

    #[test]
    fn read_returns_none_for_missing_sentinel() {
        let dir = TempDir::new().unwrap();
        assert_eq!(read(dir.path()), None);
    }

    #[test]
    fn unknown_keys_are_ignored() {
        assert_eq!(
            decode("channel=stable\nversion=2.0.1\nbuild=abc\n"),
            Some(v("2.0.1"))
        );
    }

    #[test]
    fn crlf_lines_are_accepted() {
        assert_eq!(decode("version=1.2.3\r\n"), Some(v("1.2.3")));
    }

    #[test]
    fn missing_version_key_is_invalid() {
        assert_eq!(decode("channel=stable\n"), None);
        assert_eq!(decode(""), None);
    }

    #[test]
    fn last_version_key_wins() {
        assert_eq!(decode("version=1.0\nversion=2.0\n"), Some(v("2.0")));
    }

    #[test]
    fn latest_picks_the_greatest_valid_directory() {
        let wd = TempDir::new().unwrap();
        make_version_dir(wd.path(), "1.2.2", Some("1.2.2"));
        make_version_dir(wd.path(), "1.2.3", Some("1.2.3"));
        make_version_dir(wd.path(), "1.2.10", Some("1.2.10"));

        let latest = latest_version_directory(wd.path(), &[]).unwrap().unwrap();
        assert_eq!(latest.version, v("1.2.10"));
        assert_eq!(latest.path, wd.path().join("1.2.10"));
    }

    #[test]
    fn directory_without_sentinel_is_ignored() {
        let wd = TempDir::new().unwrap();
        make_version_dir(wd.path(), "1.2.2", Some("1.2.2"));
        make_version_dir(wd.path(), "9.9.9", None);

        let latest = latest_version_directory(wd.path(), &[]).unwrap().unwrap();
        assert_eq!(latest.version, v("1.2.2"));
    }

    #[test]
    fn sentinel_version_must_match_directory_name() {
        let wd = TempDir::new().unwrap();
        make_version_dir(wd.path(), "1.2.2", Some("1.2.2"));
        make_version_dir(wd.path(), "9.9.9", Some("1.0.0"));

        let latest = latest_version_directory(wd.path(), &[]).unwrap().unwrap();
        assert_eq!(latest.version, v("1.2.2"));
    }

    #[test]
    fn duplicate_versions_collapse_to_none() {
        let wd = TempDir::new().unwrap();
        make_version_dir(wd.path(), "2.1", Some("2.1"));
        make_version_dir(wd.path(), "2.1.0", Some("2.1.0"));
        make_version_dir(wd.path(), "3.0", Some("3.0"));

        assert_eq!(latest_version_directory(wd.path(), &[]).unwrap(), None);
    }

    #[test]
    fn excluded_names_are_skipped() {
        let wd = TempDir::new().unwrap();
        // A current directory that happens to carry a version name.
        make_version_dir(wd.path(), "9.0", Some("9.0"));
        make_version_dir(wd.path(), "1.0", Some("1.0"));

        let latest = latest_version_directory(wd.path(), &["9.0"])
            .unwrap()
            .unwrap();
        assert_eq!(latest.version, v("1.0"));
    }

    #[test]
    fn non_version_children_are_ignored() {
        let wd = TempDir::new().unwrap();
        make_version_dir(wd.path(), "current", Some("1.2.2"));
        fs::create_dir_all(wd.path().join(".tmp")).unwrap();
        fs::write(wd.path().join("update.lock"), "").unwrap();
        make_version_dir(wd.path(), "1.0", Some("1.0"));

        let latest = latest_version_directory(wd.path(), &[]).unwrap().unwrap();
        assert_eq!(latest.version, v("1.0"));
    }
}
