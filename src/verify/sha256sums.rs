//! Integrity checking against `sha256sum`-format manifests.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::info;

use crate::core::{Result, UpdateError};
use crate::verify::{Verifier, VerifierInput};

/// Verifies the primary artifact against a checksum manifest in the
/// format produced by the `sha256sum` tool: one `<hash> *<path>` entry
/// per line.
///
/// The manifest itself should be authenticated separately, e.g. with a
/// [`MessageDigestVerifier`](crate::verify::MessageDigestVerifier) over
/// the manifest file.
pub struct Sha256SumsVerifier {
    manifest_filename: String,
}

impl Sha256SumsVerifier {
    /// Creates a verifier reading the manifest from `manifest_filename`,
    /// which is fetched relative to the downloader's base URL.
    pub fn new(manifest_filename: impl Into<String>) -> Self {
        Self {
            manifest_filename: manifest_filename.into(),
        }
    }
}

impl Verifier for Sha256SumsVerifier {
    fn required_files(&self) -> Vec<String> {
        vec![self.manifest_filename.clone()]
    }

    fn verify(&self, input: &VerifierInput<'_>) -> Result<()> {
        let manifest = input.files.get(&self.manifest_filename).ok_or_else(|| {
            UpdateError::misconfigured(format!(
                "checksum manifest {} was not downloaded",
                self.manifest_filename
            ))
        })?;
        let entries = parse_sha256sums(&manifest.read_to_string()?);

        // When the manifest sits in a subdirectory its entries are
        // relative to that subdirectory.
        let manifest_parent = Path::new(&self.manifest_filename)
            .parent()
            .filter(|p| !p.as_os_str().is_empty());
        let primary_path = Path::new(input.primary);

        let expected = entries
            .iter()
            .find(|(_, path)| {
                let resolved = match manifest_parent {
                    Some(parent) => parent.join(path),
                    None => path.clone(),
                };
                resolved.components().eq(primary_path.components())
            })
            .map(|(hash, _)| hash.clone())
            .ok_or_else(|| {
                UpdateError::verification(format!(
                    "file to verify is not listed in {}: {}",
                    self.manifest_filename, input.primary
                ))
            })?;

        let primary = input.files.get(input.primary).ok_or_else(|| {
            UpdateError::misconfigured(format!(
                "primary file {} was not downloaded",
                input.primary
            ))
        })?;
        let actual = sha256_file(primary.path())?;

        if actual != expected.to_lowercase() {
            return Err(UpdateError::verification(format!(
                "SHA-256 mismatch for {}: expected {}, got {}",
                input.primary, expected, actual
            )));
        }
        info!("file integrity OK, SHA-256 hashes match for {}", input.primary);
        Ok(())
    }
}

/// Parses `sha256sum` output into `(hash, path)` pairs.
///
/// Each entry is `<hash> *<path>` terminated by LF, CRLF or end of
/// input; the final entry is emitted even when the data lacks a
/// trailing newline. `/` separators in paths are normalized to the
/// native separator. Lines that do not fit the format are skipped.
pub(crate) fn parse_sha256sums(data: &str) -> Vec<(String, PathBuf)> {
    let mut entries = Vec::new();
    for line in data.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let Some((hash, rest)) = line.split_once(' ') else {
            continue;
        };
        let Some(star) = rest.find('*') else {
            continue;
        };
        let path: PathBuf = rest[star + 1..]
            .split('/')
            .collect::<Vec<_>>()
            .join(std::path::MAIN_SEPARATOR_STR)
            .into();
        entries.push((hash.to_string(), path));
    }
    entries
}

/// Computes the lowercase hex SHA-256 digest of a file, streamed.
pub(crate) fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn parses_entries() {
        let data = "0123abcd *release-1.2.3.zip\nfeedbeef *other.txt\n";
        let entries = parse_sha256sums(data);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "0123abcd");
        assert_eq!(entries[0].1, PathBuf::from("release-1.2.3.zip"));
    }

    #[test]
    fn emits_final_entry_without_trailing_newline() {
        let data = "0123abcd *first.zip\nfeedbeef *last.zip";
        let entries = parse_sha256sums(data);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].1, PathBuf::from("last.zip"));
    }

    #[test]
    fn accepts_crlf_terminated_lines() {
        let data = "0123abcd *a.zip\r\nfeedbeef *b.zip\r\n";
        let entries = parse_sha256sums(data);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].1, PathBuf::from("b.zip"));
    }

    #[test]
    fn normalizes_separators() {
        let entries = parse_sha256sums("0123abcd *sub/dir/file.zip\n");
        assert_eq!(
            entries[0].1,
            PathBuf::from(format!(
                "sub{sep}dir{sep}file.zip",
                sep = std::path::MAIN_SEPARATOR
            ))
        );
    }

    #[test]
    fn skips_malformed_lines() {
        let data = "not-a-real-line\nonlyhash\n0123abcd *good.zip\nhash without-star\n";
        let entries = parse_sha256sums(data);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].1, PathBuf::from("good.zip"));
    }

    #[test]
    fn hashes_file_contents() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        assert_eq!(
            sha256_file(file.path()).unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
