//! Pluggable verification of downloaded file sets.
//!
//! A [`Verifier`] is a predicate over the set of files a downloader has
//! fetched. Each verifier declares the auxiliary filenames it needs
//! (checksum manifests, detached signatures); the downloader fetches
//! those before the primary artifact and runs every registered verifier
//! once the full set is on disk. Verifiers never modify the filesystem.
//!
//! Two verifiers ship with the engine:
//!
//! - [`Sha256SumsVerifier`] checks the primary artifact against a
//!   `sha256sum`-format manifest.
//! - [`MessageDigestVerifier`] checks a detached signature over a
//!   message file (typically the manifest itself) against a set of
//!   public keys, which authenticates the whole chain.

pub mod sha256sums;
pub mod signature;

use std::collections::HashMap;

use crate::core::Result;
use crate::download::DownloadedFile;

pub use sha256sums::Sha256SumsVerifier;
pub use signature::{KeyFormat, KeyType, MessageDigestVerifier};

/// Everything a verifier gets to look at: the primary filename and the
/// map of all files the downloader has stored, keyed by filename.
pub struct VerifierInput<'a> {
    /// Filename of the primary artifact, as passed to `get()`.
    pub primary: &'a str,
    /// All downloaded files, auxiliary files included.
    pub files: &'a HashMap<String, DownloadedFile>,
}

/// A verification step over a set of downloaded files.
pub trait Verifier: Send {
    /// Auxiliary filenames this verifier requires. The downloader
    /// fetches these before the primary artifact.
    fn required_files(&self) -> Vec<String>;

    /// Checks the downloaded file set.
    ///
    /// Returns [`UpdateError::VerificationFailed`] when the files are
    /// inauthentic or corrupt, and [`UpdateError::Misconfigured`] when
    /// the verifier itself is unusable (e.g. a malformed public key).
    ///
    /// [`UpdateError::VerificationFailed`]: crate::UpdateError::VerificationFailed
    /// [`UpdateError::Misconfigured`]: crate::UpdateError::Misconfigured
    fn verify(&self, input: &VerifierInput<'_>) -> Result<()>;
}
