//! Error handling for the update engine.
//!
//! All fallible engine operations return [`UpdateError`]. The variants form
//! a closed taxonomy so that callers can react to the failure mode rather
//! than to message strings: configuration mistakes, transport problems,
//! failed verification, extraction problems, lock contention, lingering
//! processes, cancellation and inconsistent on-disk layout each have their
//! own variant.
//!
//! Collaborator-supplied code (content operations, process hosts, shortcut
//! providers) returns [`anyhow::Result`] and is wrapped into this taxonomy
//! at the call site, with a prefix identifying the stage that failed.

use std::path::PathBuf;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, UpdateError>;

/// The error type for all update engine operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum UpdateError {
    /// The caller configured the engine inconsistently or incompletely.
    ///
    /// Examples: no update source, missing download filename pattern,
    /// `filename_contains_version` never set, an absolute path where a
    /// relative one is required, or an unusable public key.
    #[error("invalid configuration: {reason}")]
    Misconfigured {
        /// Description of the configuration problem.
        reason: String,
    },

    /// An HTTPS fetch failed or a URL did not match the expected pattern.
    #[error("transport error: {reason}")]
    Transport {
        /// Description of the transport failure.
        reason: String,
    },

    /// A verifier rejected the downloaded file set.
    ///
    /// Covers missing manifest entries, hash mismatches and signatures
    /// that no configured public key accepts.
    #[error("verification failed: {reason}")]
    VerificationFailed {
        /// Description of the verification failure.
        reason: String,
    },

    /// The archive could not be extracted, or a content or post-update
    /// operation aborted the update.
    #[error("extraction failed: {reason}")]
    Extraction {
        /// Description of the extraction failure.
        reason: String,
    },

    /// Another process holds the working-directory update lock.
    #[error("the update lock at {path} is held by another process")]
    LockContended {
        /// Path of the contended lock file.
        path: PathBuf,
    },

    /// A process kept running inside a managed directory beyond the
    /// shutdown timeout during `apply_latest`.
    #[error("processes are still running under {path}")]
    ProcessesLingering {
        /// Directory that still hosts running processes.
        path: PathBuf,
    },

    /// The cancellation flag was observed set.
    #[error("the operation was cancelled")]
    Cancelled,

    /// The working directory contains contradictory state, for example two
    /// directories reporting the same version.
    #[error("working directory layout is inconsistent: {reason}")]
    LayoutInconsistent {
        /// Description of the inconsistency.
        reason: String,
    },

    /// An underlying filesystem operation failed.
    #[error("i/o error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

impl UpdateError {
    /// Shorthand for a [`UpdateError::Misconfigured`] error.
    pub fn misconfigured(reason: impl Into<String>) -> Self {
        Self::Misconfigured {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`UpdateError::Transport`] error.
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`UpdateError::VerificationFailed`] error.
    pub fn verification(reason: impl Into<String>) -> Self {
        Self::VerificationFailed {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`UpdateError::Extraction`] error.
    pub fn extraction(reason: impl Into<String>) -> Self {
        Self::Extraction {
            reason: reason.into(),
        }
    }

    /// Shorthand for a [`UpdateError::LayoutInconsistent`] error.
    pub fn layout(reason: impl Into<String>) -> Self {
        Self::LayoutInconsistent {
            reason: reason.into(),
        }
    }

    /// Whether this error was caused by cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
