//! Updraft - self-update engine for desktop applications.
//!
//! Updraft manages application updates distributed as signed archive
//! releases. Given the version of the running application, it discovers
//! whether a newer release exists on a remote origin, downloads it
//! together with integrity and authenticity metadata, verifies both,
//! extracts the contents to a managed working directory and coordinates
//! with a small external *launcher* binary so the running application
//! can be replaced atomically on next start.
//!
//! # Architecture Overview
//!
//! The engine is a library (the consuming application provides any CLI)
//! built from five cooperating components:
//!
//! - [`download`] - the verifying downloader: fetches the release and
//!   its auxiliary files (checksum manifest, detached signature) to a
//!   private scratch directory and releases nothing that has not passed
//!   every registered verifier
//! - [`source`] - resolves "what is the latest version and where is its
//!   archive" against a release index
//! - [`sentinel`] - per-directory version sentinels and the rules that
//!   make a version directory valid
//! - [`manager`] - owns the working directory: the exclusive update
//!   lock, pruning, and the apply/launch handoff between the main and
//!   launcher processes
//! - [`updater`] - the pipeline composing all of the above with archive
//!   [`extraction`](extract) and content [`operations`] into an atomic
//!   `update()`
//!
//! # Working Directory Layout
//!
//! ```text
//! <working_dir>/
//!     update.lock          exclusive handle; present while a manager is alive
//!     1.2.3/               a staged-but-not-yet-promoted update
//!         .sentinel        key=value text; at minimum version=1.2.3
//!         <release contents>
//!     current/             the promoted version (configurable name)
//!         .sentinel
//!         <release contents>
//!     .tmp/<rand>/         transient staging of the launcher before exec
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::{Arc, Mutex};
//!
//! use regex::Regex;
//! use updraft::extract::ArchiveType;
//! use updraft::manager::InstallManager;
//! use updraft::operations::FlattenRootDirectory;
//! use updraft::source::ReleaseIndexSource;
//! use updraft::updater::{UpdateOutcome, UpdatePipeline};
//! use updraft::verify::{KeyFormat, KeyType, MessageDigestVerifier, Sha256SumsVerifier};
//! use updraft::version::VersionNumber;
//!
//! # const PUBLIC_KEY_PEM: &str = "-----BEGIN PUBLIC KEY-----\n...\n-----END PUBLIC KEY-----\n";
//! # fn main() -> updraft::Result<()> {
//! let manager = InstallManager::new("/opt/myapp/versions", VersionNumber::parse("1.2.2").unwrap())?;
//! let manager = Arc::new(Mutex::new(manager));
//!
//! let mut pipeline = UpdatePipeline::new(manager.clone());
//! pipeline
//!     .update_source(ReleaseIndexSource::new("my-org", "my-app")?)
//!     .archive_type(ArchiveType::Zip)
//!     .download_filename_pattern(Regex::new(r"release-.*\.zip").unwrap())
//!     .filename_contains_version(true)
//!     .add_update_verification(Sha256SumsVerifier::new("SHA256SUMS"))
//!     .add_update_verification(MessageDigestVerifier::new(
//!         "SHA256SUMS",
//!         "SHA256SUMS.sig",
//!         KeyFormat::Pem,
//!         KeyType::Ed25519,
//!         [PUBLIC_KEY_PEM.to_string()],
//!     ))
//!     .add_content_operation(FlattenRootDirectory::new());
//!
//! match pipeline.run()? {
//!     UpdateOutcome::Updated { version, .. } => println!("staged update {version}"),
//!     UpdateOutcome::AlreadyUpToDate => println!("up to date"),
//!     UpdateOutcome::AlreadyInstalled { version } => println!("{version} already staged"),
//!     UpdateOutcome::LatestIsOlder { latest } => println!("remote offers older {latest}"),
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Separately, the main process calls
//! [`InstallManager::launch_latest`](manager::InstallManager::launch_latest)
//! to hand over to the launcher, and the launcher calls
//! [`apply_latest`](manager::InstallManager::apply_latest) followed by
//! [`start_latest`](manager::InstallManager::start_latest).
//!
//! # Concurrency
//!
//! All update operations are synchronous and block on network and disk
//! I/O; none of them are thread-safe. The only cross-thread surface is
//! the cancellation flag ([`download::CancelHandle`]) and the lock query
//! ([`manager::InstallManager::has_lock`]). Cancellation is sampled at
//! HTTP response start and at every received chunk.
//!
//! # Logging
//!
//! The engine logs through [`tracing`]; without a subscriber installed
//! every log statement is a no-op. Failures demoted by
//! [`operations::IgnoreFailure`] are reported as warnings there.

// Core functionality
pub mod constants;
pub mod core;
pub mod version;

// Networking and verification
pub mod download;
pub mod source;
pub mod verify;

// Working-directory state
pub mod manager;
pub mod sentinel;

// Pipeline building blocks
pub mod extract;
pub mod operations;
pub mod process;
pub mod updater;

// Supporting modules
pub mod utils;

pub use crate::core::{Result, UpdateError};
pub use crate::download::{CancelHandle, DownloadedFile, Downloader};
pub use crate::extract::ArchiveType;
pub use crate::manager::{InstallManager, Launcher};
pub use crate::sentinel::VersionDirectory;
pub use crate::source::{ReleaseIndexSource, UpdateSource};
pub use crate::updater::{UpdateInfo, UpdateOutcome, UpdatePipeline, UpdateState};
pub use crate::version::VersionNumber;
