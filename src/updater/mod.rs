//! The end-to-end update pipeline.
//!
//! [`UpdatePipeline`] composes a release source, the verifying
//! downloader, an archive extractor and content/post-update operations
//! into a single `update()` operation with all-or-nothing semantics: the
//! archive is extracted and transformed in a private scratch directory,
//! and only a fully verified and processed release is renamed into the
//! working directory, where the sentinel is written last.
//!
//! Before anything is downloaded the asset URL must pass three checks:
//! the filename pattern, the URL pattern pinned to the source's origin,
//! and — as a downgrade-attack defense — the requirement that the
//! filename textually contains the version the source claims it is.
//! The last check must be configured explicitly one way or the other.

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use regex::Regex;
use tracing::{debug, info};

use crate::core::{Result, UpdateError};
use crate::download::{CancelHandle, DownloadedFile, Downloader};
use crate::extract::{extract_archive, ArchiveType};
use crate::manager::InstallManager;
use crate::operations::ContentOperation;
use crate::sentinel;
use crate::source::UpdateSource;
use crate::utils::fs::{copy_dir_all, remove_dir_all_if_exists};
use crate::utils::regex_is_full_match;
use crate::utils::url::FileUrl;
use crate::verify::Verifier;
use crate::version::VersionNumber;

/// Relationship between the resolved remote version and the local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    /// The resolved version equals the running version.
    UpToDate,
    /// The resolved version is already staged in the working directory.
    UpdateAlreadyInstalled,
    /// The resolved version is newer than the running version.
    NewVersionAvailable,
    /// The resolved version is older than the running version. Kept
    /// distinct from [`UpdateState::UpToDate`] because it usually means
    /// a rollback or clock skew upstream and is worth diagnosing.
    LatestIsOlder,
}

/// Result of [`UpdatePipeline::get_latest`]: the resolved version, its
/// download URL and how it relates to the local state.
#[derive(Debug, Clone)]
pub struct UpdateInfo {
    /// Relationship between remote and local state.
    pub state: UpdateState,
    /// The version the source resolved.
    pub version: VersionNumber,
    /// Where the release archive lives.
    pub url: FileUrl,
}

/// Outcome of a one-shot [`UpdatePipeline::run`].
#[derive(Debug)]
pub enum UpdateOutcome {
    /// A new version was downloaded, verified and staged.
    Updated {
        /// The staged version.
        version: VersionNumber,
        /// The staged version directory inside the working directory.
        path: PathBuf,
    },
    /// The running version is the latest.
    AlreadyUpToDate,
    /// The resolved version is already staged and waiting to be applied.
    AlreadyInstalled {
        /// The staged version.
        version: VersionNumber,
    },
    /// The remote's latest version is older than the running version.
    LatestIsOlder {
        /// The version the remote reported.
        latest: VersionNumber,
    },
}

/// Composes source discovery, verified download, extraction and content
/// operations into atomic updates. See the [module
/// documentation](self).
pub struct UpdatePipeline {
    manager: Arc<Mutex<InstallManager>>,
    downloader: Downloader,
    source: Option<Box<dyn UpdateSource>>,
    archive_type: Option<ArchiveType>,
    download_filename_pattern: Option<Regex>,
    download_url_pattern: Option<Regex>,
    filename_contains_version: Option<bool>,
    content_operations: Vec<Box<dyn ContentOperation>>,
    post_update_operations: Vec<Box<dyn ContentOperation>>,
    file_url_overrides: Vec<(String, Box<dyn Fn(&VersionNumber) -> String>)>,
}

impl UpdatePipeline {
    /// Creates a pipeline operating through the given manager.
    ///
    /// The manager is shared: the application typically holds another
    /// reference for `launch_latest` and pruning.
    pub fn new(manager: Arc<Mutex<InstallManager>>) -> Self {
        Self {
            manager,
            downloader: Downloader::new(),
            source: None,
            archive_type: None,
            download_filename_pattern: None,
            download_url_pattern: None,
            filename_contains_version: None,
            content_operations: Vec::new(),
            post_update_operations: Vec::new(),
            file_url_overrides: Vec::new(),
        }
    }

    /// The shared manager this pipeline operates through.
    pub fn manager(&self) -> Arc<Mutex<InstallManager>> {
        self.manager.clone()
    }

    /// The version of the running application.
    pub fn current_version(&self) -> VersionNumber {
        self.locked_manager().current_version().clone()
    }

    /// Sets the source that resolves the latest release. Also seeds the
    /// download URL pattern from the source unless one was set already.
    pub fn update_source(&mut self, source: impl UpdateSource + 'static) -> &mut Self {
        if self.download_url_pattern.is_none() {
            self.download_url_pattern = Some(source.url_pattern());
        }
        self.source = Some(Box::new(source));
        self
    }

    /// Selects the extractor for downloaded archives.
    pub fn archive_type(&mut self, archive_type: ArchiveType) -> &mut Self {
        self.archive_type = Some(archive_type);
        self
    }

    /// Sets whether the asset filename must textually contain the
    /// version the source claims it is.
    ///
    /// This is the downgrade-attack mitigation: combined with manifest
    /// and signature verification it authenticates the filename and
    /// therefore the version, so a verified-but-old release cannot be
    /// served as the latest one. It must be configured explicitly;
    /// leaving it unset fails `get_latest` and `update` with a
    /// configuration error. Opting out (`false`) is the caller's
    /// explicit acceptance of that risk.
    pub fn filename_contains_version(&mut self, required: bool) -> &mut Self {
        self.filename_contains_version = Some(required);
        self
    }

    /// Pattern the asset filename must fully match.
    pub fn download_filename_pattern(&mut self, pattern: Regex) -> &mut Self {
        self.download_filename_pattern = Some(pattern);
        self
    }

    /// Pattern the full asset URL must fully match. Usually seeded from
    /// the source; set it manually to further restrict the origin.
    pub fn download_url_pattern(&mut self, pattern: Regex) -> &mut Self {
        self.download_url_pattern = Some(pattern);
        self
    }

    /// Registers a verification step for downloaded releases.
    pub fn add_update_verification(&mut self, verifier: impl Verifier + 'static) -> &mut Self {
        self.downloader.add_verification(verifier);
        self
    }

    /// Adds an operation over the extracted content, run in the scratch
    /// directory before the release is moved into the working directory.
    /// An error aborts the update without touching the working
    /// directory.
    pub fn add_content_operation(&mut self, operation: impl ContentOperation + 'static) -> &mut Self {
        self.content_operations.push(Box::new(operation));
        self
    }

    /// Adds an operation run after the release has been committed to the
    /// working directory. An error aborts the update and removes the
    /// committed directory again.
    pub fn add_post_update_operation(
        &mut self,
        operation: impl ContentOperation + 'static,
    ) -> &mut Self {
        self.post_update_operations.push(Box::new(operation));
        self
    }

    /// Overrides the URL for a specific auxiliary filename, e.g. when a
    /// signature file is hosted on a different server. The callback
    /// receives the resolved version.
    pub fn override_file_url(
        &mut self,
        filename: impl Into<String>,
        url: impl Fn(&VersionNumber) -> String + 'static,
    ) -> &mut Self {
        self.file_url_overrides
            .push((filename.into(), Box::new(url)));
        self
    }

    /// Permits plain HTTP downloads. Intended for tests against local
    /// servers.
    pub fn allow_insecure_http(&mut self, allow: bool) -> &mut Self {
        self.downloader.allow_insecure_http(allow);
        self
    }

    /// Sets the cancellation state for in-flight and future downloads,
    /// returning the previous value. Thread-safe.
    pub fn cancel(&self, state: bool) -> bool {
        self.downloader.cancel(state)
    }

    /// Reads the current cancellation state. Thread-safe.
    pub fn is_cancelled(&self) -> bool {
        self.downloader.is_cancelled()
    }

    /// Returns a handle for cancelling from another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.downloader.cancel_handle()
    }

    /// Resolves the configured source and classifies the result against
    /// the local state. Pass the returned info to
    /// [`update`](Self::update) to download a new version.
    pub fn get_latest(&mut self) -> Result<UpdateInfo> {
        let source = self
            .source
            .as_ref()
            .ok_or_else(|| UpdateError::misconfigured("no update source configured"))?;
        let filename_pattern = self.download_filename_pattern.as_ref().ok_or_else(|| {
            UpdateError::misconfigured("missing download filename pattern")
        })?;

        let (version, url) = source.resolve(filename_pattern)?;
        self.check_url(&url, &version)?;

        let mut manager = self.locked_manager();
        if let Some(installed) = manager.latest_available_update()? {
            if installed.version == version {
                return Ok(UpdateInfo {
                    state: UpdateState::UpdateAlreadyInstalled,
                    version,
                    url,
                });
            }
        }
        let state = if version == *manager.current_version() {
            UpdateState::UpToDate
        } else if version < *manager.current_version() {
            UpdateState::LatestIsOlder
        } else {
            UpdateState::NewVersionAvailable
        };
        Ok(UpdateInfo {
            state,
            version,
            url,
        })
    }

    /// Downloads, verifies, extracts and stages the release at `url` as
    /// `version`, returning the staged directory
    /// `<working_dir>/<version>`.
    ///
    /// The working directory is untouched until the fully processed
    /// release is renamed into it; any failure before that point leaves
    /// only scratch state behind, which is cleaned up automatically.
    pub fn update(&mut self, version: &VersionNumber, url: &FileUrl) -> Result<PathBuf> {
        self.check_url(url, version)?;
        let archive_type = self.archive_type.ok_or_else(|| {
            UpdateError::misconfigured("no archive type configured for extraction")
        })?;

        self.downloader.base_url(url.base_url())?;
        for (filename, resolve_url) in &self.file_url_overrides {
            self.downloader
                .override_file_url(filename.clone(), resolve_url(version));
        }

        info!("downloading update {version} from {url}");
        let release = self.downloader.get(url.filename())?;
        self.stage_release(archive_type, version, &release)
    }

    /// Performs an update using the result of a previous
    /// [`get_latest`](Self::get_latest) call.
    pub fn update_from(&mut self, info: &UpdateInfo) -> Result<PathBuf> {
        self.update(&info.version, &info.url)
    }

    /// One-shot convenience: resolves the latest version and stages it
    /// when it is newer, reporting the other states as data.
    pub fn run(&mut self) -> Result<UpdateOutcome> {
        let info = self.get_latest()?;
        match info.state {
            UpdateState::NewVersionAvailable => {
                let path = self.update(&info.version, &info.url)?;
                Ok(UpdateOutcome::Updated {
                    version: info.version,
                    path,
                })
            }
            UpdateState::UpToDate => Ok(UpdateOutcome::AlreadyUpToDate),
            UpdateState::UpdateAlreadyInstalled => Ok(UpdateOutcome::AlreadyInstalled {
                version: info.version,
            }),
            UpdateState::LatestIsOlder => Ok(UpdateOutcome::LatestIsOlder {
                latest: info.version,
            }),
        }
    }

    fn stage_release(
        &mut self,
        archive_type: ArchiveType,
        version: &VersionNumber,
        release: &DownloadedFile,
    ) -> Result<PathBuf> {
        let output_directory = {
            let manager = self.locked_manager();
            manager.working_directory().join(version.to_string())
        };

        // Scratch space outside the working directory: only verified and
        // fully processed content may ever appear inside it.
        let scratch = tempfile::Builder::new().prefix("update-").tempdir()?;
        extract_archive(archive_type, release.path(), scratch.path())?;

        for operation in &self.content_operations {
            operation.apply(scratch.path()).map_err(|err| {
                UpdateError::extraction(format!("content operation failed: {err:#}"))
            })?;
        }

        remove_dir_all_if_exists(&output_directory)?;
        if fs::rename(scratch.path(), &output_directory).is_err() {
            // Rename fails when scratch and working directory live on
            // different volumes; fall back to a recursive copy.
            debug!("falling back to copying the staged release");
            copy_dir_all(scratch.path(), &output_directory)?;
        }

        for operation in &self.post_update_operations {
            if let Err(err) = operation.apply(&output_directory) {
                remove_dir_all_if_exists(&output_directory)?;
                return Err(UpdateError::extraction(format!(
                    "post-update operation failed: {err:#}"
                )));
            }
        }

        sentinel::write(&output_directory, version)?;
        info!(
            "update {version} staged at {}",
            output_directory.display()
        );
        Ok(output_directory)
    }

    fn check_url(&self, url: &FileUrl, version: &VersionNumber) -> Result<()> {
        match self.filename_contains_version {
            // This setting must be chosen explicitly by the caller.
            None => {
                return Err(UpdateError::misconfigured(
                    "filename_contains_version must be set explicitly",
                ));
            }
            Some(true) => {
                let pattern = filename_contains_version_pattern(&version.to_string());
                if !pattern.is_match(url.filename()) {
                    return Err(UpdateError::verification(format!(
                        "the filename does not contain the expected version {version}: {}",
                        url.filename()
                    )));
                }
            }
            Some(false) => {}
        }
        if let Some(pattern) = &self.download_filename_pattern {
            if !regex_is_full_match(pattern, url.filename()) {
                return Err(UpdateError::transport(format!(
                    "the download filename does not match the expected pattern: {}",
                    url.filename()
                )));
            }
        }
        if let Some(pattern) = &self.download_url_pattern {
            if !regex_is_full_match(pattern, url.url()) {
                return Err(UpdateError::transport(format!(
                    "the download url does not match the expected pattern: {}",
                    url.url()
                )));
            }
        }
        Ok(())
    }

    fn locked_manager(&self) -> MutexGuard<'_, InstallManager> {
        self.manager
            .lock()
            .expect("the install manager mutex is poisoned")
    }
}

/// Pattern requiring a filename to contain `version_string` with
/// word-like boundaries on both sides.
///
/// The character to the left of the version must be start-of-string, a
/// non-digit, or a non-digit followed by `.`, and symmetrically on the
/// right. This rejects `12.2.3` and `1.2.3.4` as carriers of `2.3` and
/// `1.2.3` respectively, while accepting `release-1.2.3.zip`,
/// `app_1.2.3` and `v1.2.3-win64`.
pub(crate) fn filename_contains_version_pattern(version_string: &str) -> Regex {
    let version = regex::escape(version_string);
    let pattern = format!(
        r"(^|^[^0-9]|[^0-9]\.|[^.0-9]){version}([^.0-9]|\.[^0-9]|[^0-9]$|$)"
    );
    Regex::new(&pattern).expect("version boundary pattern is valid")
}
