//! Verifying downloader for release artifacts.
//!
//! [`Downloader`] fetches a primary artifact together with the auxiliary
//! files its registered verifiers require (checksum manifests, detached
//! signatures) from a single HTTPS origin, and refuses to hand out the
//! artifact unless every verifier accepts the downloaded set.
//!
//! Auxiliary files are fetched before the primary: they are small, and a
//! missing manifest should fail the operation before bandwidth is spent
//! on a large archive. All files are written to a scratch directory that
//! the downloader owns exclusively and removes on drop. Fetches are
//! deduplicated by filename, so a repeated `get()` for the same name
//! returns the already-stored file.
//!
//! Cancellation is a monotonic atomic flag shared through
//! [`CancelHandle`]; it is sampled when an HTTP response starts and on
//! every received chunk, and makes in-flight and future `get()` calls
//! fail with [`UpdateError::Cancelled`].

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use tracing::debug;

use crate::constants::USER_AGENT;
use crate::core::{Result, UpdateError};
use crate::verify::{Verifier, VerifierInput};

/// A file the downloader has stored on disk.
///
/// The file lives inside the owning downloader's scratch directory and
/// is deleted when that downloader is dropped; callers that need the
/// content beyond that point must copy it.
#[derive(Debug, Clone)]
pub struct DownloadedFile {
    path: PathBuf,
}

impl DownloadedFile {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Absolute path of the stored file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the entire file into memory.
    pub fn read(&self) -> Result<Vec<u8>> {
        Ok(fs::read(&self.path)?)
    }

    /// Reads the entire file as UTF-8 text.
    pub fn read_to_string(&self) -> Result<String> {
        Ok(fs::read_to_string(&self.path)?)
    }
}

/// Thread-safe handle to the cancellation flag of a [`Downloader`].
///
/// This is the only part of the engine that may be used from another
/// thread while an update operation is in progress.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sets the cancellation state, returning the previous value.
    pub fn set(&self, state: bool) -> bool {
        self.flag.swap(state, Ordering::SeqCst)
    }

    /// Reads the current cancellation state.
    pub fn get(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Content-addressed, cancellable, verifying fetcher.
///
/// See the [module documentation](self) for the fetch and verification
/// protocol.
pub struct Downloader {
    base_url: Option<String>,
    allow_http: bool,
    verifiers: Vec<Box<dyn Verifier>>,
    auxiliary_files: BTreeSet<String>,
    file_url_overrides: HashMap<String, String>,
    scratch: Option<TempDir>,
    downloaded: HashMap<String, DownloadedFile>,
    cancel: CancelHandle,
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

impl Downloader {
    /// Creates a downloader with no base URL and no verifiers.
    pub fn new() -> Self {
        Self {
            base_url: None,
            allow_http: false,
            verifiers: Vec::new(),
            auxiliary_files: BTreeSet::new(),
            file_url_overrides: HashMap::new(),
            scratch: None,
            downloaded: HashMap::new(),
            cancel: CancelHandle::new(),
        }
    }

    /// Permits `http://` base and override URLs.
    ///
    /// Intended for tests against local servers; production origins must
    /// be HTTPS.
    pub fn allow_insecure_http(&mut self, allow: bool) -> &mut Self {
        self.allow_http = allow;
        self
    }

    /// Sets the origin all relative fetches resolve against.
    ///
    /// The URL must be HTTPS (or HTTP after
    /// [`allow_insecure_http`](Self::allow_insecure_http)). Trailing
    /// slashes beyond the path root are trimmed.
    pub fn base_url(&mut self, url: &str) -> Result<&mut Self> {
        let normalized = self.normalize_url(url)?;
        self.base_url = Some(normalized);
        Ok(self)
    }

    /// Registers a verification step for each subsequent [`get`](Self::get).
    ///
    /// The verifier's required auxiliary files are fetched before the
    /// primary artifact. Verifiers run in registration order.
    pub fn add_verification(&mut self, verifier: impl Verifier + 'static) -> &mut Self {
        for file in verifier.required_files() {
            self.auxiliary_files.insert(file);
        }
        self.verifiers.push(Box::new(verifier));
        self
    }

    /// Pins an auxiliary filename to an absolute URL, e.g. when a
    /// signature is hosted on a different server than the release.
    pub fn override_file_url(&mut self, filename: impl Into<String>, url: impl Into<String>) {
        self.file_url_overrides.insert(filename.into(), url.into());
    }

    /// Fetches `path` relative to the base URL, after fetching all
    /// auxiliary files, and runs every registered verifier.
    ///
    /// Returns the stored primary file only if each verifier accepted
    /// the downloaded set. A repeated call with the same filename
    /// returns the previously stored file without refetching.
    pub fn get(&mut self, path: &str) -> Result<DownloadedFile> {
        let base = self
            .base_url
            .clone()
            .ok_or_else(|| UpdateError::misconfigured("downloader base url is not set"))?;
        if self.cancel.get() {
            return Err(UpdateError::Cancelled);
        }

        // Auxiliary files first: they are small and their absence should
        // fail the operation before the large primary is transferred.
        for auxiliary in self.auxiliary_files.clone() {
            let url = match self.file_url_overrides.get(&auxiliary) {
                Some(external) => self.normalize_url(external)?,
                None => join_url(&base, &auxiliary),
            };
            self.fetch_file(&auxiliary, &url)?;
        }

        let url = join_url(&base, path);
        let primary = self.fetch_file(path, &url)?;

        for verifier in &self.verifiers {
            verifier.verify(&VerifierInput {
                primary: path,
                files: &self.downloaded,
            })?;
        }
        Ok(primary)
    }

    /// Sets the cancellation state for current and future downloads,
    /// returning the previous value. Must be reset manually before the
    /// downloader is reused.
    pub fn cancel(&self, state: bool) -> bool {
        self.cancel.set(state)
    }

    /// Reads the current cancellation state.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.get()
    }

    /// Returns a handle to the cancellation flag that can be moved to
    /// another thread.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Drops the download cache and the scratch directory.
    ///
    /// Not meant to be called while an update is in progress.
    pub fn clear(&mut self) {
        self.downloaded.clear();
        self.scratch = None;
    }

    fn normalize_url(&self, url: &str) -> Result<String> {
        let accepted = url.starts_with("https://") || (self.allow_http && url.starts_with("http://"));
        if !accepted {
            return Err(UpdateError::misconfigured(format!(
                "the base url must be an HTTPS url: {url}"
            )));
        }
        let scheme_end = url.find("://").expect("scheme checked above") + 3;
        let Some(path_slash) = url[scheme_end..].find('/') else {
            // No path component at all.
            return Ok(url.to_string());
        };
        // Trim trailing slashes but keep the path root itself.
        let path_start = scheme_end + path_slash;
        let mut end = url.len();
        while end > path_start + 1 && url.as_bytes()[end - 1] == b'/' {
            end -= 1;
        }
        Ok(url[..end].to_string())
    }

    fn fetch_file(&mut self, filename: &str, url: &str) -> Result<DownloadedFile> {
        if let Some(existing) = self.downloaded.get(filename) {
            return Ok(existing.clone());
        }

        let scratch = self.scratch_dir()?;
        let local_path = scratch
            .join(crate::utils::fs::random_string(8))
            .join(filename.trim_start_matches('/'));
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)?;
        }

        debug!("downloading {url} to {}", local_path.display());
        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| UpdateError::transport(format!("failed to build HTTP client: {err}")))?;
        let mut response = client
            .get(url)
            .send()
            .map_err(|err| UpdateError::transport(format!("failed to download {url}: {err}")))?;

        if self.cancel.get() {
            return Err(UpdateError::Cancelled);
        }
        if response.status() != reqwest::StatusCode::OK {
            return Err(UpdateError::transport(format!(
                "failed to download {url}: unexpected status {}",
                response.status()
            )));
        }

        let mut out = fs::File::create(&local_path)?;
        let mut buffer = [0u8; 64 * 1024];
        loop {
            if self.cancel.get() {
                return Err(UpdateError::Cancelled);
            }
            let n = response.read(&mut buffer).map_err(|err| {
                UpdateError::transport(format!("failed while reading {url}: {err}"))
            })?;
            if n == 0 {
                break;
            }
            out.write_all(&buffer[..n])?;
        }
        out.flush()?;

        let file = DownloadedFile::new(local_path);
        self.downloaded.insert(filename.to_string(), file.clone());
        Ok(file)
    }

    fn scratch_dir(&mut self) -> Result<PathBuf> {
        if self.scratch.is_none() {
            self.scratch = Some(tempfile::tempdir()?);
        }
        Ok(self
            .scratch
            .as_ref()
            .expect("scratch directory was just created")
            .path()
            .to_path_buf())
    }
}

fn join_url(base: &str, path: &str) -> String {
    let path = path.trim_start_matches('/');
    if base.ends_with('/') {
        format!("{base}{path}")
    } else {
        format!("{base}/{path}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_requires_https() {
        let mut downloader = Downloader::new();
        assert!(downloader.base_url("http://example.com").is_err());
        assert!(downloader.base_url("ftp://example.com").is_err());
        assert!(downloader.base_url("https://example.com").is_ok());
    }

    #[test]
    fn http_requires_explicit_opt_in() {
        let mut downloader = Downloader::new();
        downloader.allow_insecure_http(true);
        assert!(downloader.base_url("http://127.0.0.1:1234").is_ok());
    }

    #[test]
    fn trailing_slashes_are_trimmed() {
        let mut downloader = Downloader::new();
        downloader.base_url("https://example.com/releases///").unwrap();
        assert_eq!(
            downloader.base_url.as_deref(),
            Some("https://example.com/releases")
        );

        downloader.base_url("https://example.com/").unwrap();
        assert_eq!(downloader.base_url.as_deref(), Some("https://example.com/"));
    }

    #[test]
    fn get_without_base_url_is_misconfigured() {
        let mut downloader = Downloader::new();
        let err = downloader.get("file.zip").unwrap_err();
        assert!(matches!(err, UpdateError::Misconfigured { .. }));
    }

    #[test]
    fn cancelled_downloader_refuses_future_gets() {
        let mut downloader = Downloader::new();
        downloader.base_url("https://example.com").unwrap();
        assert!(!downloader.cancel(true));
        let err = downloader.get("file.zip").unwrap_err();
        assert!(matches!(err, UpdateError::Cancelled));
    }

    #[test]
    fn cancel_returns_previous_state() {
        let downloader = Downloader::new();
        assert!(!downloader.cancel(true));
        assert!(downloader.cancel(true));
        assert!(downloader.cancel(false));
        assert!(!downloader.is_cancelled());
    }

    #[test]
    fn join_url_handles_roots_and_paths() {
        assert_eq!(
            join_url("https://h/releases", "file.zip"),
            "https://h/releases/file.zip"
        );
        assert_eq!(join_url("https://h/", "file.zip"), "https://h/file.zip");
        assert_eq!(join_url("https://h", "/file.zip"), "https://h/file.zip");
    }

    #[test]
    fn downloads_and_dedups_by_filename() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/release.txt")
            .with_status(200)
            .with_body("payload")
            .expect(1)
            .create();

        let mut downloader = Downloader::new();
        downloader.allow_insecure_http(true);
        downloader.base_url(&server.url()).unwrap();

        let first = downloader.get("release.txt").unwrap();
        assert_eq!(first.read_to_string().unwrap(), "payload");

        // Second fetch is served from the cache.
        let second = downloader.get("release.txt").unwrap();
        assert_eq!(second.path(), first.path());
        mock.assert();
    }

    #[test]
    fn non_200_status_is_a_transport_error() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/missing.zip")
            .with_status(404)
            .create();

        let mut downloader = Downloader::new();
        downloader.allow_insecure_http(true);
        downloader.base_url(&server.url()).unwrap();

        let err = downloader.get("missing.zip").unwrap_err();
        assert!(matches!(err, UpdateError::Transport { .. }));
    }

    #[test]
    fn missing_auxiliary_file_fails_before_primary_download() {
        struct NeedsManifest;
        impl Verifier for NeedsManifest {
            fn required_files(&self) -> Vec<String> {
                vec!["MANIFEST".to_string()]
            }
            fn verify(&self, _input: &VerifierInput<'_>) -> Result<()> {
                Ok(())
            }
        }

        let mut server = mockito::Server::new();
        server.mock("GET", "/MANIFEST").with_status(404).create();
        let primary = server
            .mock("GET", "/release.zip")
            .with_status(200)
            .with_body("archive")
            .expect(0)
            .create();

        let mut downloader = Downloader::new();
        downloader.allow_insecure_http(true);
        downloader.base_url(&server.url()).unwrap();
        downloader.add_verification(NeedsManifest);

        let err = downloader.get("release.zip").unwrap_err();
        assert!(matches!(err, UpdateError::Transport { .. }));
        primary.assert();
    }

    #[test]
    fn override_fetches_auxiliary_from_other_host() {
        struct NeedsManifest;
        impl Verifier for NeedsManifest {
            fn required_files(&self) -> Vec<String> {
                vec!["MANIFEST".to_string()]
            }
            fn verify(&self, input: &VerifierInput<'_>) -> Result<()> {
                assert!(input.files.contains_key("MANIFEST"));
                Ok(())
            }
        }

        let mut release_server = mockito::Server::new();
        release_server
            .mock("GET", "/release.zip")
            .with_status(200)
            .with_body("archive")
            .create();
        let mut manifest_server = mockito::Server::new();
        let manifest_mock = manifest_server
            .mock("GET", "/elsewhere/MANIFEST")
            .with_status(200)
            .with_body("abc *release.zip\n")
            .create();

        let mut downloader = Downloader::new();
        downloader.allow_insecure_http(true);
        downloader.base_url(&release_server.url()).unwrap();
        downloader.add_verification(NeedsManifest);
        downloader.override_file_url(
            "MANIFEST",
            format!("{}/elsewhere/MANIFEST", manifest_server.url()),
        );

        downloader.get("release.zip").unwrap();
        manifest_mock.assert();
    }
}
