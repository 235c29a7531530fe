//! Discovery of the latest available release.
//!
//! An [`UpdateSource`] resolves "what is the newest version and where is
//! its archive" against some remote origin. The source also publishes an
//! immutable [`url_pattern`](UpdateSource::url_pattern) which the update
//! pipeline uses to reject download URLs that do not live on the
//! expected origin, independently of what the index response claims.
//!
//! [`ReleaseIndexSource`] is the reference implementation: it fetches a
//! GitHub-style release index document over HTTPS and picks the first
//! asset whose name matches the requested filename pattern.

use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::constants::USER_AGENT;
use crate::core::{Result, UpdateError};
use crate::utils::regex_is_full_match;
use crate::utils::url::FileUrl;
use crate::version::VersionNumber;

/// Resolves the latest release version and its download URL.
pub trait UpdateSource {
    /// Resolves the release index, returning the latest version and the
    /// URL of the first asset whose filename fully matches
    /// `filename_pattern`.
    fn resolve(&self, filename_pattern: &Regex) -> Result<(VersionNumber, FileUrl)>;

    /// Pattern every download URL from this source must fully match.
    fn url_pattern(&self) -> Regex;
}

#[derive(Debug, Deserialize)]
struct ReleaseIndex {
    tag_name: String,
    #[serde(default)]
    assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Deserialize)]
struct ReleaseAsset {
    name: String,
    browser_download_url: String,
}

/// Update source backed by a GitHub-style release index.
///
/// Fetches `https://api.github.com/repos/<owner>/<repo>/releases/latest`
/// (or an overridden index URL for tests and self-hosted forges), parses
/// the `tag_name` with the configured prefix and selects the matching
/// asset.
pub struct ReleaseIndexSource {
    owner: String,
    repo: String,
    tag_prefix: String,
    index_url: Option<String>,
    allow_http: bool,
}

impl ReleaseIndexSource {
    /// Creates a source for `owner/repo` on github.com with the default
    /// `v` tag prefix.
    ///
    /// Owner and repository names are restricted to alphanumerics,
    /// hyphens, underscores and dots so they cannot smuggle path or URL
    /// metacharacters into the constructed endpoint.
    pub fn new(owner: &str, repo: &str) -> Result<Self> {
        if !valid_repo_identifier(owner) {
            return Err(UpdateError::misconfigured(format!(
                "invalid repository owner: {owner}"
            )));
        }
        if !valid_repo_identifier(repo) {
            return Err(UpdateError::misconfigured(format!(
                "invalid repository name: {repo}"
            )));
        }
        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            tag_prefix: "v".to_string(),
            index_url: None,
            allow_http: false,
        })
    }

    /// Sets the literal prefix stripped from `tag_name` before version
    /// parsing. Defaults to `"v"`.
    pub fn tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tag_prefix = prefix.into();
        self
    }

    /// Overrides the release index endpoint, e.g. for a self-hosted
    /// forge or a local test server.
    pub fn index_url(mut self, url: impl Into<String>) -> Self {
        self.index_url = Some(url.into());
        self
    }

    /// Permits plain HTTP for the index endpoint and download URLs.
    /// Intended for tests against local servers.
    pub fn allow_insecure_http(mut self, allow: bool) -> Self {
        self.allow_http = allow;
        self
    }

    fn endpoint(&self) -> String {
        self.index_url.clone().unwrap_or_else(|| {
            format!(
                "https://api.github.com/repos/{}/{}/releases/latest",
                self.owner, self.repo
            )
        })
    }
}

impl UpdateSource for ReleaseIndexSource {
    fn resolve(&self, filename_pattern: &Regex) -> Result<(VersionNumber, FileUrl)> {
        let endpoint = self.endpoint();
        debug!("fetching release index from {endpoint}");

        let client = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|err| UpdateError::transport(format!("failed to build HTTP client: {err}")))?;
        let response = client.get(&endpoint).send().map_err(|err| {
            UpdateError::transport(format!("failed to fetch release index: {err}"))
        })?;
        if response.status() != reqwest::StatusCode::OK {
            return Err(UpdateError::transport(format!(
                "release index returned unexpected status {}",
                response.status()
            )));
        }
        let body = response.text().map_err(|err| {
            UpdateError::transport(format!("failed to read release index: {err}"))
        })?;
        let index: ReleaseIndex = serde_json::from_str(&body).map_err(|err| {
            UpdateError::transport(format!("invalid release index document: {err}"))
        })?;

        let version = VersionNumber::parse_with_prefix(&index.tag_name, &self.tag_prefix)
            .map_err(|err| {
                UpdateError::transport(format!(
                    "release tag {:?} is not a valid version: {err}",
                    index.tag_name
                ))
            })?;

        let asset = index
            .assets
            .iter()
            .find(|asset| regex_is_full_match(filename_pattern, &asset.name))
            .ok_or_else(|| {
                UpdateError::transport(format!(
                    "no release asset matches {:?}",
                    filename_pattern.as_str()
                ))
            })?;

        let url_pattern = self.url_pattern();
        if !regex_is_full_match(&url_pattern, &asset.browser_download_url) {
            return Err(UpdateError::transport(format!(
                "release asset url {} does not match the expected origin",
                asset.browser_download_url
            )));
        }

        debug!(
            "release index resolved to version {version} at {}",
            asset.browser_download_url
        );
        Ok((version, FileUrl::parse(asset.browser_download_url.clone())?))
    }

    fn url_pattern(&self) -> Regex {
        let pattern = if self.allow_http {
            format!(
                "https?://.*/{}/{}/releases/download/.*",
                regex::escape(&self.owner),
                regex::escape(&self.repo)
            )
        } else {
            format!(
                "https://github\\.com/{}/{}/releases/download/.*",
                regex::escape(&self.owner),
                regex::escape(&self.repo)
            )
        };
        Regex::new(&pattern).expect("origin pattern is valid")
    }
}

fn valid_repo_identifier(identifier: &str) -> bool {
    !identifier.is_empty()
        && identifier.len() <= 100
        && identifier
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !identifier.starts_with('.')
        && !identifier.starts_with('-')
        && !identifier.ends_with('.')
        && !identifier.ends_with('-')
        && !identifier.contains("..")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern(s: &str) -> Regex {
        Regex::new(s).unwrap()
    }

    #[test]
    fn rejects_unsafe_repo_identifiers() {
        assert!(ReleaseIndexSource::new("owner", "repo").is_ok());
        assert!(ReleaseIndexSource::new("my-org", "my_project.rs").is_ok());
        assert!(ReleaseIndexSource::new("../evil", "repo").is_err());
        assert!(ReleaseIndexSource::new("", "repo").is_err());
        assert!(ReleaseIndexSource::new("owner", "repo/../../x").is_err());
        assert!(ReleaseIndexSource::new("-owner", "repo").is_err());
    }

    #[test]
    fn url_pattern_pins_the_origin() {
        let source = ReleaseIndexSource::new("owner", "repo").unwrap();
        let url_pattern = source.url_pattern();
        assert!(regex_is_full_match(
            &url_pattern,
            "https://github.com/owner/repo/releases/download/v1.2.3/app.zip"
        ));
        assert!(!regex_is_full_match(
            &url_pattern,
            "https://evil.example/owner/repo/releases/download/v1.2.3/app.zip"
        ));
    }

    #[test]
    fn resolves_first_matching_asset() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/index")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(format!(
                r#"{{
                    "tag_name": "v1.2.3",
                    "assets": [
                        {{"name": "notes.txt", "browser_download_url": "{url}/dl/owner/repo/releases/download/v1.2.3/notes.txt"}},
                        {{"name": "release-1.2.3.zip", "browser_download_url": "{url}/dl/owner/repo/releases/download/v1.2.3/release-1.2.3.zip"}},
                        {{"name": "release-1.2.3-b.zip", "browser_download_url": "{url}/dl/owner/repo/releases/download/v1.2.3/release-1.2.3-b.zip"}}
                    ]
                }}"#,
                url = server.url()
            ))
            .create();

        let source = ReleaseIndexSource::new("owner", "repo")
            .unwrap()
            .allow_insecure_http(true)
            .index_url(format!("{}/index", server.url()));

        let (version, url) = source.resolve(&pattern(r"release-.*\.zip")).unwrap();
        assert_eq!(version, VersionNumber::parse("1.2.3").unwrap());
        assert_eq!(url.filename(), "release-1.2.3.zip");
    }

    #[test]
    fn missing_matching_asset_is_an_error() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/index")
            .with_status(200)
            .with_body(r#"{"tag_name": "v1.2.3", "assets": []}"#)
            .create();

        let source = ReleaseIndexSource::new("owner", "repo")
            .unwrap()
            .allow_insecure_http(true)
            .index_url(format!("{}/index", server.url()));

        let err = source.resolve(&pattern(r".*\.zip")).unwrap_err();
        assert!(matches!(err, UpdateError::Transport { .. }));
    }

    #[test]
    fn malformed_tag_is_an_error() {
        let mut server = mockito::Server::new();
        server
            .mock("GET", "/index")
            .with_status(200)
            .with_body(
                r#"{"tag_name": "nightly", "assets": [
                    {"name": "a.zip", "browser_download_url": "https://x/a.zip"}
                ]}"#,
            )
            .create();

        let source = ReleaseIndexSource::new("owner", "repo")
            .unwrap()
            .allow_insecure_http(true)
            .index_url(format!("{}/index", server.url()));

        let err = source.resolve(&pattern(r".*\.zip")).unwrap_err();
        assert!(matches!(err, UpdateError::Transport { .. }));
    }
}
