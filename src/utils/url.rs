//! Decomposition of download URLs into base and filename.

use std::fmt;

use crate::core::{Result, UpdateError};

/// An absolute URL to a remote file, split into the base URL (scheme,
/// host and path up to and including the last `/`) and the final path
/// segment.
///
/// The decomposition is loss-free: `base_url() + filename()` always
/// reconstructs the original URL byte for byte.
///
/// ```
/// use updraft::utils::url::FileUrl;
///
/// let url = FileUrl::parse("https://example.com/releases/app-1.2.3.zip").unwrap();
/// assert_eq!(url.base_url(), "https://example.com/releases/");
/// assert_eq!(url.filename(), "app-1.2.3.zip");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUrl {
    url: String,
    // Byte offset of the first filename character; base is everything
    // before it.
    split: usize,
}

impl FileUrl {
    /// Parses an absolute URL.
    ///
    /// The URL must carry a scheme; whether the scheme is acceptable
    /// (HTTPS, or HTTP when explicitly allowed) is decided by the
    /// downloader, not here.
    pub fn parse(url: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let scheme_end = url
            .find("://")
            .ok_or_else(|| UpdateError::transport(format!("not an absolute URL: {url}")))?;
        let authority_start = scheme_end + 3;
        let split = match url[authority_start..].find('/') {
            Some(_) => url.rfind('/').map(|i| i + 1).unwrap_or(url.len()),
            // No path at all: the whole URL is the base.
            None => url.len(),
        };
        Ok(Self { url, split })
    }

    /// The full URL.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Scheme, host and path up to and including the last `/`.
    pub fn base_url(&self) -> &str {
        &self.url[..self.split]
    }

    /// The final path segment.
    pub fn filename(&self) -> &str {
        &self.url[self.split..]
    }
}

impl fmt::Display for FileUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.url)
    }
}
