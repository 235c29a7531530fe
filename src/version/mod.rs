//! Version numbers for released artifacts.
//!
//! Release versions are ordered sequences of non-negative integer
//! components of arbitrary length (`1`, `1.4`, `13.5246.141`, ...). They
//! are deliberately not semver: there are no pre-release or build
//! metadata segments, and comparison pads the shorter value with zeros so
//! that `1.2` and `1.2.0` are equal. Equality is derived from ordering.

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use thiserror::Error;

/// Error produced when a string cannot be parsed as a [`VersionNumber`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseVersionError {
    /// The expected literal prefix was not at the start of the string.
    #[error("version string does not start with the expected prefix {0:?}")]
    PrefixMissing(String),
    /// The string contained no version components.
    #[error("version string is empty")]
    Empty,
    /// A component was empty or contained a non-digit character.
    #[error("invalid version component {0:?}")]
    InvalidComponent(String),
}

/// An ordered sequence of non-negative integer version components.
///
/// ```
/// use updraft::version::VersionNumber;
///
/// let a: VersionNumber = "1.2".parse().unwrap();
/// let b: VersionNumber = "1.2.0".parse().unwrap();
/// assert_eq!(a, b);
/// assert!(a < "1.2.1".parse().unwrap());
/// assert_eq!(a.to_string(), "1.2");
/// ```
#[derive(Debug, Clone)]
pub struct VersionNumber {
    components: Vec<u64>,
}

impl VersionNumber {
    /// Creates a version from explicit components.
    pub fn new<I>(components: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        Self {
            components: components.into_iter().collect(),
        }
    }

    /// Parses a version string such as `"1.2.3"`.
    ///
    /// Every `.`-separated piece must be a non-empty run of ASCII digits;
    /// signs and leading `+`/`-` are rejected.
    pub fn parse(version: &str) -> Result<Self, ParseVersionError> {
        Self::parse_with_prefix(version, "")
    }

    /// Parses a version string with a literal prefix, e.g. `"v1.2.3"`
    /// with prefix `"v"`.
    ///
    /// The prefix must occur at position 0; the remainder is parsed as
    /// with [`VersionNumber::parse`].
    pub fn parse_with_prefix(version: &str, prefix: &str) -> Result<Self, ParseVersionError> {
        let rest = version
            .strip_prefix(prefix)
            .ok_or_else(|| ParseVersionError::PrefixMissing(prefix.to_string()))?;
        if rest.is_empty() {
            return Err(ParseVersionError::Empty);
        }
        let mut components = Vec::new();
        for piece in rest.split('.') {
            if piece.is_empty() || !piece.bytes().all(|b| b.is_ascii_digit()) {
                return Err(ParseVersionError::InvalidComponent(piece.to_string()));
            }
            let value = piece
                .parse::<u64>()
                .map_err(|_| ParseVersionError::InvalidComponent(piece.to_string()))?;
            components.push(value);
        }
        Ok(Self { components })
    }

    /// The raw components of this version.
    pub fn components(&self) -> &[u64] {
        &self.components
    }

    /// Number of components.
    pub fn len(&self) -> usize {
        self.components.len()
    }

    /// Whether the version has no components.
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

impl fmt::Display for VersionNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, component) in self.components.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{component}")?;
        }
        Ok(())
    }
}

impl FromStr for VersionNumber {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Ord for VersionNumber {
    fn cmp(&self, other: &Self) -> Ordering {
        // Lexicographic over components, padding the shorter value with
        // zeros so that 1.2 == 1.2.0 and 1.2 < 1.2.1.
        let n = self.components.len().max(other.components.len());
        for i in 0..n {
            let a = self.components.get(i).copied().unwrap_or(0);
            let b = other.components.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => continue,
                unequal => return unequal,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for VersionNumber {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for VersionNumber {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for VersionNumber {}

impl Hash for VersionNumber {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Trailing zeros do not affect equality, so they may not affect
        // the hash either.
        let mut end = self.components.len();
        while end > 0 && self.components[end - 1] == 0 {
            end -= 1;
        }
        self.components[..end].hash(state);
    }
}
