//! Shared utilities: filesystem helpers and URL decomposition.

pub mod fs;
pub mod url;

use regex::Regex;

/// Whether `pattern` matches the entirety of `text`.
///
/// User-supplied filename and URL patterns are treated as full matches,
/// not substring searches, so `release-.*\.zip` does not accept
/// `evil-release-1.0.zip.exe`.
pub fn regex_is_full_match(pattern: &Regex, text: &str) -> bool {
    Regex::new(&format!("^(?:{})$", pattern.as_str()))
        .map(|anchored| anchored.is_match(text))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_match_is_anchored() {
        let pattern = Regex::new(r"release-.*\.zip").unwrap();
        assert!(regex_is_full_match(&pattern, "release-1.2.3.zip"));
        assert!(!regex_is_full_match(&pattern, "release-1.2.3.zip.exe"));
        assert!(!regex_is_full_match(&pattern, "a-release-1.2.3.zip"));
    }

    #[test]
    fn full_match_handles_alternations() {
        let pattern = Regex::new("a|ab").unwrap();
        assert!(regex_is_full_match(&pattern, "ab"));
        assert!(regex_is_full_match(&pattern, "a"));
        assert!(!regex_is_full_match(&pattern, "abc"));
    }
}
