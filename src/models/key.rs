//! Object keys: the only way objects are addressed.

use crate::models::options::ValidationError;
use regex::Regex;
use std::{fmt, sync::LazyLock};

/// Leading and trailing characters must be word characters; the middle may
/// also contain `.` and `/`. Traversal (`..`) is rejected separately since the
/// regex engine has no lookahead.
static KEY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_./]*[A-Za-z0-9_]$").expect("key pattern is valid")
});

/// A validated, slash-delimited object key such as `photos/2025/img.jpg`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Validate `raw` against the key pattern.
    ///
    /// Besides the pattern, every segment must be non-empty and must not start
    /// with `.`: a dot-leading leaf is how private objects are stored, so a
    /// public key could otherwise alias one.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        if !KEY_PATTERN.is_match(raw) || raw.contains("..") {
            return Err(ValidationError::single("key", "Invalid"));
        }
        if raw
            .split('/')
            .any(|segment| segment.is_empty() || segment.starts_with('.'))
        {
            return Err(ValidationError::single("key", "Invalid path segment"));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path segment.
    pub fn leaf(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Everything before the final segment, if any.
    pub fn parent(&self) -> Option<&str> {
        self.0.rsplit_once('/').map(|(parent, _)| parent)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Validate a listing prefix. Prefixes are looser than keys (they may be empty
/// or end in `/`) but still may not escape the storage root.
pub fn validate_prefix(prefix: &str) -> Result<(), ValidationError> {
    if prefix.starts_with('/') || prefix.contains("..") || prefix.contains('\\') {
        return Err(ValidationError::single("prefix", "Invalid"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_nested_keys() {
        let key = ObjectKey::parse("photos/2025/img.jpg").unwrap();
        assert_eq!(key.leaf(), "img.jpg");
        assert_eq!(key.parent(), Some("photos/2025"));

        let flat = ObjectKey::parse("ab").unwrap();
        assert_eq!(flat.leaf(), "ab");
        assert_eq!(flat.parent(), None);
    }

    #[test]
    fn rejects_traversal_and_separator_noise() {
        for bad in [
            "", "a", "/a/b", "a/b/", "a/../b", "..", "a..b", "a b", "a/.b", "a//b", "-a", "a\\b",
        ] {
            assert!(ObjectKey::parse(bad).is_err(), "{bad:?} should be rejected");
        }
    }

    #[test]
    fn prefix_rules() {
        assert!(validate_prefix("").is_ok());
        assert!(validate_prefix("tmp/test/").is_ok());
        assert!(validate_prefix("../etc").is_err());
        assert!(validate_prefix("/abs").is_err());
    }
}
