//! Content fingerprints for incremental re-indexing.
//!
//! A document's SHA-256 checksum is the only signal used to decide whether
//! it must be re-chunked and re-embedded.

use sha2::{Digest, Sha256};

/// Result of comparing a fresh checksum with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChecksumComparison {
    /// `true` when the document is new or its content differs.
    pub changed: bool,
    /// `true` when a checksum was stored for the document.
    pub previously_indexed: bool,
}

/// Stateless checksum helper.
pub struct ChecksumTracker;

impl ChecksumTracker {
    /// Lowercase hex SHA-256 of `bytes`.
    pub fn compute(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Compare a freshly computed checksum with the stored one.
    pub fn compare(new_checksum: &str, stored: Option<&str>) -> ChecksumComparison {
        match stored {
            Some(old) => ChecksumComparison {
                changed: old != new_checksum,
                previously_indexed: true,
            },
            None => ChecksumComparison {
                changed: true,
                previously_indexed: false,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_digest() {
        assert_eq!(
            ChecksumTracker::compute(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_digest_is_stable_and_content_sensitive() {
        let a = ChecksumTracker::compute(b"# Title\n\nbody");
        assert_eq!(a, ChecksumTracker::compute(b"# Title\n\nbody"));
        assert_ne!(a, ChecksumTracker::compute(b"# Title\n\nbody."));
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_compare() {
        let new = ChecksumTracker::compute(b"x");
        let unseen = ChecksumTracker::compare(&new, None);
        assert!(unseen.changed);
        assert!(!unseen.previously_indexed);

        let same = ChecksumTracker::compare(&new, Some(&new));
        assert!(!same.changed);
        assert!(same.previously_indexed);

        let other = ChecksumTracker::compare(&new, Some("deadbeef"));
        assert!(other.changed);
        assert!(other.previously_indexed);
    }
}
