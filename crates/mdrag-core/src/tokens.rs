//! Approximate token counting.
//!
//! Exact tokenization depends on the embedding model and is expensive, so
//! the chunker works with an estimate. Every size check downstream applies
//! `padding_factor` to the model limit to absorb the estimation error.

/// Approximate bytes-per-token ratio for the default heuristic.
const BYTES_PER_TOKEN: usize = 4;

/// Pluggable token estimator.
///
/// Implementations must be pure: the same text always yields the same
/// count, and `count("") == 0`.
pub trait TokenCounter: Send + Sync {
    /// Short identifier used in logs.
    fn name(&self) -> &str;

    /// Estimate the token count of `text`.
    fn count(&self, text: &str) -> usize;

    /// Element-wise [`count`](TokenCounter::count); the result has the
    /// same length as `texts`.
    fn count_batch(&self, texts: &[&str]) -> Vec<usize> {
        texts.iter().map(|t| self.count(t)).collect()
    }
}

/// UTF-8 byte length divided by 4, rounded up.
///
/// Monotonic in byte length, so a prefix never counts more than the
/// text it was taken from.
///
/// ```rust
/// use mdrag_core::tokens::{ByteLengthCounter, TokenCounter};
///
/// let counter = ByteLengthCounter;
/// assert_eq!(counter.count(""), 0);
/// assert_eq!(counter.count("foo bar baz"), 3); // 11 bytes
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteLengthCounter;

impl TokenCounter for ByteLengthCounter {
    fn name(&self) -> &str {
        "bytes/4"
    }

    fn count(&self, text: &str) -> usize {
        text.len().div_ceil(BYTES_PER_TOKEN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_is_zero() {
        assert_eq!(ByteLengthCounter.count(""), 0);
    }

    #[test]
    fn test_rounds_up() {
        assert_eq!(ByteLengthCounter.count("a"), 1);
        assert_eq!(ByteLengthCounter.count("abcd"), 1);
        assert_eq!(ByteLengthCounter.count("abcde"), 2);
        assert_eq!(ByteLengthCounter.count("qux quux"), 2);
    }

    #[test]
    fn test_counts_utf8_bytes_not_chars() {
        // "é" is two bytes, "┌" is three.
        assert_eq!(ByteLengthCounter.count("éé"), 1);
        assert_eq!(ByteLengthCounter.count("┌┌"), 2);
    }

    #[test]
    fn test_monotonic_in_byte_length() {
        let text = "Lorem ipsum dolor sit amet, consectetur adipiscing elit.";
        let mut last = 0;
        for end in 0..=text.len() {
            let n = ByteLengthCounter.count(&text[..end]);
            assert!(n >= last, "count decreased at {}", end);
            last = n;
        }
    }

    #[test]
    fn test_batch_matches_single() {
        let texts = ["", "one", "a longer piece of text"];
        let batch = ByteLengthCounter.count_batch(&texts);
        assert_eq!(batch.len(), texts.len());
        for (t, n) in texts.iter().zip(batch) {
            assert_eq!(ByteLengthCounter.count(t), n);
        }
    }
}
