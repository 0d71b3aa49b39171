//! Error taxonomy for the indexing core.
//!
//! Errors are split by blast radius:
//!
//! | Error | Scope |
//! |-------|-------|
//! | [`ConfigError`] | Rejected at construction, before any run starts |
//! | [`ChunkingError`] | One document; recorded as a `failed` outcome |
//! | [`EmbeddingError`] | One document, after retries; recorded as `failed` |
//! | [`StorageError`] | The whole run; surfaced through [`IndexError::Storage`] |

use std::time::Duration;

use thiserror::Error;

use crate::index::IndexResult;

/// Invalid chunking configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be > 0")]
    NotPositive { field: &'static str },

    #[error("padding_factor must be in (0, 1], got {0}")]
    PaddingFactor(f64),

    #[error("model_token_limit × padding_factor rounds down to 0 tokens")]
    EmptyHardLimit,

    #[error("min_chunk_size ({min}) must not exceed target_chunk_size ({target})")]
    MinAboveTarget { min: usize, target: usize },
}

/// A document could not be split into chunks that fit the token limit.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ChunkingError {
    #[error("line {line} cannot be split under the {limit}-token limit")]
    Unsplittable { line: usize, limit: usize },
}

/// Failure reported by (or about) an embedding provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EmbeddingError {
    #[error("embedding provider error: {0}")]
    Provider(String),

    #[error("embedding request timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider returned {got} vectors for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("provider returned a {got}-dimensional vector, expected {expected}")]
    DimensionMismatch { expected: usize, got: usize },

    /// The provider refused the request (bad input, auth, unknown model).
    #[error("embedding request rejected: {0}")]
    Rejected(String),

    #[error("embedding provider is disabled")]
    Disabled,
}

impl EmbeddingError {
    /// Transient failures worth another attempt. A disabled provider or a
    /// wrong vector size will not fix itself.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EmbeddingError::Provider(_)
                | EmbeddingError::Timeout(_)
                | EmbeddingError::CountMismatch { .. }
        )
    }
}

/// Persistence backend failure.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StorageError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
}

/// Run-level failure of an indexing pass.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("an indexing run is already in progress for this store")]
    RunInProgress,

    #[error("indexing aborted: {source}")]
    Storage {
        #[source]
        source: StorageError,
        /// Outcomes accumulated before the failure. Documents listed as
        /// added/updated here are committed.
        partial: Box<IndexResult>,
    },
}

impl IndexError {
    /// The partial result of an aborted run, if any.
    pub fn partial(&self) -> Option<&IndexResult> {
        match self {
            IndexError::Storage { partial, .. } => Some(partial.as_ref()),
            IndexError::RunInProgress => None,
        }
    }
}
