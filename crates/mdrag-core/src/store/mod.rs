//! Storage abstraction for mdrag.
//!
//! Reads and writes are split into two traits so that query paths can be
//! handed a read-only capability:
//!
//! | Trait | Used by |
//! |-------|---------|
//! | [`RagQueryProvider`] | `RagService::query` |
//! | [`RagAdminProvider`] | the indexer, `clear`, `stats` |
//!
//! Implementations must be `Send + Sync` and must make
//! [`upsert_chunks`](RagAdminProvider::upsert_chunks) atomic: a concurrent
//! query sees either the old chunk set of a document or the new one, never a
//! mix.
//!
//! Writers are serialized per store, not per indexer:
//! [`try_begin_run`](RagAdminProvider::try_begin_run) hands out at most one
//! [`RunGuard`] at a time for a given backing store, however many indexers
//! or processes share it.

pub mod memory;

use std::cmp::Ordering;
use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::{IndexedDocument, RagChunk, RagQuery, RagResult, RagStats};

/// Similarity search over persisted chunks.
#[async_trait]
pub trait RagQueryProvider: Send + Sync {
    /// Rank chunks against `query_vec`, applying the filters and limit of
    /// `query`.
    async fn query(&self, query: &RagQuery, query_vec: &[f32])
        -> Result<Vec<RagResult>, StorageError>;
}

/// Mutating operations used by the indexer and admin commands.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert_chunks`](RagAdminProvider::upsert_chunks) | Replace a document's chunks and checksum |
/// | [`delete_by_file_path`](RagAdminProvider::delete_by_file_path) | Drop a document and its chunks |
/// | [`get_checksum`](RagAdminProvider::get_checksum) | Stored checksum of a document |
/// | [`list_file_paths`](RagAdminProvider::list_file_paths) | Every indexed document |
/// | [`clear`](RagAdminProvider::clear) | Drop everything |
/// | [`get_stats`](RagAdminProvider::get_stats) | Chunk and document counts |
/// | [`try_begin_run`](RagAdminProvider::try_begin_run) | Claim the single indexing slot |
#[async_trait]
pub trait RagAdminProvider: RagQueryProvider {
    /// Claim exclusive indexing rights on this store.
    ///
    /// Returns `Ok(None)` without waiting when another run holds them. The
    /// claim lasts until the returned guard is released or dropped.
    async fn try_begin_run(&self) -> Result<Option<RunGuard>, StorageError>;

    /// Replace every chunk of `doc.file_path` with `chunks` and record
    /// `doc.checksum`, as one logical operation.
    async fn upsert_chunks(
        &self,
        doc: &IndexedDocument,
        chunks: &[RagChunk],
    ) -> Result<(), StorageError>;

    /// Remove a document and its chunks. Returns the number of chunks removed.
    async fn delete_by_file_path(&self, file_path: &str) -> Result<u64, StorageError>;

    async fn get_checksum(&self, file_path: &str) -> Result<Option<String>, StorageError>;

    async fn list_file_paths(&self) -> Result<Vec<String>, StorageError>;

    async fn clear(&self) -> Result<(), StorageError>;

    async fn get_stats(&self) -> Result<RagStats, StorageError>;
}

type ReleaseFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Proof of an exclusive indexing claim on a store.
///
/// Call [`release`](RunGuard::release) to give the claim back and wait for
/// the backend to record it. Dropping an unreleased guard spawns the release
/// on the current Tokio runtime, or simply drops it outside one.
pub struct RunGuard {
    release: Option<ReleaseFuture>,
}

impl RunGuard {
    pub fn new(release: impl Future<Output = ()> + Send + 'static) -> Self {
        Self {
            release: Some(Box::pin(release)),
        }
    }

    pub async fn release(mut self) {
        if let Some(release) = self.release.take() {
            release.await;
        }
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(release);
            }
        }
    }
}

impl std::fmt::Debug for RunGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunGuard")
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Result ordering shared by every backend: descending score, then
/// ascending chunk id.
pub fn rank_order(a: &RagResult, b: &RagResult) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.chunk_id.cmp(&b.chunk_id))
}

/// Sort, apply `min_score` and truncate to `limit`.
pub fn finalize_results(mut results: Vec<RagResult>, query: &RagQuery) -> Vec<RagResult> {
    if let Some(min) = query.min_score {
        results.retain(|r| r.score >= min);
    }
    results.sort_by(rank_order);
    results.truncate(query.limit);
    results
}
