//! In-memory [`RagAdminProvider`] implementation for tests and embedding.
//!
//! All state sits behind one `tokio::sync::RwLock`, so replacing a
//! document's chunks is a single write-lock critical section and readers
//! never observe a half-replaced document. Vector search is brute-force
//! cosine similarity over all stored chunks.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};

use crate::embedding::cosine_similarity;
use crate::error::StorageError;
use crate::models::{IndexedDocument, RagChunk, RagQuery, RagResult, RagStats};

use super::{finalize_results, RagAdminProvider, RagQueryProvider, RunGuard};

struct StoredDoc {
    meta: IndexedDocument,
    chunks: Vec<RagChunk>,
}

#[derive(Default)]
struct State {
    docs: BTreeMap<String, StoredDoc>,
}

/// In-memory store.
#[derive(Default)]
pub struct InMemoryStore {
    state: RwLock<State>,
    run_slot: Arc<Mutex<()>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stored chunks of one document, in ordinal order.
    pub async fn chunks_for(&self, file_path: &str) -> Vec<RagChunk> {
        let state = self.state.read().await;
        state
            .docs
            .get(file_path)
            .map(|d| d.chunks.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl RagQueryProvider for InMemoryStore {
    async fn query(
        &self,
        query: &RagQuery,
        query_vec: &[f32],
    ) -> Result<Vec<RagResult>, StorageError> {
        let state = self.state.read().await;
        let results = state
            .docs
            .values()
            .flat_map(|d| d.chunks.iter())
            .filter(|c| query.matches(c))
            .map(|c| RagResult::from_chunk(c, cosine_similarity(query_vec, &c.embedding)))
            .collect();
        Ok(finalize_results(results, query))
    }
}

#[async_trait]
impl RagAdminProvider for InMemoryStore {
    async fn try_begin_run(&self) -> Result<Option<RunGuard>, StorageError> {
        match self.run_slot.clone().try_lock_owned() {
            // Dropping the unpolled future also frees the slot.
            Ok(permit) => Ok(Some(RunGuard::new(async move { drop(permit) }))),
            Err(_) => Ok(None),
        }
    }

    async fn upsert_chunks(
        &self,
        doc: &IndexedDocument,
        chunks: &[RagChunk],
    ) -> Result<(), StorageError> {
        if let Some(stray) = chunks.iter().find(|c| c.file_path != doc.file_path) {
            return Err(StorageError::Backend(format!(
                "chunk {} belongs to {}, not {}",
                stray.id, stray.file_path, doc.file_path
            )));
        }
        let mut sorted = chunks.to_vec();
        sorted.sort_by_key(|c| c.ordinal);

        let mut state = self.state.write().await;
        state.docs.insert(
            doc.file_path.clone(),
            StoredDoc {
                meta: doc.clone(),
                chunks: sorted,
            },
        );
        Ok(())
    }

    async fn delete_by_file_path(&self, file_path: &str) -> Result<u64, StorageError> {
        let mut state = self.state.write().await;
        Ok(state
            .docs
            .remove(file_path)
            .map(|d| d.chunks.len() as u64)
            .unwrap_or(0))
    }

    async fn get_checksum(&self, file_path: &str) -> Result<Option<String>, StorageError> {
        let state = self.state.read().await;
        Ok(state.docs.get(file_path).map(|d| d.meta.checksum.clone()))
    }

    async fn list_file_paths(&self) -> Result<Vec<String>, StorageError> {
        let state = self.state.read().await;
        Ok(state.docs.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<(), StorageError> {
        self.state.write().await.docs.clear();
        Ok(())
    }

    async fn get_stats(&self) -> Result<RagStats, StorageError> {
        let state = self.state.read().await;
        let embedding_model = state
            .docs
            .values()
            .max_by_key(|d| d.meta.indexed_at)
            .map(|d| d.meta.embedding_model.clone());
        Ok(RagStats {
            total_chunks: state.docs.values().map(|d| d.chunks.len()).sum(),
            total_resources: state.docs.len(),
            embedding_model,
        })
    }
}
