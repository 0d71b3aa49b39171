//! The four external operations: index, query, clear, stats.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::chunk::ChunkingConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{EmbeddingError, IndexError, StorageError};
use crate::index::{IndexOptions, IndexResult, Indexer};
use crate::models::{Document, RagQuery, RagResult, RagStats};
use crate::progress::ProgressCallback;
use crate::store::RagAdminProvider;

/// Failure of [`RagService::query`].
#[derive(Error, Debug)]
pub enum QueryError {
    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Façade over one store, one embedding provider and their indexer.
pub struct RagService {
    store: Arc<dyn RagAdminProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    indexer: Indexer,
}

impl RagService {
    pub fn new(
        store: Arc<dyn RagAdminProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        options: IndexOptions,
    ) -> Self {
        let indexer = Indexer::new(Arc::clone(&store), Arc::clone(&embedder), options);
        Self {
            store,
            embedder,
            indexer,
        }
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    /// Run one incremental indexing pass. See [`Indexer::run`].
    pub async fn index(
        &self,
        documents: &[Document],
        config: &ChunkingConfig,
        progress: Option<ProgressCallback>,
        cancel: Option<CancellationToken>,
    ) -> Result<IndexResult, IndexError> {
        self.indexer.run(documents, config, progress, cancel).await
    }

    /// Embed `query.text` and rank stored chunks against it. Blank text
    /// yields no results and no provider call.
    pub async fn query(&self, query: &RagQuery) -> Result<Vec<RagResult>, QueryError> {
        if query.text.trim().is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed(&query.text).await?;
        let results = self.store.query(query, &vector).await?;
        debug!(hits = results.len(), limit = query.limit, "query served");
        Ok(results)
    }

    /// Remove every chunk and checksum.
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.store.clear().await
    }

    pub async fn stats(&self) -> Result<RagStats, StorageError> {
        self.store.get_stats().await
    }
}
