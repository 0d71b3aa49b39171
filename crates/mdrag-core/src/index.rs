//! Incremental indexing orchestrator.
//!
//! One [`Indexer::run`] walks a document set in order:
//!
//! 1. compare each document's checksum with the stored one; unchanged
//!    documents stop here,
//! 2. chunk the document,
//! 3. embed the chunk texts in batches (concurrently, with timeout, retry
//!    and backoff per batch),
//! 4. replace the document's stored chunk set in one
//!    [`upsert_chunks`](RagAdminProvider::upsert_chunks) call.
//!
//! After the loop, stored documents that are no longer in the set are
//! deleted. Chunking and embedding failures are recorded per document;
//! storage failures abort the run with the outcomes gathered so far.
//!
//! Only one run may be active per store, whichever indexer or process
//! starts it. The claim comes from
//! [`try_begin_run`](RagAdminProvider::try_begin_run); a second concurrent
//! run is rejected with [`IndexError::RunInProgress`].

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checksum::ChecksumTracker;
use crate::chunk::{chunk_document, ChunkingConfig};
use crate::embedding::{validate_batch, EmbeddingProvider};
use crate::error::{EmbeddingError, IndexError, StorageError};
use crate::models::{Document, IndexedDocument, RagChunk};
use crate::progress::{IndexPhase, IndexProgress, ProgressCallback};
use crate::store::RagAdminProvider;

/// Tuning knobs for embedding calls during a run.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexOptions {
    /// Texts per embedding call; lowered to the provider's own maximum.
    pub batch_size: usize,
    /// Embedding calls in flight at once for one document.
    pub max_concurrent_batches: usize,
    /// Deadline for a single embedding call.
    pub batch_timeout: Duration,
    /// Attempts per batch, including the first.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            batch_size: 32,
            max_concurrent_batches: 4,
            batch_timeout: Duration::from_secs(30),
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl IndexOptions {
    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

/// What happened to one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeKind {
    /// First time indexed.
    Added,
    /// Content changed; chunk set replaced.
    Updated,
    /// Checksum matched; nothing done.
    Unchanged,
    /// Not processed: duplicate path in the set, or the run was cancelled.
    Skipped,
    /// Chunking or embedding failed; stored state left as it was.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentOutcome {
    pub file_path: String,
    pub kind: OutcomeKind,
    /// Chunks written for this document.
    pub chunks: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeCounts {
    pub added: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl OutcomeCounts {
    fn record(&mut self, kind: OutcomeKind) {
        match kind {
            OutcomeKind::Added => self.added += 1,
            OutcomeKind::Updated => self.updated += 1,
            OutcomeKind::Unchanged => self.unchanged += 1,
            OutcomeKind::Skipped => self.skipped += 1,
            OutcomeKind::Failed => self.failed += 1,
        }
    }
}

/// Summary of one indexing run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndexResult {
    /// One entry per input document, in input order.
    pub outcomes: Vec<DocumentOutcome>,
    pub counts: OutcomeCounts,
    /// Stored documents deleted because they are no longer in the set.
    pub removed: Vec<String>,
    pub cancelled: bool,
    pub elapsed: Duration,
}

impl IndexResult {
    fn push(&mut self, outcome: DocumentOutcome) {
        self.counts.record(outcome.kind);
        self.outcomes.push(outcome);
    }

    /// Chunks written across all documents.
    pub fn chunks_written(&self) -> usize {
        self.outcomes.iter().map(|o| o.chunks).sum()
    }
}

/// Drives indexing runs against one store and one embedding provider.
pub struct Indexer {
    store: Arc<dyn RagAdminProvider>,
    embedder: Arc<dyn EmbeddingProvider>,
    options: IndexOptions,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn RagAdminProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        options: IndexOptions,
    ) -> Self {
        Self {
            store,
            embedder,
            options,
        }
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    /// Batch size actually used: the configured size, capped by the
    /// provider's limit, never below one.
    pub fn effective_batch_size(&self) -> usize {
        let configured = self.options.batch_size.max(1);
        match self.embedder.max_batch_size() {
            Some(limit) => configured.min(limit.max(1)),
            None => configured,
        }
    }

    /// Index `documents` and reconcile deletions.
    ///
    /// # Errors
    ///
    /// - [`IndexError::RunInProgress`] if another run holds the store.
    /// - [`IndexError::Storage`] if the store fails; documents reported
    ///   as added or updated in the partial result stay committed.
    pub async fn run(
        &self,
        documents: &[Document],
        config: &ChunkingConfig,
        progress: Option<ProgressCallback>,
        cancel: Option<CancellationToken>,
    ) -> Result<IndexResult, IndexError> {
        let claim = self
            .store
            .try_begin_run()
            .await
            .map_err(|source| IndexError::Storage {
                source,
                partial: Box::default(),
            })?;
        let Some(guard) = claim else {
            info!("store is held by another indexing run");
            return Err(IndexError::RunInProgress);
        };

        let result = self.run_claimed(documents, config, progress, cancel).await;
        guard.release().await;
        result
    }

    async fn run_claimed(
        &self,
        documents: &[Document],
        config: &ChunkingConfig,
        progress: Option<ProgressCallback>,
        cancel: Option<CancellationToken>,
    ) -> Result<IndexResult, IndexError> {
        let started = Instant::now();
        let total = documents.len();
        let reporter = Reporter { callback: progress };
        let mut result = IndexResult::default();
        let mut seen: HashSet<&str> = HashSet::with_capacity(total);

        info!(
            documents = total,
            model = self.embedder.model_name(),
            hard_limit = config.hard_limit(),
            "indexing run started"
        );
        reporter.emit(IndexPhase::Scanning, 0, total, None);

        for (position, doc) in documents.iter().enumerate() {
            if !result.cancelled && cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
                info!(completed = position, total, "indexing run cancelled");
                result.cancelled = true;
            }
            if result.cancelled {
                result.push(skipped(doc, "run cancelled"));
                continue;
            }
            if !seen.insert(doc.file_path.as_str()) {
                debug!(path = %doc.file_path, "duplicate path in document set");
                result.push(skipped(doc, "duplicate file path"));
                reporter.emit(
                    IndexPhase::Scanning,
                    position + 1,
                    total,
                    Some(doc.file_path.as_str()),
                );
                continue;
            }

            match self
                .index_document(doc, config, &reporter, position, total)
                .await
            {
                Ok(outcome) => result.push(outcome),
                Err(source) => {
                    warn!(path = %doc.file_path, error = %source, "storage failure, aborting run");
                    result.elapsed = started.elapsed();
                    return Err(IndexError::Storage {
                        source,
                        partial: Box::new(result),
                    });
                }
            }
            reporter.emit(
                IndexPhase::Scanning,
                position + 1,
                total,
                Some(doc.file_path.as_str()),
            );
        }

        if !result.cancelled {
            if let Err(source) = self.remove_vanished(&seen, &mut result).await {
                result.elapsed = started.elapsed();
                return Err(IndexError::Storage {
                    source,
                    partial: Box::new(result),
                });
            }
        }

        result.elapsed = started.elapsed();
        info!(
            added = result.counts.added,
            updated = result.counts.updated,
            unchanged = result.counts.unchanged,
            skipped = result.counts.skipped,
            failed = result.counts.failed,
            removed = result.removed.len(),
            cancelled = result.cancelled,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "indexing run finished"
        );
        Ok(result)
    }

    /// Process one document. Only storage errors escape; everything else
    /// becomes the document's outcome.
    async fn index_document(
        &self,
        doc: &Document,
        config: &ChunkingConfig,
        reporter: &Reporter,
        position: usize,
        total: usize,
    ) -> Result<DocumentOutcome, StorageError> {
        let checksum = ChecksumTracker::compute(doc.content.as_bytes());
        let stored = self.store.get_checksum(&doc.file_path).await?;
        let comparison = ChecksumTracker::compare(&checksum, stored.as_deref());
        if !comparison.changed {
            debug!(path = %doc.file_path, "unchanged");
            return Ok(outcome(doc, OutcomeKind::Unchanged, 0, None));
        }

        reporter.emit(IndexPhase::Chunking, position, total, Some(doc.file_path.as_str()));
        let chunking = match chunk_document(&doc.content, config) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %doc.file_path, error = %e, "chunking failed");
                return Ok(outcome(doc, OutcomeKind::Failed, 0, Some(e.to_string())));
            }
        };

        reporter.emit(IndexPhase::Embedding, position, total, Some(doc.file_path.as_str()));
        let texts: Vec<String> = chunking.chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = match self.embed_all(texts).await {
            Ok(v) => v,
            Err(e) => {
                warn!(path = %doc.file_path, error = %e, "embedding failed");
                return Ok(outcome(doc, OutcomeKind::Failed, 0, Some(e.to_string())));
            }
        };

        reporter.emit(IndexPhase::Storing, position, total, Some(doc.file_path.as_str()));
        let chunks: Vec<RagChunk> = chunking
            .chunks
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(ordinal, (raw, vector))| {
                let mut chunk = RagChunk::from_raw(doc, ordinal, raw, vector);
                chunk.checksum = checksum.clone();
                chunk
            })
            .collect();
        let indexed = IndexedDocument {
            file_path: doc.file_path.clone(),
            checksum,
            chunk_count: chunks.len(),
            embedding_model: self.embedder.model_name().to_string(),
            indexed_at: Utc::now(),
        };
        self.store.upsert_chunks(&indexed, &chunks).await?;

        let kind = if comparison.previously_indexed {
            OutcomeKind::Updated
        } else {
            OutcomeKind::Added
        };
        debug!(path = %doc.file_path, chunks = chunks.len(), ?kind, "indexed");
        Ok(outcome(doc, kind, chunks.len(), None))
    }

    /// Embed every text of one document, preserving order.
    async fn embed_all(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batch_size = self.effective_batch_size();
        let limiter = Arc::new(Semaphore::new(self.options.max_concurrent_batches.max(1)));
        let batches: Vec<Vec<String>> = texts.chunks(batch_size).map(|b| b.to_vec()).collect();
        let mut slots: Vec<Option<Vec<Vec<f32>>>> = vec![None; batches.len()];

        let mut tasks = JoinSet::new();
        for (idx, batch) in batches.into_iter().enumerate() {
            let embedder = Arc::clone(&self.embedder);
            let limiter = Arc::clone(&limiter);
            let options = self.options.clone();
            tasks.spawn(async move {
                let _permit = limiter
                    .acquire_owned()
                    .await
                    .map_err(|_| EmbeddingError::Provider("batch limiter closed".into()))?;
                let vectors = embed_with_retry(embedder.as_ref(), &batch, &options).await?;
                Ok::<_, EmbeddingError>((idx, vectors))
            });
        }

        // Returning early drops the JoinSet, which aborts the other batches.
        while let Some(joined) = tasks.join_next().await {
            let (idx, vectors) = joined
                .map_err(|e| EmbeddingError::Provider(format!("embedding task failed: {e}")))??;
            slots[idx] = Some(vectors);
        }

        Ok(slots.into_iter().flatten().flatten().collect())
    }

    async fn remove_vanished(
        &self,
        current: &HashSet<&str>,
        result: &mut IndexResult,
    ) -> Result<(), StorageError> {
        for path in self.store.list_file_paths().await? {
            if current.contains(path.as_str()) {
                continue;
            }
            let chunks = self.store.delete_by_file_path(&path).await?;
            debug!(path = %path, chunks, "removed vanished document");
            result.removed.push(path);
        }
        Ok(())
    }
}

/// One embedding call with deadline, response validation and retries.
async fn embed_with_retry(
    embedder: &dyn EmbeddingProvider,
    batch: &[String],
    options: &IndexOptions,
) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let max_attempts = options.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let response =
            match tokio::time::timeout(options.batch_timeout, embedder.embed_batch(batch)).await {
                Ok(r) => r.and_then(|vectors| {
                    validate_batch(&vectors, batch.len(), embedder.dims())?;
                    Ok(vectors)
                }),
                Err(_) => Err(EmbeddingError::Timeout(options.batch_timeout)),
            };

        match response {
            Ok(vectors) => return Ok(vectors),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                let delay = options.backoff_for(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "embedding batch failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

struct Reporter {
    callback: Option<ProgressCallback>,
}

impl Reporter {
    fn emit(&self, phase: IndexPhase, completed: usize, total: usize, path: Option<&str>) {
        if let Some(cb) = &self.callback {
            cb(&IndexProgress {
                phase,
                completed,
                total,
                current_path: path.map(str::to_string),
            });
        }
    }
}

fn outcome(
    doc: &Document,
    kind: OutcomeKind,
    chunks: usize,
    error: Option<String>,
) -> DocumentOutcome {
    DocumentOutcome {
        file_path: doc.file_path.clone(),
        kind,
        chunks,
        error,
    }
}

fn skipped(doc: &Document, reason: &str) -> DocumentOutcome {
    outcome(doc, OutcomeKind::Skipped, 0, Some(reason.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        let opts = IndexOptions {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(3),
            ..Default::default()
        };
        assert_eq!(opts.backoff_for(1), Duration::from_millis(500));
        assert_eq!(opts.backoff_for(2), Duration::from_millis(1000));
        assert_eq!(opts.backoff_for(3), Duration::from_millis(2000));
        assert_eq!(opts.backoff_for(4), Duration::from_secs(3));
        assert_eq!(opts.backoff_for(40), Duration::from_secs(3));
    }

    #[test]
    fn test_counts_follow_outcomes() {
        let mut r = IndexResult::default();
        let d = Document::new("a.md", "", Utc::now());
        r.push(outcome(&d, OutcomeKind::Added, 3, None));
        r.push(outcome(&d, OutcomeKind::Unchanged, 0, None));
        r.push(skipped(&d, "run cancelled"));
        assert_eq!(r.counts.added, 1);
        assert_eq!(r.counts.unchanged, 1);
        assert_eq!(r.counts.skipped, 1);
        assert_eq!(r.chunks_written(), 3);
    }
}
