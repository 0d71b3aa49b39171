//! SQLite-backed [`RagAdminProvider`].
//!
//! A document's chunk set and checksum are replaced inside one transaction,
//! so readers on other connections see either the old set or the new one.
//! Similarity is brute-force cosine over the stored BLOB vectors.
//!
//! Indexing runs are serialized through the single-row `rag_run_lock`
//! table, which every process opening the same database file shares. The
//! holder refreshes its heartbeat while the run lasts; a row whose
//! heartbeat is older than [`STALE_AFTER`] belongs to a crashed process and
//! may be taken over.

use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use mdrag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use mdrag_core::error::StorageError;
use mdrag_core::models::{IndexedDocument, RagChunk, RagQuery, RagResult, RagStats};
use mdrag_core::store::{finalize_results, RagAdminProvider, RagQueryProvider, RunGuard};
use tracing::{debug, warn};

use crate::config::Config;
use crate::{db, migrate};

/// SQLite implementation of the store traits over the `rag_documents` and
/// `rag_chunks` tables.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and make sure the schema exists.
    pub async fn open(config: &Config) -> anyhow::Result<Arc<Self>> {
        let pool = db::connect(config)
            .await
            .with_context(|| format!("Failed to open database {}", config.db.path.display()))?;
        migrate::apply(&pool).await?;
        Ok(Arc::new(Self::new(pool)))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// Heartbeat age after which a run lock counts as abandoned.
pub const STALE_AFTER: Duration = Duration::from_secs(120);
const HEARTBEAT_EVERY: Duration = Duration::from_secs(30);

static RUN_SEQ: AtomicU64 = AtomicU64::new(0);

fn holder_token() -> String {
    format!(
        "{}:{}:{}",
        std::process::id(),
        Utc::now().timestamp_micros(),
        RUN_SEQ.fetch_add(1, Ordering::Relaxed)
    )
}

async fn release_run_lock(pool: SqlitePool, holder: String) {
    let released = sqlx::query("DELETE FROM rag_run_lock WHERE id = 1 AND holder = ?")
        .bind(&holder)
        .execute(&pool)
        .await;
    match released {
        Ok(_) => debug!(holder = %holder, "run lock released"),
        Err(e) => warn!(holder = %holder, error = %e, "failed to release run lock"),
    }
}

fn backend(err: impl Display) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn row_to_chunk(row: &SqliteRow) -> Result<RagChunk, StorageError> {
    let tags_json: String = row.try_get("tags_json").map_err(backend)?;
    let tags: Vec<String> = serde_json::from_str(&tags_json)
        .map_err(|e| StorageError::Corrupt(format!("tags_json: {e}")))?;
    let ordinal: i64 = row.try_get("ordinal").map_err(backend)?;
    let heading_level: Option<i64> = row.try_get("heading_level").map_err(backend)?;
    let start_line: i64 = row.try_get("start_line").map_err(backend)?;
    let end_line: i64 = row.try_get("end_line").map_err(backend)?;
    let blob: Vec<u8> = row.try_get("embedding").map_err(backend)?;

    Ok(RagChunk {
        id: row.try_get("id").map_err(backend)?,
        file_path: row.try_get("file_path").map_err(backend)?,
        ordinal: ordinal as usize,
        content: row.try_get("content").map_err(backend)?,
        content_hash: row.try_get("content_hash").map_err(backend)?,
        heading_path: row.try_get("heading_path").map_err(backend)?,
        heading_level: heading_level.map(|l| l as u8),
        start_line: start_line as usize,
        end_line: end_line as usize,
        synthetic_split: row.try_get("synthetic_split").map_err(backend)?,
        title: row.try_get("title").map_err(backend)?,
        tags,
        doc_type: row.try_get("doc_type").map_err(backend)?,
        checksum: row.try_get("checksum").map_err(backend)?,
        embedding: blob_to_vec(&blob),
    })
}

#[async_trait]
impl RagQueryProvider for SqliteStore {
    async fn query(
        &self,
        query: &RagQuery,
        query_vec: &[f32],
    ) -> Result<Vec<RagResult>, StorageError> {
        let prefix = query.file_path_prefix.clone().unwrap_or_default();
        let rows = sqlx::query(
            r#"
            SELECT id, file_path, ordinal, content, content_hash, heading_path,
                   heading_level, start_line, end_line, synthetic_split, title,
                   doc_type, tags_json, checksum, embedding
            FROM rag_chunks
            WHERE substr(file_path, 1, length(?1)) = ?1
            "#,
        )
        .bind(&prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut results = Vec::new();
        for row in &rows {
            let chunk = row_to_chunk(row)?;
            if !query.matches(&chunk) {
                continue;
            }
            let score = cosine_similarity(query_vec, &chunk.embedding);
            results.push(RagResult::from_chunk(&chunk, score));
        }
        Ok(finalize_results(results, query))
    }
}

#[async_trait]
impl RagAdminProvider for SqliteStore {
    async fn try_begin_run(&self) -> Result<Option<RunGuard>, StorageError> {
        let holder = holder_token();
        let now = Utc::now().timestamp();
        let stale_before = now - STALE_AFTER.as_secs() as i64;
        let claimed = sqlx::query(
            r#"
            INSERT INTO rag_run_lock (id, holder, heartbeat_at) VALUES (1, ?1, ?2)
            ON CONFLICT(id) DO UPDATE SET holder = excluded.holder, heartbeat_at = excluded.heartbeat_at
            WHERE rag_run_lock.heartbeat_at < ?3
            "#,
        )
        .bind(&holder)
        .bind(now)
        .bind(stale_before)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        if claimed.rows_affected() == 0 {
            return Ok(None);
        }
        debug!(holder = %holder, "run lock acquired");

        let heartbeat = {
            let pool = self.pool.clone();
            let holder = holder.clone();
            tokio::spawn(async move {
                let mut ticks = tokio::time::interval(HEARTBEAT_EVERY);
                ticks.tick().await;
                loop {
                    ticks.tick().await;
                    let beat = sqlx::query(
                        "UPDATE rag_run_lock SET heartbeat_at = ? WHERE id = 1 AND holder = ?",
                    )
                    .bind(Utc::now().timestamp())
                    .bind(&holder)
                    .execute(&pool)
                    .await;
                    if let Err(e) = beat {
                        warn!(holder = %holder, error = %e, "run lock heartbeat failed");
                    }
                }
            })
        };

        let pool = self.pool.clone();
        Ok(Some(RunGuard::new(async move {
            heartbeat.abort();
            release_run_lock(pool, holder).await;
        })))
    }

    async fn upsert_chunks(
        &self,
        doc: &IndexedDocument,
        chunks: &[RagChunk],
    ) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        sqlx::query("DELETE FROM rag_chunks WHERE file_path = ?")
            .bind(&doc.file_path)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;

        sqlx::query(
            r#"
            INSERT INTO rag_documents (file_path, checksum, chunk_count, embedding_model, indexed_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(file_path) DO UPDATE SET
                checksum = excluded.checksum,
                chunk_count = excluded.chunk_count,
                embedding_model = excluded.embedding_model,
                indexed_at = excluded.indexed_at
            "#,
        )
        .bind(&doc.file_path)
        .bind(&doc.checksum)
        .bind(doc.chunk_count as i64)
        .bind(&doc.embedding_model)
        .bind(doc.indexed_at.timestamp())
        .execute(&mut *tx)
        .await
        .map_err(backend)?;

        for chunk in chunks {
            if chunk.file_path != doc.file_path {
                return Err(StorageError::Backend(format!(
                    "chunk {} belongs to {}, not {}",
                    chunk.id, chunk.file_path, doc.file_path
                )));
            }
            let tags_json = serde_json::to_string(&chunk.tags).map_err(backend)?;
            sqlx::query(
                r#"
                INSERT INTO rag_chunks (id, file_path, ordinal, content, content_hash,
                                        heading_path, heading_level, start_line, end_line,
                                        synthetic_split, title, doc_type, tags_json,
                                        checksum, embedding)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.file_path)
            .bind(chunk.ordinal as i64)
            .bind(&chunk.content)
            .bind(&chunk.content_hash)
            .bind(&chunk.heading_path)
            .bind(chunk.heading_level.map(i64::from))
            .bind(chunk.start_line as i64)
            .bind(chunk.end_line as i64)
            .bind(chunk.synthetic_split)
            .bind(&chunk.title)
            .bind(&chunk.doc_type)
            .bind(tags_json)
            .bind(&chunk.checksum)
            .bind(vec_to_blob(&chunk.embedding))
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        // Dropping `tx` on an early return rolls back.
        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn delete_by_file_path(&self, file_path: &str) -> Result<u64, StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        let removed = sqlx::query("DELETE FROM rag_chunks WHERE file_path = ?")
            .bind(file_path)
            .execute(&mut *tx)
            .await
            .map_err(backend)?
            .rows_affected();
        sqlx::query("DELETE FROM rag_documents WHERE file_path = ?")
            .bind(file_path)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)?;
        Ok(removed)
    }

    async fn get_checksum(&self, file_path: &str) -> Result<Option<String>, StorageError> {
        sqlx::query_scalar("SELECT checksum FROM rag_documents WHERE file_path = ?")
            .bind(file_path)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)
    }

    async fn list_file_paths(&self) -> Result<Vec<String>, StorageError> {
        sqlx::query_scalar("SELECT file_path FROM rag_documents ORDER BY file_path")
            .fetch_all(&self.pool)
            .await
            .map_err(backend)
    }

    async fn clear(&self) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;
        sqlx::query("DELETE FROM rag_chunks")
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        sqlx::query("DELETE FROM rag_documents")
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        tx.commit().await.map_err(backend)
    }

    async fn get_stats(&self) -> Result<RagStats, StorageError> {
        let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rag_chunks")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        let total_resources: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rag_documents")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        let embedding_model: Option<String> = sqlx::query_scalar(
            "SELECT embedding_model FROM rag_documents ORDER BY indexed_at DESC, file_path LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(RagStats {
            total_chunks: total_chunks as usize,
            total_resources: total_resources as usize,
            embedding_model,
        })
    }
}

/// Per-document bookkeeping rows, for `stats --json` detail output.
pub async fn list_documents(pool: &SqlitePool) -> Result<Vec<IndexedDocument>, StorageError> {
    let rows = sqlx::query(
        "SELECT file_path, checksum, chunk_count, embedding_model, indexed_at \
         FROM rag_documents ORDER BY file_path",
    )
    .fetch_all(pool)
    .await
    .map_err(backend)?;

    rows.iter()
        .map(|row| {
            let chunk_count: i64 = row.try_get("chunk_count").map_err(backend)?;
            let indexed_at: i64 = row.try_get("indexed_at").map_err(backend)?;
            Ok(IndexedDocument {
                file_path: row.try_get("file_path").map_err(backend)?,
                checksum: row.try_get("checksum").map_err(backend)?,
                chunk_count: chunk_count as usize,
                embedding_model: row.try_get("embedding_model").map_err(backend)?,
                indexed_at: DateTime::from_timestamp(indexed_at, 0).ok_or_else(|| {
                    StorageError::Corrupt(format!("indexed_at out of range: {indexed_at}"))
                })?,
            })
        })
        .collect()
}
