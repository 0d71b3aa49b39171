use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema on an open pool. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // One row per indexed document; the checksum drives incremental runs
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rag_documents (
            file_path TEXT PRIMARY KEY,
            checksum TEXT NOT NULL,
            chunk_count INTEGER NOT NULL,
            embedding_model TEXT NOT NULL,
            indexed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rag_chunks (
            id TEXT PRIMARY KEY,
            file_path TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            content TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            heading_path TEXT,
            heading_level INTEGER,
            start_line INTEGER NOT NULL,
            end_line INTEGER NOT NULL,
            synthetic_split INTEGER NOT NULL DEFAULT 0,
            title TEXT,
            doc_type TEXT,
            tags_json TEXT NOT NULL DEFAULT '[]',
            checksum TEXT NOT NULL,
            embedding BLOB NOT NULL,
            UNIQUE(file_path, ordinal),
            FOREIGN KEY (file_path) REFERENCES rag_documents(file_path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_rag_chunks_file_path ON rag_chunks(file_path)")
        .execute(pool)
        .await?;

    // At most one row: the indexing run currently holding the database
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS rag_run_lock (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            holder TEXT NOT NULL,
            heartbeat_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
