//! `mdrag stats`: what is indexed.
//!
//! Prints the [`RagStats`] summary plus a per-document breakdown (chunk
//! count, model, last indexed). `--json` emits the same data as one object.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use mdrag_core::models::{IndexedDocument, RagStats};
use mdrag_core::service::RagService;
use serde::Serialize;

use crate::config::Config;
use crate::embedding::DisabledProvider;
use crate::sqlite_store::{list_documents, SqliteStore};

#[derive(Serialize)]
struct StatsReport<'a> {
    database: String,
    size_bytes: u64,
    #[serde(flatten)]
    stats: &'a RagStats,
    documents: &'a [IndexedDocument],
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config, json: bool) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let service = RagService::new(
        store.clone(),
        Arc::new(DisabledProvider),
        config.index_options(),
    );

    let stats = service.stats().await?;
    let documents = list_documents(store.pool()).await?;
    store.pool().close().await;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    if json {
        let report = StatsReport {
            database: config.db.path.display().to_string(),
            size_bytes: db_size,
            stats: &stats,
            documents: &documents,
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    println!("mdrag index stats");
    println!("===================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", stats.total_resources);
    println!("  Chunks:      {}", stats.total_chunks);
    println!(
        "  Model:       {}",
        stats.embedding_model.as_deref().unwrap_or("(none)")
    );

    if !documents.is_empty() {
        println!();
        println!("  {:<48} {:>8}   {}", "DOCUMENT", "CHUNKS", "INDEXED");
        println!("  {}", "-".repeat(76));
        let now = Utc::now();
        for d in &documents {
            println!(
                "  {:<48} {:>8}   {}",
                d.file_path,
                d.chunk_count,
                format_relative(d.indexed_at, now)
            );
        }
    }

    println!();
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Relative time string (e.g. "3 hours ago"); absolute past 30 days.
fn format_relative(ts: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let delta = (now - ts).num_seconds();

    if delta < 0 {
        return ts.format("%Y-%m-%d %H:%M").to_string();
    }

    if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        ts.format("%Y-%m-%d %H:%M").to_string()
    }
}
