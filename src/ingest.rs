//! `mdrag index` and `mdrag clear`.
//!
//! Discovery → [`RagService::index`] → summary on stdout. Ctrl-C cancels
//! the run at the next document boundary; documents already written stay
//! written.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use mdrag_core::chunk::chunk_document;
use mdrag_core::error::IndexError;
use mdrag_core::index::{IndexResult, OutcomeKind};
use mdrag_core::service::RagService;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::connector_fs;
use crate::embedding::{create_provider, DisabledProvider};
use crate::progress::ProgressMode;
use crate::sqlite_store::SqliteStore;

pub async fn run_index(config: &Config, dry_run: bool, progress: ProgressMode) -> Result<()> {
    if !dry_run && !config.embedding.is_enabled() {
        bail!("Indexing requires embeddings. Set [embedding] provider in config, or pass --dry-run.");
    }
    let chunking = config.chunking_config()?;
    let documents = connector_fs::scan_documents(&config.sources)?;

    if dry_run {
        let mut total_chunks = 0;
        let mut unsplittable = 0;
        for doc in &documents {
            match chunk_document(&doc.content, &chunking) {
                Ok(r) => total_chunks += r.chunks.len(),
                Err(e) => {
                    warn!(path = %doc.file_path, error = %e, "document would fail chunking");
                    unsplittable += 1;
                }
            }
        }
        println!("index {} (dry-run)", config.sources.root.display());
        println!("  documents found: {}", documents.len());
        println!("  estimated chunks: {}", total_chunks);
        if unsplittable > 0 {
            println!("  unsplittable: {}", unsplittable);
        }
        return Ok(());
    }

    let store = SqliteStore::open(config).await?;
    let embedder = create_provider(&config.embedding)?;
    let service = RagService::new(store, embedder, config.index_options());

    let cancel = CancellationToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupt received, stopping after the current document");
                cancel.cancel();
            }
        })
    };

    let outcome = service
        .index(&documents, &chunking, progress.callback(), Some(cancel))
        .await;
    watcher.abort();

    match outcome {
        Ok(result) => {
            print_summary(config, &result);
            if result.counts.failed > 0 {
                info!(failed = result.counts.failed, "some documents failed to index");
            }
            Ok(())
        }
        Err(err @ IndexError::Storage { .. }) => {
            if let Some(partial) = err.partial() {
                print_summary(config, partial);
            }
            Err(err).context("Indexing aborted by a storage failure")
        }
        Err(err) => Err(err.into()),
    }
}

fn print_summary(config: &Config, result: &IndexResult) {
    let c = &result.counts;
    println!("index {}", config.sources.root.display());
    println!("  documents: {}", result.outcomes.len());
    println!("  added: {}", c.added);
    println!("  updated: {}", c.updated);
    println!("  unchanged: {}", c.unchanged);
    if c.skipped > 0 {
        println!("  skipped: {}", c.skipped);
    }
    println!("  failed: {}", c.failed);
    println!("  removed: {}", result.removed.len());
    println!("  chunks written: {}", result.chunks_written());
    for o in result
        .outcomes
        .iter()
        .filter(|o| o.kind == OutcomeKind::Failed)
    {
        println!(
            "    ! {}: {}",
            o.file_path,
            o.error.as_deref().unwrap_or("unknown error")
        );
    }
    println!("  elapsed: {:.2}s", result.elapsed.as_secs_f64());
    if result.cancelled {
        println!("cancelled");
    } else {
        println!("ok");
    }
}

pub async fn run_clear(config: &Config) -> Result<()> {
    let store = SqliteStore::open(config).await?;
    let service = RagService::new(store, Arc::new(DisabledProvider), config.index_options());
    let before = service.stats().await?;
    service.clear().await?;
    println!(
        "cleared {} chunks from {} documents",
        before.total_chunks, before.total_resources
    );
    Ok(())
}
