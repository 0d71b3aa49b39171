//! `mdrag query`: similarity search over indexed chunks.

use anyhow::{bail, Result};
use mdrag_core::models::{RagQuery, RagResult};
use mdrag_core::service::RagService;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::sqlite_store::SqliteStore;

/// Options collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct QueryArgs {
    pub limit: Option<usize>,
    pub min_score: Option<f32>,
    pub path_prefix: Option<String>,
    pub tags: Vec<String>,
    pub json: bool,
}

impl QueryArgs {
    pub fn to_query(&self, text: &str) -> RagQuery {
        let mut query = RagQuery::new(text);
        if let Some(limit) = self.limit {
            query = query.with_limit(limit);
        }
        query.min_score = self.min_score;
        query.file_path_prefix = self.path_prefix.clone();
        query.tags = self.tags.clone();
        query
    }
}

pub async fn run_query(config: &Config, text: &str, args: &QueryArgs) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Queries require embeddings. Set [embedding] provider in config.");
    }

    let store = SqliteStore::open(config).await?;
    let embedder = create_provider(&config.embedding)?;
    let service = RagService::new(store.clone(), embedder, config.index_options());

    let results = service.query(&args.to_query(text)).await?;
    store.pool().close().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }
    print_results(&results);
    Ok(())
}

fn print_results(results: &[RagResult]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }

    for (i, result) in results.iter().enumerate() {
        let title_display = result.title.as_deref().unwrap_or("(untitled)");
        println!(
            "{}. [{:.3}] {} / {}",
            i + 1,
            result.score,
            result.file_path,
            title_display
        );
        if let Some(ref heading) = result.heading_path {
            println!("    section: {}", heading);
        }
        println!("    lines: {}-{}", result.start_line, result.end_line);
        println!("    excerpt: \"{}\"", excerpt(&result.content, 240));
        println!("    id: {}", result.chunk_id);
        println!();
    }
}

/// First `max_chars` characters on one line.
fn excerpt(content: &str, max_chars: usize) -> String {
    let flat = content.replace('\n', " ");
    let trimmed = flat.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(max_chars).collect();
    cut.push('…');
    cut
}
