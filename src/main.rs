//! # mdrag CLI
//!
//! ```bash
//! mdrag --config ./config/mdrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `mdrag init` | Create the SQLite database and run schema migrations |
//! | `mdrag index` | Chunk, embed and store new or changed documents |
//! | `mdrag query "<text>"` | Similarity search over indexed chunks |
//! | `mdrag clear` | Remove every chunk and checksum |
//! | `mdrag stats` | Show what is indexed |

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use mdrag::progress::ProgressMode;
use mdrag::search::QueryArgs;
use mdrag::{config, ingest, logging, migrate, search, stats};

/// mdrag: heading-aware markdown indexing for retrieval-augmented generation.
#[derive(Parser)]
#[command(
    name = "mdrag",
    about = "Heading-aware markdown indexing for retrieval-augmented generation",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/mdrag.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Creates the SQLite database file and the `rag_documents` and
    /// `rag_chunks` tables. Safe to run more than once.
    Init,

    /// Index the configured sources.
    ///
    /// Only documents whose content changed since the last run are chunked
    /// and embedded; documents that disappeared are removed. Ctrl-C stops
    /// after the current document.
    Index {
        /// Show document and estimated chunk counts without writing anything.
        #[arg(long)]
        dry_run: bool,

        /// Progress output on stderr. Defaults to `human` on a terminal,
        /// `off` otherwise.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,
    },

    /// Similarity search over indexed chunks.
    Query {
        /// The query text.
        text: String,

        /// Maximum number of results.
        #[arg(long)]
        limit: Option<usize>,

        /// Drop results scoring below this cosine similarity.
        #[arg(long)]
        min_score: Option<f32>,

        /// Only search documents whose path starts with this prefix.
        #[arg(long)]
        path_prefix: Option<String>,

        /// Only search documents carrying this tag (repeatable; all must match).
        #[arg(long = "tag")]
        tags: Vec<String>,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Remove all indexed chunks and checksums.
    Clear,

    /// Show index statistics.
    Stats {
        /// Print statistics as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    logging::init(&cfg.logging);

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Index { dry_run, progress } => {
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            ingest::run_index(&cfg, dry_run, mode).await?;
        }
        Commands::Query {
            text,
            limit,
            min_score,
            path_prefix,
            tags,
            json,
        } => {
            let args = QueryArgs {
                limit,
                min_score,
                path_prefix,
                tags,
                json,
            };
            search::run_query(&cfg, &text, &args).await?;
        }
        Commands::Clear => {
            ingest::run_clear(&cfg).await?;
        }
        Commands::Stats { json } => {
            stats::run_stats(&cfg, json).await?;
        }
    }

    Ok(())
}
