//! # mdrag
//!
//! Incremental, heading-aware indexing of markdown collections for
//! retrieval-augmented generation.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────┐   ┌──────────┐
//! │ Filesystem  │──▶│ Indexer (mdrag-core) │──▶│  SQLite   │
//! │  discovery  │   │ Chunk+Embed+Replace  │   │ rag_*     │
//! └─────────────┘   └──────────────────────┘   └────┬─────┘
//!                                                   │
//!                                              ┌────▼─────┐
//!                                              │   CLI    │
//!                                              │ (mdrag)  │
//!                                              └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! mdrag init                     # create database
//! mdrag index                    # chunk, embed and store changed documents
//! mdrag query "rollback steps" --limit 5
//! mdrag stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`connector_fs`] | Filesystem discovery and front matter |
//! | [`embedding`] | HTTP embedding providers |
//! | [`sqlite_store`] | SQLite storage backend |
//! | [`ingest`] | `index` and `clear` commands |
//! | [`search`] | `query` command |
//! | [`stats`] | `stats` command |
//! | [`progress`] | Progress output on stderr |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod config;
pub mod connector_fs;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod search;
pub mod sqlite_store;
pub mod stats;
