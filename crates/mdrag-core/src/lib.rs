//! # mdrag core
//!
//! Indexing logic for markdown retrieval-augmented generation: token
//! counting, heading-aware chunking, checksums, provider traits, an
//! in-memory store and the incremental indexing orchestrator.
//!
//! This crate does no filesystem, network or database I/O. Concrete
//! embedding providers, the SQLite store and discovery live in the `mdrag`
//! application crate.
//!
//! ```rust
//! use std::sync::Arc;
//! use mdrag_core::chunk::{chunk_document, ChunkingConfig};
//! use mdrag_core::tokens::ByteLengthCounter;
//!
//! let config = ChunkingConfig::new(3, 6, 1.0, None, Arc::new(ByteLengthCounter)).unwrap();
//! let result = chunk_document("# A\n\nfoo bar baz\n\n## B\n\nqux quux", &config).unwrap();
//! assert_eq!(result.chunks.len(), 2);
//! assert_eq!(result.chunks[1].heading_path.as_deref(), Some("A > B"));
//! ```

pub mod checksum;
pub mod chunk;
pub mod embedding;
pub mod error;
pub mod index;
pub mod models;
pub mod progress;
pub mod service;
pub mod store;
pub mod tokens;
