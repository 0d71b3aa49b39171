//! Data types that flow through the indexing and query pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::checksum::ChecksumTracker;

/// Namespace for deterministic chunk ids.
const CHUNK_ID_NAMESPACE: Uuid = Uuid::from_u128(0x6d64_7261_675f_4348_554e_4b5f_4944_0001);

/// A document handed to the core by the discovery collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Unique key of the document (relative path for filesystem sources).
    pub file_path: String,
    pub content: String,
    /// SHA-256 hex of `content`.
    pub checksum: String,
    pub modified_at: DateTime<Utc>,
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub doc_type: Option<String>,
}

impl Document {
    /// Build a document and compute its checksum.
    pub fn new(
        file_path: impl Into<String>,
        content: impl Into<String>,
        modified_at: DateTime<Utc>,
    ) -> Self {
        let content = content.into();
        let checksum = ChecksumTracker::compute(content.as_bytes());
        Self {
            file_path: file_path.into(),
            content,
            checksum,
            modified_at,
            title: None,
            tags: Vec::new(),
            doc_type: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_doc_type(mut self, doc_type: impl Into<String>) -> Self {
        self.doc_type = Some(doc_type.into());
        self
    }
}

/// A chunk produced by the chunker, before ids and embeddings are attached.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RawChunk {
    pub content: String,
    /// Enclosing heading titles joined with `" > "`.
    pub heading_path: Option<String>,
    /// Level (1–6) of the nearest enclosing heading.
    pub heading_level: Option<u8>,
    /// First source line consumed (1-based, inclusive).
    pub start_line: usize,
    /// Last source line consumed (1-based, inclusive).
    pub end_line: usize,
    /// Set when the chunk was cut inside a single line (sentence or
    /// character window) rather than at a paragraph or line boundary.
    pub synthetic_split: bool,
}

/// A persisted chunk with its embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagChunk {
    pub id: String,
    pub file_path: String,
    pub ordinal: usize,
    pub content: String,
    /// SHA-256 hex of `content`.
    pub content_hash: String,
    pub heading_path: Option<String>,
    pub heading_level: Option<u8>,
    pub start_line: usize,
    pub end_line: usize,
    pub synthetic_split: bool,
    pub title: Option<String>,
    pub tags: Vec<String>,
    pub doc_type: Option<String>,
    /// Checksum of the owning document at indexing time.
    pub checksum: String,
    pub embedding: Vec<f32>,
}

impl RagChunk {
    /// Attach identity, document metadata and an embedding to a raw chunk.
    pub fn from_raw(doc: &Document, ordinal: usize, raw: RawChunk, embedding: Vec<f32>) -> Self {
        let content_hash = ChecksumTracker::compute(raw.content.as_bytes());
        Self {
            id: chunk_id(&doc.file_path, ordinal, &content_hash),
            file_path: doc.file_path.clone(),
            ordinal,
            content: raw.content,
            content_hash,
            heading_path: raw.heading_path,
            heading_level: raw.heading_level,
            start_line: raw.start_line,
            end_line: raw.end_line,
            synthetic_split: raw.synthetic_split,
            title: doc.title.clone(),
            tags: doc.tags.clone(),
            doc_type: doc.doc_type.clone(),
            checksum: doc.checksum.clone(),
            embedding,
        }
    }
}

/// Deterministic chunk id: a UUIDv5 over `(file_path, ordinal, content_hash)`.
///
/// Re-indexing identical content yields identical ids, so repeated runs
/// never produce duplicate rows.
pub fn chunk_id(file_path: &str, ordinal: usize, content_hash: &str) -> String {
    let name = format!("{}\0{}\0{}", file_path, ordinal, content_hash);
    Uuid::new_v5(&CHUNK_ID_NAMESPACE, name.as_bytes()).to_string()
}

/// Per-document bookkeeping stored next to the chunks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexedDocument {
    pub file_path: String,
    pub checksum: String,
    pub chunk_count: usize,
    pub embedding_model: String,
    pub indexed_at: DateTime<Utc>,
}

/// A similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct RagQuery {
    pub text: String,
    pub limit: usize,
    /// Drop results scoring below this similarity.
    pub min_score: Option<f32>,
    /// Only consider chunks whose file path starts with this prefix.
    pub file_path_prefix: Option<String>,
    /// Only consider chunks carrying every one of these tags.
    pub tags: Vec<String>,
}

impl RagQuery {
    pub const DEFAULT_LIMIT: usize = 10;

    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            limit: Self::DEFAULT_LIMIT,
            min_score: None,
            file_path_prefix: None,
            tags: Vec::new(),
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    /// Whether a stored chunk passes the path and tag filters.
    pub fn matches(&self, chunk: &RagChunk) -> bool {
        if let Some(prefix) = &self.file_path_prefix {
            if !chunk.file_path.starts_with(prefix.as_str()) {
                return false;
            }
        }
        self.tags.iter().all(|t| chunk.tags.contains(t))
    }
}

/// A ranked query hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RagResult {
    pub chunk_id: String,
    pub file_path: String,
    pub content: String,
    pub heading_path: Option<String>,
    pub start_line: usize,
    pub end_line: usize,
    pub title: Option<String>,
    pub score: f32,
}

impl RagResult {
    pub fn from_chunk(chunk: &RagChunk, score: f32) -> Self {
        Self {
            chunk_id: chunk.id.clone(),
            file_path: chunk.file_path.clone(),
            content: chunk.content.clone(),
            heading_path: chunk.heading_path.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            title: chunk.title.clone(),
            score,
        }
    }
}

/// Read-only summary of persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct RagStats {
    pub total_chunks: usize,
    pub total_resources: usize,
    pub embedding_model: Option<String>,
}
