//! Progress events emitted by the indexer.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

/// Stage of an indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexPhase {
    Scanning,
    Chunking,
    Embedding,
    Storing,
}

impl fmt::Display for IndexPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexPhase::Scanning => "scanning",
            IndexPhase::Chunking => "chunking",
            IndexPhase::Embedding => "embedding",
            IndexPhase::Storing => "storing",
        };
        f.write_str(s)
    }
}

/// One progress event. `completed` counts documents already finished out of
/// `total` in the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexProgress {
    pub phase: IndexPhase,
    pub completed: usize,
    pub total: usize,
    #[serde(rename = "path")]
    pub current_path: Option<String>,
}

/// Observer for progress events. Called inline on the indexing task, so it
/// must return quickly.
pub type ProgressCallback = Arc<dyn Fn(&IndexProgress) + Send + Sync>;
