//! Response shapes of the ask, streaming ask and search operations.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use askdb_core::PublicError;

pub const MODE_HYBRID: &str = "hybrid";
pub const MODE_BM25: &str = "bm25";

/// Answer used when retrieval finds nothing; generation is not invoked.
pub const NO_RESULTS_ANSWER: &str = "No relevant documents were found for this question.";

/// Stage keys of the timing map. Stages that did not run report 0.
pub const TIMING_KEYS: [&str; 7] = ["embedding", "lexical_search", "vector_search", "fusion", "assembly", "generation", "total"];

pub type TimingMs = BTreeMap<String, u64>;

pub fn empty_timings() -> TimingMs { TIMING_KEYS.iter().map(|k| (k.to_string(), 0)).collect() }

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Source {
    pub doc_id: String,
    pub url: String,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<Source>,
    pub chunks_used: usize,
    pub timing_ms: TimingMs,
    pub search_mode: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub doc_id: String,
    pub score: f32,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    pub hits: Vec<SearchResult>,
    pub search_mode: String,
    pub timing_ms: TimingMs,
}

/// One server-pushed event of a streaming ask. A stream carries any number
/// of `Chunk`s followed by exactly one `Done` or `Error`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    Chunk {
        text: String,
    },
    Done {
        sources: Vec<Source>,
        chunks_used: usize,
        search_mode: String,
        timing_ms: TimingMs,
    },
    Error {
        #[serde(flatten)]
        error: PublicError,
    },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool { !matches!(self, StreamEvent::Chunk { .. }) }
}
