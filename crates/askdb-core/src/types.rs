//! Domain types shared by retrieval, fusion, assembly and generation.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub type DocId = String;
pub type Meta = HashMap<String, String>;

/// Metadata key holding the full passage text of a hit.
pub const META_TEXT: &str = "text";
/// Metadata key holding the source URL of a hit.
pub const META_URL: &str = "url";
/// Metadata key holding the title of the parent document.
pub const META_TITLE: &str = "title";

/// A validated, immutable question as it flows through the pipeline.
///
/// Built once at ingress by [`crate::query::QueryRequest::validate`]; nothing
/// downstream mutates it. `text` is the preprocessed form used for retrieval,
/// `raw_text` is what the caller sent and what the generator is asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub raw_text: String,
    pub text: String,
    pub top_k: usize,
    pub use_hybrid: bool,
    pub model_hint: String,
    pub categories: BTreeSet<String>,
}

impl Query {
    pub fn filters(&self) -> SearchFilters {
        SearchFilters { categories: self.categories.clone() }
    }
}

/// Query embedding plus the digest of the normalized text it was computed from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    pub dims: Vec<f32>,
    pub source_hash: String,
}

impl EmbeddingVector {
    pub fn len(&self) -> usize { self.dims.len() }

    pub fn is_empty(&self) -> bool { self.dims.is_empty() }
}

/// A chunk of a source document that is independently indexed.
///
/// - `id`: globally unique chunk identifier, reported as `doc_id` on hits
/// - `doc_id`: stable identity of the parent document
/// - `title`/`url`: carried through to response sources
/// - `categories`: filter labels (e.g. `cs.AI`)
/// - `chunk_index`/`total_chunks`: position within the parent document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunk {
    pub id: String,
    pub doc_id: String,
    pub title: String,
    pub url: String,
    pub categories: Vec<String>,
    pub content: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// Indicates which retrieval path produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Lexical,
    Vector,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Lexical => "lexical",
            SourceKind::Vector => "vector",
        }
    }
}

/// Filters applied identically to lexical and vector search.
///
/// A hit matches when any of its categories is in `categories`; an empty set
/// disables filtering.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub categories: BTreeSet<String>,
}

impl SearchFilters {
    pub fn is_empty(&self) -> bool { self.categories.is_empty() }

    pub fn matches<S: AsRef<str>>(&self, categories: &[S]) -> bool {
        self.categories.is_empty() || categories.iter().any(|c| self.categories.contains(c.as_ref()))
    }
}

/// One result from one backend call. `score` is backend-specific, higher is better.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub doc_id: DocId,
    pub score: f32,
    pub source: SourceKind,
    pub snippet: String,
    #[serde(default)]
    pub metadata: Meta,
}

impl SearchHit {
    /// Full passage text if the backend supplied it, otherwise the snippet.
    pub fn passage(&self) -> &str {
        self.metadata.get(META_TEXT).map(String::as_str).unwrap_or(&self.snippet)
    }
}

/// A fused result; `doc_id` is unique within one fused list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedHit {
    pub doc_id: DocId,
    pub fused_score: f32,
    pub contributing_sources: BTreeSet<SourceKind>,
    pub snippet: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Meta,
}

impl FusedHit {
    pub fn url(&self) -> &str { self.metadata.get(META_URL).map(String::as_str).unwrap_or("") }

    pub fn title(&self) -> &str { self.metadata.get(META_TITLE).map(String::as_str).unwrap_or("") }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub doc_id: DocId,
    pub text: String,
    pub title: String,
    pub url: String,
    pub score: f32,
    pub tokens: usize,
}

/// Passages selected for the prompt. `used_tokens <= token_budget` always holds
/// and passages keep descending fused-score order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextWindow {
    pub passages: Vec<Passage>,
    pub token_budget: usize,
    pub used_tokens: usize,
}

impl ContextWindow {
    pub fn empty(token_budget: usize) -> Self {
        Self { passages: Vec::new(), token_budget, used_tokens: 0 }
    }

    pub fn is_empty(&self) -> bool { self.passages.is_empty() }

    pub fn len(&self) -> usize { self.passages.len() }
}

/// One piece of streamed generator output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationChunk {
    pub sequence_no: u64,
    pub text: String,
    pub is_final: bool,
}

/// Per-request generation parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: usize,
}

/// A rendered prompt plus the passages it was built from.
///
/// `grounded` is false when the context window was empty and the prompt asks
/// the model to say that no supporting passages were found.
#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub question: String,
    pub text: String,
    pub passages: Vec<Passage>,
    pub grounded: bool,
}
