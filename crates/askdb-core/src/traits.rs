use async_trait::async_trait;
use std::time::Duration;

use crate::error::{CacheError, EmbedError, GenerationError, SearchError};
use crate::stream::GenerationStream;
use crate::types::{EmbeddingVector, GenerationParams, Prompt, SearchFilters, SearchHit};

/// Counters reported by cache implementations that keep them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: u64,
}

/// Process-wide key/value store with per-entry TTL.
///
/// `get` returns `None` for never-set and for expired keys alike. Both calls
/// must be safe under concurrent use and must report unreachable storage as
/// an error instead of blocking.
#[async_trait]
pub trait CacheStore: Send + Sync {
    fn name(&self) -> &str;
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;
    async fn put(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
    async fn ping(&self) -> Result<(), CacheError> { Ok(()) }
    fn stats(&self) -> Option<CacheStats> { None }
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Stable identifier for the provider/model.
    fn name(&self) -> &str;
    /// Embedding dimensionality.
    fn dim(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbedError>;
    async fn ping(&self) -> Result<(), EmbedError> { self.embed("ping").await.map(|_| ()) }
}

/// Read-only lexical and vector search over one document collection.
///
/// Each call returns at most `top_k` hits in the backend's own score order.
#[async_trait]
pub trait SearchBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn search_lexical(&self, text: &str, top_k: usize, filters: &SearchFilters) -> Result<Vec<SearchHit>, SearchError>;
    async fn search_vector(&self, vector: &EmbeddingVector, top_k: usize, filters: &SearchFilters) -> Result<Vec<SearchHit>, SearchError>;
    async fn ping(&self) -> Result<(), SearchError> { Ok(()) }
}

/// Streams generated text for a prompt; see [`crate::stream`] for the state machine.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;
    async fn start(&self, prompt: &Prompt, params: &GenerationParams) -> Result<GenerationStream, GenerationError>;
    async fn ping(&self) -> Result<(), GenerationError> { Ok(()) }
}
