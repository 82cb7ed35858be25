//! `SearchBackend` over the local Tantivy and flat vector indexes.
//!
//! Tantivy searches are synchronous, so they run on the blocking pool; the
//! vector index moves its own scan there. Every
//! call carries its own deadline and reports a miss of that deadline as
//! `SearchError::Timeout`; the index error text is kept out of the error kind.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use askdb_core::config::{resolve_with_base, SearchSettings};
use askdb_core::error::SearchError;
use askdb_core::traits::SearchBackend;
use askdb_core::types::{EmbeddingVector, SearchFilters, SearchHit};
use askdb_text::TextIndex;
use askdb_vector::FlatVectorIndex;

pub struct IndexSearchBackend {
    text: Arc<TextIndex>,
    vector: Option<Arc<FlatVectorIndex>>,
    lexical_timeout: Duration,
    vector_timeout: Duration,
}

impl IndexSearchBackend {
    pub fn new(text: Arc<TextIndex>, vector: Option<Arc<FlatVectorIndex>>, settings: &SearchSettings) -> Self {
        Self { text, vector, lexical_timeout: settings.lexical_timeout(), vector_timeout: settings.vector_timeout() }
    }

    /// Open the on-disk indexes named in `settings`, relative to `base`.
    /// A missing vector file leaves the backend lexical-only.
    pub async fn open(settings: &SearchSettings, base: &Path) -> Result<Self> {
        let index_dir = resolve_with_base(base, &settings.index_dir);
        let text = Arc::new(TextIndex::open(&index_dir)?);
        let vector_path = resolve_with_base(base, &settings.vector_path);
        let vector = if vector_path.exists() {
            Some(Arc::new(FlatVectorIndex::load(&vector_path).await?))
        } else {
            warn!(path = %vector_path.display(), "no vector index, vector search disabled");
            None
        };
        info!(text_docs = text.num_docs(), vector = vector.is_some(), "search backend opened");
        Ok(Self::new(text, vector, settings))
    }
}

#[async_trait]
impl SearchBackend for IndexSearchBackend {
    fn name(&self) -> &str { "local-index" }

    async fn search_lexical(&self, text: &str, top_k: usize, filters: &SearchFilters) -> Result<Vec<SearchHit>, SearchError> {
        let index = Arc::clone(&self.text);
        let query = text.to_string();
        let filters = filters.clone();
        let task = tokio::task::spawn_blocking(move || index.search(&query, top_k, &filters));
        match tokio::time::timeout(self.lexical_timeout, task).await {
            Err(_) => Err(SearchError::Timeout(self.lexical_timeout)),
            Ok(Err(join)) => Err(SearchError::BackendUnavailable(format!("lexical search task: {join}"))),
            Ok(Ok(Err(e))) => Err(SearchError::BackendUnavailable(format!("{e:#}"))),
            Ok(Ok(Ok(hits))) => Ok(hits),
        }
    }

    async fn search_vector(&self, vector: &EmbeddingVector, top_k: usize, filters: &SearchFilters) -> Result<Vec<SearchHit>, SearchError> {
        let Some(index) = &self.vector else {
            return Err(SearchError::BackendUnavailable("vector index not loaded".into()));
        };
        match tokio::time::timeout(self.vector_timeout, index.search(&vector.dims, top_k, filters)).await {
            Err(_) => Err(SearchError::Timeout(self.vector_timeout)),
            Ok(Err(e)) => Err(SearchError::BackendUnavailable(format!("{e:#}"))),
            Ok(Ok(hits)) => Ok(hits),
        }
    }

    async fn ping(&self) -> Result<(), SearchError> {
        if self.text.num_docs() == 0 {
            return Err(SearchError::BackendUnavailable("lexical index is empty".into()));
        }
        Ok(())
    }
}
