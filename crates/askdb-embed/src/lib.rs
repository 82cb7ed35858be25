//! Embedding providers: a deterministic offline hashing embedder and an HTTP
//! client for OpenAI-compatible `/embeddings` endpoints.

use std::sync::Arc;

use askdb_core::config::{EmbeddingProviderKind, EmbeddingSettings};
use askdb_core::traits::EmbeddingProvider;
use askdb_core::Result;

pub mod hashing;
pub mod http;

pub use hashing::HashingEmbedder;
pub use http::HttpEmbeddingProvider;

/// Build the provider selected in settings.
pub fn provider_from_settings(settings: &EmbeddingSettings) -> Result<Arc<dyn EmbeddingProvider>> {
    match settings.provider {
        EmbeddingProviderKind::Hashing => {
            tracing::info!(dim = settings.dim, "using hashing embedder");
            Ok(Arc::new(HashingEmbedder::new(settings.dim)))
        }
        EmbeddingProviderKind::Http => {
            tracing::info!(url = %settings.url, model = %settings.model, "using http embedding provider");
            Ok(Arc::new(HttpEmbeddingProvider::new(settings)?))
        }
    }
}
