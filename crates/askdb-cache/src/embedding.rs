//! Typed embedding cache over any [`CacheStore`].
//!
//! Keys are `embedding:<source_hash>`, values the JSON form of
//! [`EmbeddingVector`]. Every store call is bounded by `op_timeout`; a stalled
//! store surfaces as [`CacheError::Timeout`] and the caller decides how to
//! degrade.

use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use askdb_core::config::CacheSettings;
use askdb_core::error::CacheError;
use askdb_core::traits::{CacheStats, CacheStore};
use askdb_core::types::EmbeddingVector;

const KEY_PREFIX: &str = "embedding:";

pub fn key_for(source_hash: &str) -> String { format!("{KEY_PREFIX}{source_hash}") }

#[derive(Clone)]
pub struct EmbeddingCache {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    op_timeout: Duration,
}

impl EmbeddingCache {
    pub fn new(store: Arc<dyn CacheStore>, settings: &CacheSettings) -> Self {
        Self { store, ttl: settings.ttl(), op_timeout: settings.op_timeout() }
    }

    pub fn store_name(&self) -> &str { self.store.name() }

    pub fn stats(&self) -> Option<CacheStats> { self.store.stats() }

    pub async fn ping(&self) -> Result<(), CacheError> {
        tokio::time::timeout(self.op_timeout, self.store.ping())
            .await
            .map_err(|_| CacheError::Timeout(self.op_timeout))?
    }

    /// Cached vector for `source_hash`. Undecodable entries read as a miss.
    pub async fn get(&self, source_hash: &str) -> Result<Option<EmbeddingVector>, CacheError> {
        let key = key_for(source_hash);
        let raw = tokio::time::timeout(self.op_timeout, self.store.get(&key))
            .await
            .map_err(|_| CacheError::Timeout(self.op_timeout))??;
        let Some(raw) = raw else { return Ok(None) };
        match serde_json::from_str::<EmbeddingVector>(&raw) {
            Ok(vector) if vector.source_hash == source_hash => Ok(Some(vector)),
            Ok(_) => {
                warn!(key = %key, "cached embedding has a mismatched hash");
                Ok(None)
            }
            Err(e) => {
                warn!(key = %key, error = %e, "cached embedding is not decodable");
                Ok(None)
            }
        }
    }

    pub async fn put(&self, vector: &EmbeddingVector) -> Result<(), CacheError> {
        let value = serde_json::to_string(vector).map_err(|e| CacheError::Unavailable(e.to_string()))?;
        tokio::time::timeout(self.op_timeout, self.store.put(&key_for(&vector.source_hash), value, self.ttl))
            .await
            .map_err(|_| CacheError::Timeout(self.op_timeout))?
    }
}
