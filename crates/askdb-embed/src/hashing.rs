use async_trait::async_trait;
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

use askdb_core::error::EmbedError;
use askdb_core::normalize::source_hash;
use askdb_core::traits::EmbeddingProvider;
use askdb_core::types::EmbeddingVector;

/// Feature-hashing embedder. Each lower-cased token lands in one bucket, so
/// texts sharing vocabulary get a positive cosine similarity. Deterministic
/// and dependency free, which makes it the default for offline use and tests.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self { Self { dim: dim.max(1) } }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        let tokens = text
            .split_whitespace()
            .map(|t| t.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase())
            .filter(|t| !t.is_empty());
        for (i, token) in tokens.enumerate() {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h as usize) % self.dim;
            let val = (((h >> 32) as u32) as f32) / (u32::MAX as f32);
            v[idx] += 0.5 + val + (i as f32 % 3.0) * 0.01;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v {
            *x /= norm;
        }
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn name(&self) -> &str { "hashing" }

    fn dim(&self) -> usize { self.dim }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbedError> {
        Ok(EmbeddingVector { dims: self.embed_text(text), source_hash: source_hash(text) })
    }

    async fn ping(&self) -> Result<(), EmbedError> { Ok(()) }
}
