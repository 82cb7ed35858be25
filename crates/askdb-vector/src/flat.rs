//! Brute-force vector index.
//!
//! Every search scores all records, so results are exact and deterministic:
//! ties keep insertion order. Records are replaced in place by id on upsert.
//! The scan runs on the blocking pool so a large index never holds up the
//! async workers, and a caller's timeout can fire while it is in progress.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use askdb_core::types::{DocumentChunk, Meta, SearchFilters, SearchHit, SourceKind, META_TEXT, META_TITLE, META_URL};

const SNIPPET_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub doc_id: String,
    pub title: String,
    pub url: String,
    pub categories: Vec<String>,
    pub content: String,
    pub content_hash: String,
    pub vector: Vec<f32>,
}

impl VectorRecord {
    pub fn from_chunk(chunk: &DocumentChunk, vector: Vec<f32>) -> Self {
        Self {
            id: chunk.id.clone(),
            doc_id: chunk.doc_id.clone(),
            title: chunk.title.clone(),
            url: chunk.url.clone(),
            categories: chunk.categories.clone(),
            content: chunk.content.clone(),
            content_hash: content_hash(&chunk.content),
            vector,
        }
    }

    fn to_hit(&self, score: f32) -> SearchHit {
        let mut metadata = Meta::new();
        metadata.insert(META_TEXT.to_string(), self.content.clone());
        metadata.insert(META_TITLE.to_string(), self.title.clone());
        metadata.insert(META_URL.to_string(), self.url.clone());
        metadata.insert("parent_id".to_string(), self.doc_id.clone());
        SearchHit {
            doc_id: self.id.clone(),
            score,
            source: SourceKind::Vector,
            snippet: self.content.chars().take(SNIPPET_CHARS).collect(),
            metadata,
        }
    }
}

pub fn content_hash(s: &str) -> String { blake3::hash(s.as_bytes()).to_hex().to_string() }

#[derive(Serialize, Deserialize)]
struct Snapshot {
    dim: usize,
    records: Vec<VectorRecord>,
}

#[derive(Default)]
struct Records {
    rows: Vec<VectorRecord>,
    by_id: HashMap<String, usize>,
}

pub struct FlatVectorIndex {
    dim: usize,
    records: Arc<RwLock<Records>>,
}

impl FlatVectorIndex {
    pub fn new(dim: usize) -> Self { Self { dim, records: Arc::new(RwLock::new(Records::default())) } }

    pub fn dim(&self) -> usize { self.dim }

    pub async fn len(&self) -> usize { self.records.read().await.rows.len() }

    pub async fn is_empty(&self) -> bool { self.len().await == 0 }

    /// Content hash of the stored record for `id`, if any.
    pub async fn content_hash_of(&self, id: &str) -> Option<String> {
        let records = self.records.read().await;
        records.by_id.get(id).map(|&i| records.rows[i].content_hash.clone())
    }

    pub async fn upsert(&self, batch: Vec<VectorRecord>) -> Result<usize> {
        if let Some(bad) = batch.iter().find(|r| r.vector.len() != self.dim) {
            return Err(anyhow!("dim mismatch for {}: got {} expected {}", bad.id, bad.vector.len(), self.dim));
        }
        let mut records = self.records.write().await;
        let n = batch.len();
        for record in batch {
            match records.by_id.get(&record.id).copied() {
                Some(i) => records.rows[i] = record,
                None => {
                    let i = records.rows.len();
                    records.by_id.insert(record.id.clone(), i);
                    records.rows.push(record);
                }
            }
        }
        debug!(upserted = n, total = records.rows.len(), "vector index upsert");
        Ok(n)
    }

    /// Top `k` records by cosine similarity that pass `filters`.
    pub async fn search(&self, query: &[f32], k: usize, filters: &SearchFilters) -> Result<Vec<SearchHit>> {
        if query.len() != self.dim {
            return Err(anyhow!("query has {} dims, index has {}", query.len(), self.dim));
        }
        let records = Arc::clone(&self.records);
        let query = query.to_vec();
        let filters = filters.clone();
        tokio::task::spawn_blocking(move || rank(&records.blocking_read(), &query, k, &filters))
            .await
            .context("vector scan task")
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        let records = self.records.read().await;
        let snapshot = Snapshot { dim: self.dim, records: records.rows.clone() };
        drop(records);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, serde_json::to_vec(&snapshot)?).await?;
        tokio::fs::rename(&tmp, path).await.with_context(|| format!("writing {}", path.display()))?;
        info!(path = %path.display(), records = snapshot.records.len(), "vector index saved");
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await.with_context(|| format!("reading {}", path.display()))?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))?;
        let index = Self::new(snapshot.dim);
        index.upsert(snapshot.records).await?;
        Ok(index)
    }
}

fn rank(records: &Records, query: &[f32], k: usize, filters: &SearchFilters) -> Vec<SearchHit> {
    let mut scored: Vec<(f32, &VectorRecord)> = records
        .rows
        .iter()
        .filter(|r| filters.matches(&r.categories))
        .map(|r| (cosine_similarity(query, &r.vector), r))
        .collect();
    scored.sort_by(|a, b| b.0.total_cmp(&a.0));
    scored.into_iter().take(k).map(|(score, r)| r.to_hit(score)).collect()
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: &str, category: &str, vector: Vec<f32>) -> VectorRecord {
        VectorRecord {
            id: id.into(),
            doc_id: id.into(),
            title: String::new(),
            url: format!("https://example.org/{id}"),
            categories: vec![category.into()],
            content: format!("content of {id}"),
            content_hash: content_hash(id),
            vector,
        }
    }

    #[tokio::test]
    async fn ranks_by_cosine_with_ties_in_insertion_order() {
        let index = FlatVectorIndex::new(2);
        index
            .upsert(vec![
                record("c", "y", vec![0.0, 1.0]),
                record("b", "x", vec![1.0, 0.0]),
                record("a", "x", vec![2.0, 0.0]),
            ])
            .await
            .expect("upsert");
        let hits = index.search(&[1.0, 0.0], 3, &SearchFilters::default()).await.expect("search");
        let ids: Vec<_> = hits.iter().map(|h| h.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[0].metadata[META_URL], "https://example.org/b");
    }

    #[tokio::test]
    async fn filters_and_dimension_checks() {
        let index = FlatVectorIndex::new(2);
        index.upsert(vec![record("a", "x", vec![1.0, 0.0]), record("c", "y", vec![0.0, 1.0])]).await.expect("upsert");
        let filters = SearchFilters { categories: ["y".to_string()].into_iter().collect() };
        let hits = index.search(&[1.0, 0.0], 5, &filters).await.expect("search");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "c");
        assert!(index.search(&[1.0], 5, &filters).await.is_err());
        assert!(index.upsert(vec![record("d", "x", vec![1.0])]).await.is_err());
    }

    #[tokio::test]
    async fn upsert_replaces_by_id() {
        let index = FlatVectorIndex::new(2);
        index.upsert(vec![record("a", "x", vec![1.0, 0.0])]).await.expect("upsert");
        index.upsert(vec![record("a", "x", vec![0.0, 1.0])]).await.expect("upsert");
        assert_eq!(index.len().await, 1);
        let hits = index.search(&[0.0, 1.0], 1, &SearchFilters::default()).await.expect("search");
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }
}
