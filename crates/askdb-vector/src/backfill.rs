//! Resumable embedding backfill.
//!
//! Chunks whose id is already indexed with the same content hash are skipped,
//! so re-running over an unchanged corpus embeds nothing. Misses are embedded
//! a batch at a time with bounded concurrency; a failed embedding is counted
//! and skipped rather than aborting the run.
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use askdb_core::traits::EmbeddingProvider;
use askdb_core::types::DocumentChunk;

use crate::flat::{content_hash, FlatVectorIndex, VectorRecord};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BackfillReport {
    pub embedded: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub async fn backfill_embeddings(
    index: &FlatVectorIndex,
    chunks: &[DocumentChunk],
    provider: &dyn EmbeddingProvider,
    batch_size: usize,
    mut on_progress: impl FnMut(usize),
) -> anyhow::Result<BackfillReport> {
    let mut report = BackfillReport::default();
    let mut pending = Vec::new();
    for chunk in chunks {
        if index.content_hash_of(&chunk.id).await.as_deref() == Some(content_hash(&chunk.content).as_str()) {
            report.skipped += 1;
            on_progress(1);
        } else {
            pending.push(chunk);
        }
    }

    let concurrency = batch_size.clamp(1, 16);
    for batch in pending.chunks(batch_size.max(1)) {
        let results: Vec<_> = stream::iter(batch.iter().copied())
            .map(|chunk| async move { (chunk, provider.embed(&chunk.content).await) })
            .buffered(concurrency)
            .collect()
            .await;
        let mut records = Vec::with_capacity(results.len());
        for (chunk, result) in results {
            match result {
                Ok(v) => records.push(VectorRecord::from_chunk(chunk, v.dims)),
                Err(e) => {
                    warn!(chunk = %chunk.id, error = %e, "embedding failed");
                    report.failed += 1;
                }
            }
        }
        report.embedded += index.upsert(records).await?;
        on_progress(batch.len());
    }
    info!(embedded = report.embedded, skipped = report.skipped, failed = report.failed, "embedding backfill done");
    Ok(report)
}
