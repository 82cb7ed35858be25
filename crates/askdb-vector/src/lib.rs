//! askdb-vector
//!
//! Exact cosine-similarity index over chunk embeddings, persisted as a single
//! JSON file, plus the resumable backfill that fills it from a corpus.
pub mod backfill;
pub mod flat;

pub use backfill::{backfill_embeddings, BackfillReport};
pub use flat::{FlatVectorIndex, VectorRecord};
