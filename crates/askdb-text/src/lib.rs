//! askdb-text
//!
//! Tantivy-backed lexical (BM25) index over document chunks. Hits carry the
//! chunk text, title and URL in their metadata so fusion and context assembly
//! never need a second lookup.
pub mod index;
pub mod tantivy_utils;

pub use index::TextIndex;
