//! askdb-hybrid
//!
//! Turns two independent result lists into one ranked list and then into a
//! bounded prompt context. Also hosts the `SearchBackend` backed by the local
//! text and vector indexes.
pub mod backend;
pub mod context;
pub mod fusion;

pub use backend::IndexSearchBackend;
pub use context::ContextAssembler;
pub use fusion::ResultFuser;
