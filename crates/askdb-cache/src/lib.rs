//! askdb-cache
//!
//! In-process TTL store implementing `CacheStore`, plus the typed embedding
//! cache that layers the `embedding:<hash>` key scheme on top of any store.

pub mod clock;
pub mod embedding;
pub mod memory;

pub use clock::{Clock, ManualClock, SystemClock};
pub use embedding::EmbeddingCache;
pub use memory::MemoryCacheStore;
