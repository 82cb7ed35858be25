//! askdb-pipeline
//!
//! The query orchestrator: validation, cached embedding with lexical-only
//! fallback, concurrent lexical and vector search, fusion, context assembly and
//! cancellable streaming generation, all recorded as one span tree per request.

pub mod api;
pub mod health;
pub mod orchestrator;
pub mod stream;

pub use api::{AskResponse, SearchResponse, SearchResult, Source, StreamEvent};
pub use health::{ComponentHealth, ComponentStatus, HealthReport};
pub use orchestrator::{QueryOrchestrator, QueryOrchestratorBuilder};
pub use stream::AskStream;
