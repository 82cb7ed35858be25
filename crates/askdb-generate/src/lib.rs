//! askdb-generate
//!
//! Generation backends and the prompt builder. Backends hand back a
//! [`GenerationStream`](askdb_core::GenerationStream) immediately and produce
//! chunks from a spawned task, so the caller controls pacing and cancellation.

use std::sync::Arc;

use askdb_core::config::{GenerationBackendKind, GenerationSettings};
use askdb_core::traits::GenerationBackend;
use askdb_core::Result;

pub mod extractive;
pub mod ollama;
pub mod prompt;

pub use extractive::ExtractiveGenerator;
pub use ollama::OllamaBackend;
pub use prompt::build_prompt;

pub fn backend_from_settings(settings: &GenerationSettings) -> Result<Arc<dyn GenerationBackend>> {
    match settings.backend {
        GenerationBackendKind::Extractive => Ok(Arc::new(ExtractiveGenerator::new(settings))),
        GenerationBackendKind::Ollama => Ok(Arc::new(OllamaBackend::new(settings)?)),
    }
}
