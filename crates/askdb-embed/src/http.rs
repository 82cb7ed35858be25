//! Client for OpenAI-compatible embedding APIs (Jina, OpenAI, Ollama's
//! `/v1/embeddings`). One request per call, bounded by the configured timeout.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use askdb_core::config::EmbeddingSettings;
use askdb_core::error::EmbedError;
use askdb_core::normalize::source_hash;
use askdb_core::traits::EmbeddingProvider;
use askdb_core::types::EmbeddingVector;
use askdb_core::Error;

pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    dim: usize,
    timeout: Duration,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

impl HttpEmbeddingProvider {
    pub fn new(settings: &EmbeddingSettings) -> askdb_core::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|e| Error::Config(format!("embedding http client: {e}")))?;
        Ok(Self {
            client,
            endpoint: settings.url.clone(),
            model: settings.model.clone(),
            api_key: settings.api_key.clone().filter(|k| !k.is_empty()),
            dim: settings.dim,
            timeout: settings.timeout(),
        })
    }

    fn map_send_error(&self, e: reqwest::Error) -> EmbedError {
        if e.is_timeout() {
            EmbedError::ProviderTimeout(self.timeout)
        } else {
            EmbedError::ProviderUnavailable(e.to_string())
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn name(&self) -> &str { &self.model }

    fn dim(&self) -> usize { self.dim }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbedError> {
        let mut request = self.client.post(&self.endpoint).json(&EmbedRequest { model: &self.model, input: vec![text], dimensions: self.dim });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await.map_err(|e| self.map_send_error(e))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "embedding request rejected");
            debug!(body = %body, "embedding error body");
            return Err(EmbedError::ProviderUnavailable(format!("provider returned {status}")));
        }
        let parsed: EmbedResponse = response.json().await.map_err(|e| {
            if e.is_timeout() { EmbedError::ProviderTimeout(self.timeout) } else { EmbedError::InvalidResponse(e.to_string()) }
        })?;
        let dims = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| EmbedError::InvalidResponse("empty data array".into()))?;
        if dims.len() != self.dim {
            return Err(EmbedError::InvalidResponse(format!("expected {} dims, got {}", self.dim, dims.len())));
        }
        Ok(EmbeddingVector { dims, source_hash: source_hash(text) })
    }
}
