//! Streaming client for Ollama's `/api/generate`.
//!
//! The response body is newline-delimited JSON; each line carries a
//! `response` fragment and the last one has `done: true`. The reader task stops
//! as soon as the consumer cancels, which drops the HTTP body and aborts the
//! request on the server side.

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use askdb_core::config::GenerationSettings;
use askdb_core::error::GenerationError;
use askdb_core::stream::{self, ChunkSender};
use askdb_core::traits::GenerationBackend;
use askdb_core::types::{GenerationParams, Prompt};
use askdb_core::{Error, GenerationStream};

pub struct OllamaBackend {
    client: reqwest::Client,
    base_url: String,
    inactivity: Duration,
    buffer: usize,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: usize,
}

#[derive(Debug, Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaBackend {
    pub fn new(settings: &GenerationSettings) -> askdb_core::Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(settings.inactivity_timeout())
            .build()
            .map_err(|e| Error::Config(format!("generation http client: {e}")))?;
        Ok(Self {
            client,
            base_url: settings.url.trim_end_matches('/').to_string(),
            inactivity: settings.inactivity_timeout(),
            buffer: settings.buffer,
        })
    }
}

/// Split complete lines off the front of `buf`.
fn drain_lines(buf: &mut Vec<u8>) -> Vec<Vec<u8>> {
    let mut lines = Vec::new();
    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = buf.drain(..=pos).collect();
        lines.push(line);
    }
    lines
}

/// Handle one NDJSON line. Returns `true` once the stream is finished.
async fn relay_line(tx: &mut Option<ChunkSender>, raw: &[u8]) -> Result<bool, GenerationError> {
    let trimmed = raw.trim_ascii();
    if trimmed.is_empty() {
        return Ok(false);
    }
    let line: GenerateLine =
        serde_json::from_slice(trimmed).map_err(|e| GenerationError::Backend(format!("malformed stream line: {e}")))?;
    if let Some(err) = line.error {
        return Err(GenerationError::Backend(err));
    }
    if line.done {
        if let Some(sender) = tx.take() {
            sender.finish(line.response).await?;
        }
        return Ok(true);
    }
    let Some(sender) = tx.as_mut() else { return Ok(true) };
    if !line.response.is_empty() {
        sender.send(line.response).await?;
    }
    Ok(false)
}

async fn pump(response: reqwest::Response, tx: ChunkSender) {
    let mut body = response.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();
    let cancel = tx.cancel_handle();
    let mut tx = Some(tx);
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("ollama stream cancelled");
                return;
            }
            next = body.next() => next,
        };
        let outcome = match next {
            Some(Ok(bytes)) => {
                buf.extend_from_slice(&bytes);
                let mut outcome = Ok(false);
                for line in drain_lines(&mut buf) {
                    outcome = relay_line(&mut tx, &line).await;
                    if !matches!(outcome, Ok(false)) {
                        break;
                    }
                }
                outcome
            }
            Some(Err(e)) => Err(GenerationError::Backend(format!("stream read: {e}"))),
            None => {
                // body ended; a trailing line without newline may still be pending
                let rest = std::mem::take(&mut buf);
                match relay_line(&mut tx, &rest).await {
                    Ok(true) => Ok(true),
                    Ok(false) => Err(GenerationError::Backend("stream ended before done".into())),
                    Err(e) => Err(e),
                }
            }
        };
        match outcome {
            Ok(false) => continue,
            Ok(true) => return,
            Err(GenerationError::Cancelled) => return,
            Err(e) => {
                warn!(error = %e, "ollama stream failed");
                if let Some(sender) = tx.take() {
                    sender.fail(e).await;
                }
                return;
            }
        }
    }
}

#[async_trait]
impl GenerationBackend for OllamaBackend {
    fn name(&self) -> &str { "ollama" }

    async fn start(&self, prompt: &Prompt, params: &GenerationParams) -> Result<GenerationStream, GenerationError> {
        let request = GenerateRequest {
            model: &params.model,
            prompt: &prompt.text,
            stream: true,
            options: GenerateOptions { temperature: params.temperature, num_predict: params.max_tokens },
        };
        let send = self.client.post(format!("{}/api/generate", self.base_url)).json(&request).send();
        let response = tokio::time::timeout(self.inactivity, send)
            .await
            .map_err(|_| GenerationError::Timeout(self.inactivity))?
            .map_err(|e| GenerationError::Backend(format!("request failed: {e}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            debug!(%status, body = %body, "ollama rejected request");
            return Err(GenerationError::Backend(format!("ollama returned {status}")));
        }
        let (tx, stream) = stream::channel(self.inactivity, self.buffer);
        tokio::spawn(pump(response, tx));
        Ok(stream)
    }

    async fn ping(&self) -> Result<(), GenerationError> {
        let resp = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .timeout(self.inactivity)
            .send()
            .await
            .map_err(|e| GenerationError::Backend(format!("unreachable: {e}")))?;
        if resp.status().is_success() {
            Ok(())
        } else {
            Err(GenerationError::Backend(format!("ollama returned {}", resp.status())))
        }
    }
}
