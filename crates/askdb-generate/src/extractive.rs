//! Offline generator that answers by quoting the lead sentence of each passage.
//!
//! Output is streamed word by word through the same channel machinery as a
//! model backend, so it exercises ordering, inactivity and cancellation
//! exactly like a real stream.

use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

use askdb_core::config::GenerationSettings;
use askdb_core::error::GenerationError;
use askdb_core::stream::{self, ChunkSender};
use askdb_core::traits::GenerationBackend;
use askdb_core::types::{GenerationParams, Prompt};
use askdb_core::GenerationStream;

const LEAD_CHARS: usize = 240;

#[derive(Debug, Clone)]
pub struct ExtractiveGenerator {
    inactivity: Duration,
    buffer: usize,
    word_delay: Duration,
}

impl ExtractiveGenerator {
    pub fn new(settings: &GenerationSettings) -> Self {
        Self { inactivity: settings.inactivity_timeout(), buffer: settings.buffer, word_delay: Duration::ZERO }
    }

    /// Pause between words, for demos and cancellation tests.
    pub fn with_word_delay(mut self, delay: Duration) -> Self {
        self.word_delay = delay;
        self
    }

    pub fn answer_text(prompt: &Prompt) -> String {
        if !prompt.grounded {
            return format!("No supporting passages were found in the corpus for \"{}\".", prompt.question);
        }
        let mut answer = String::from("Based on the retrieved passages:");
        for (i, p) in prompt.passages.iter().enumerate() {
            answer.push_str(&format!(" {} [{}]", lead_sentence(&p.text), i + 1));
        }
        answer
    }
}

fn lead_sentence(text: &str) -> String {
    let text = text.trim();
    let end = text.find(". ").map(|i| i + 1).unwrap_or(text.len());
    let lead: String = text[..end].chars().take(LEAD_CHARS).collect();
    if lead.ends_with('.') { lead } else { format!("{lead}.") }
}

async fn produce(mut tx: ChunkSender, words: Vec<String>, delay: Duration) -> Result<(), GenerationError> {
    let Some((last, head)) = words.split_last() else {
        return tx.finish("").await;
    };
    for word in head {
        if !delay.is_zero() {
            tokio::select! {
                _ = tx.cancelled() => return Err(GenerationError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        tx.send(format!("{word} ")).await?;
    }
    tx.finish(last.clone()).await
}

#[async_trait]
impl GenerationBackend for ExtractiveGenerator {
    fn name(&self) -> &str { "extractive" }

    async fn start(&self, prompt: &Prompt, params: &GenerationParams) -> Result<GenerationStream, GenerationError> {
        let (tx, stream) = stream::channel(self.inactivity, self.buffer);
        let words: Vec<String> = Self::answer_text(prompt)
            .split_whitespace()
            .take(params.max_tokens.max(1))
            .map(str::to_string)
            .collect();
        let delay = self.word_delay;
        tokio::spawn(async move {
            if let Err(e) = produce(tx, words, delay).await {
                debug!(error = %e, "extractive generation stopped");
            }
        });
        Ok(stream)
    }
}
