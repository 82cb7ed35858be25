//! Greedy context assembly under a token budget.
//!
//! Passages are taken in fused-score order and included whole or not at all.
//! A passage that does not fit is skipped and the next, possibly shorter, one
//! is tried, so the window can hold lower-ranked passages when a long one in
//! between would overflow it.

use askdb_core::corpus::estimate_tokens;
use askdb_core::types::{ContextWindow, FusedHit, Passage};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ContextAssembler {
    token_budget: usize,
}

impl ContextAssembler {
    pub fn new(token_budget: usize) -> Self { Self { token_budget } }

    pub fn token_budget(&self) -> usize { self.token_budget }

    pub fn assemble(&self, hits: &[FusedHit]) -> ContextWindow { assemble(hits, self.token_budget) }
}

pub fn assemble(hits: &[FusedHit], token_budget: usize) -> ContextWindow {
    let mut window = ContextWindow::empty(token_budget);
    for hit in hits {
        let text = if hit.text.trim().is_empty() { hit.snippet.trim() } else { hit.text.trim() };
        if text.is_empty() {
            continue;
        }
        let tokens = estimate_tokens(text);
        if window.used_tokens + tokens > token_budget {
            debug!(doc_id = %hit.doc_id, tokens, remaining = token_budget - window.used_tokens, "passage skipped");
            continue;
        }
        window.used_tokens += tokens;
        window.passages.push(Passage {
            doc_id: hit.doc_id.clone(),
            text: text.to_string(),
            title: hit.title().to_string(),
            url: hit.url().to_string(),
            score: hit.fused_score,
            tokens,
        });
    }
    window
}
