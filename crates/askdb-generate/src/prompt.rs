use std::fmt::Write;

use askdb_core::types::{ContextWindow, Prompt};

const GROUNDED_PREAMBLE: &str = "You are a research assistant. Answer the question using only the numbered passages below. \
Cite passages by their number in square brackets. If the passages do not contain the answer, say so.";

const UNGROUNDED_PREAMBLE: &str = "You are a research assistant. No passages relevant to the question were found in the corpus. \
Say that no supporting sources were found, then give a brief general answer and mark it as not grounded in the corpus.";

/// Render the prompt for `question` over the assembled context.
pub fn build_prompt(question: &str, context: &ContextWindow) -> Prompt {
    let grounded = !context.is_empty();
    let mut text = String::new();
    if grounded {
        text.push_str(GROUNDED_PREAMBLE);
        text.push_str("\n\n");
        for (i, p) in context.passages.iter().enumerate() {
            let _ = write!(text, "[{}]", i + 1);
            if !p.title.is_empty() {
                let _ = write!(text, " {}", p.title);
            }
            if !p.url.is_empty() {
                let _ = write!(text, " ({})", p.url);
            }
            let _ = write!(text, "\n{}\n\n", p.text);
        }
    } else {
        text.push_str(UNGROUNDED_PREAMBLE);
        text.push_str("\n\n");
    }
    let _ = write!(text, "Question: {question}\nAnswer:");
    Prompt { question: question.to_string(), text, passages: context.passages.clone(), grounded }
}
