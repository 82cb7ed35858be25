//! Query text preprocessing and the deterministic `source_hash` digest.

use serde::Serialize;

const TEMPORAL_WORDS: &[&str] = &["recent", "latest", "newest", "current"];
const TEMPORAL_OBJECTS: &[&str] = &["paper", "papers", "work", "research", "study", "studies"];

/// Collapse runs of whitespace to single spaces and trim.
pub fn collapse_whitespace(text: &str) -> String { text.split_whitespace().collect::<Vec<_>>().join(" ") }

/// Rewrite a raw question into the form used for retrieval.
///
/// Temporal filler ("recent papers", "latest") is dropped since it carries no
/// lexical signal. If nothing is left the whitespace-collapsed input is kept.
pub fn preprocess(text: &str) -> String {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut kept = Vec::with_capacity(tokens.len());
    let mut i = 0;
    while i < tokens.len() {
        if TEMPORAL_WORDS.contains(&bare_lower(tokens[i]).as_str()) {
            i += 1;
            if i < tokens.len() && TEMPORAL_OBJECTS.contains(&bare_lower(tokens[i]).as_str()) {
                i += 1;
            }
            continue;
        }
        kept.push(tokens[i]);
        i += 1;
    }
    if kept.is_empty() { collapse_whitespace(text) } else { kept.join(" ") }
}

/// Canonical form that equal questions share: lower-cased, whitespace collapsed.
pub fn normalize_for_hash(text: &str) -> String { collapse_whitespace(text).to_lowercase() }

/// Hex blake3 digest of the normalized text.
pub fn source_hash(text: &str) -> String { blake3::hash(normalize_for_hash(text).as_bytes()).to_hex().to_string() }

/// Coarse traits of a question, recorded for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueryTraits {
    pub has_year: bool,
    pub is_temporal: bool,
    pub is_comparison: bool,
    pub is_implementation: bool,
}

pub fn analyze(text: &str) -> QueryTraits {
    let words: Vec<String> = text.split_whitespace().map(bare_lower).collect();
    let padded = format!(" {} ", words.join(" "));
    let has_phrase = |phrases: &[&str]| phrases.iter().any(|p| padded.contains(&format!(" {p} ")));
    QueryTraits {
        has_year: words.iter().any(|w| is_year(w)),
        is_temporal: has_phrase(&["recent", "latest", "newest", "current", "new"]),
        is_comparison: has_phrase(&["vs", "versus", "compare", "compared to", "compare to", "difference between"]),
        is_implementation: has_phrase(&["how to", "implement", "implementation", "code for", "tutorial", "example"]),
    }
}

fn bare_lower(token: &str) -> String {
    token.trim_matches(|c: char| !c.is_alphanumeric()).to_lowercase()
}

fn is_year(word: &str) -> bool {
    word.len() == 4 && word.chars().all(|c| c.is_ascii_digit()) && (word.starts_with("19") || word.starts_with("20"))
}
