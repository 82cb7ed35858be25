//! Wire request and its validation into an immutable [`Query`].

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::config::QuerySettings;
use crate::error::{Error, Result};
use crate::normalize;
use crate::types::Query;

fn default_true() -> bool { true }

/// Request body shared by ask, streaming ask and hybrid search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default = "default_true")]
    pub use_hybrid: bool,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub categories: Option<Vec<String>>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), top_k: None, use_hybrid: true, model: None, categories: None }
    }

    pub fn top_k(mut self, k: usize) -> Self { self.top_k = Some(k); self }

    pub fn hybrid(mut self, on: bool) -> Self { self.use_hybrid = on; self }

    pub fn model(mut self, model: impl Into<String>) -> Self { self.model = Some(model.into()); self }

    pub fn categories<I, S>(mut self, cats: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.categories = Some(cats.into_iter().map(Into::into).collect());
        self
    }

    /// Check limits and build the immutable query. Fails before any backend is touched.
    pub fn validate(&self, limits: &QuerySettings) -> Result<Query> {
        let raw_text = normalize::collapse_whitespace(&self.query);
        if raw_text.is_empty() {
            return Err(Error::InvalidQuery("query text must not be empty".into()));
        }
        let chars = raw_text.chars().count();
        if chars > limits.max_query_chars {
            return Err(Error::InvalidQuery(format!("query text exceeds {} characters", limits.max_query_chars)));
        }
        let top_k = self.top_k.unwrap_or(limits.default_top_k);
        if top_k == 0 || top_k > limits.max_k {
            return Err(Error::InvalidQuery(format!("top_k must be between 1 and {}", limits.max_k)));
        }
        let model_hint = self
            .model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(&limits.default_model)
            .to_string();
        let categories: BTreeSet<String> = self
            .categories
            .iter()
            .flatten()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect();
        Ok(Query { text: normalize::preprocess(&raw_text), raw_text, top_k, use_hybrid: self.use_hybrid, model_hint, categories })
    }
}
