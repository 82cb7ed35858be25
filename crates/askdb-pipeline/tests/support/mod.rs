#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use askdb_core::config::Settings;
use askdb_core::error::{CacheError, EmbedError, GenerationError, SearchError, TraceError};
use askdb_core::stream;
use askdb_core::traits::{CacheStore, EmbeddingProvider, GenerationBackend, SearchBackend};
use askdb_core::types::{EmbeddingVector, GenerationParams, Prompt, SearchFilters, SearchHit, SourceKind, META_TEXT, META_URL};
use askdb_core::GenerationStream;
use askdb_embed::HashingEmbedder;
use askdb_trace::{Trace, TraceSink};

pub fn hit(doc_id: &str, score: f32, source: SourceKind, text: &str) -> SearchHit {
    let mut metadata = HashMap::new();
    metadata.insert(META_TEXT.to_string(), text.to_string());
    metadata.insert(META_URL.to_string(), format!("https://arxiv.org/abs/{doc_id}"));
    SearchHit { doc_id: doc_id.to_string(), score, source, snippet: text.chars().take(40).collect(), metadata }
}

pub fn settings() -> Settings {
    let mut s = Settings::default();
    s.embedding.dim = 16;
    s.embedding.timeout_ms = 200;
    s.search.vector_timeout_ms = 200;
    s.search.lexical_timeout_ms = 500;
    s.context.token_budget = 400;
    s
}

// ---------- cache ----------

pub struct FailingCache;

#[async_trait]
impl CacheStore for FailingCache {
    fn name(&self) -> &str { "failing" }

    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> { Err(CacheError::Unavailable("connection refused".into())) }

    async fn put(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Unavailable("connection refused".into()))
    }

    async fn ping(&self) -> Result<(), CacheError> { Err(CacheError::Unavailable("connection refused".into())) }
}

// ---------- embedding ----------

/// Hashing embedder that counts provider calls.
pub struct CountingEmbedder {
    inner: HashingEmbedder,
    pub calls: AtomicUsize,
}

impl CountingEmbedder {
    pub fn new(dim: usize) -> Self { Self { inner: HashingEmbedder::new(dim), calls: AtomicUsize::new(0) } }

    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl EmbeddingProvider for CountingEmbedder {
    fn name(&self) -> &str { "counting" }

    fn dim(&self) -> usize { self.inner.dim() }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbedError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.embed(text).await
    }
}

pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn name(&self) -> &str { "failing" }

    fn dim(&self) -> usize { 16 }

    async fn embed(&self, _text: &str) -> Result<EmbeddingVector, EmbedError> {
        Err(EmbedError::ProviderUnavailable("401 unauthorized".into()))
    }
}

pub struct SlowEmbedder(pub Duration);

#[async_trait]
impl EmbeddingProvider for SlowEmbedder {
    fn name(&self) -> &str { "slow" }

    fn dim(&self) -> usize { 16 }

    async fn embed(&self, text: &str) -> Result<EmbeddingVector, EmbedError> {
        tokio::time::sleep(self.0).await;
        HashingEmbedder::new(16).embed(text).await
    }
}

// ---------- search ----------

#[derive(Default)]
pub struct ScriptedSearch {
    pub lexical: Vec<SearchHit>,
    pub vector: Vec<SearchHit>,
    pub lexical_fails: bool,
    pub vector_fails: bool,
    pub vector_delay: Duration,
    pub vector_calls: AtomicUsize,
    pub last_filters: Mutex<Option<SearchFilters>>,
}

impl ScriptedSearch {
    pub fn lexical(hits: Vec<SearchHit>) -> Self { Self { lexical: hits, ..Default::default() } }

    pub fn vector_calls(&self) -> usize { self.vector_calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl SearchBackend for ScriptedSearch {
    fn name(&self) -> &str { "scripted" }

    async fn search_lexical(&self, _text: &str, top_k: usize, filters: &SearchFilters) -> Result<Vec<SearchHit>, SearchError> {
        *self.last_filters.lock().expect("lock") = Some(filters.clone());
        if self.lexical_fails {
            return Err(SearchError::BackendUnavailable("index at /srv/tantivy is locked".into()));
        }
        Ok(self.lexical.iter().take(top_k).cloned().collect())
    }

    async fn search_vector(&self, _vector: &EmbeddingVector, top_k: usize, _filters: &SearchFilters) -> Result<Vec<SearchHit>, SearchError> {
        self.vector_calls.fetch_add(1, Ordering::SeqCst);
        if !self.vector_delay.is_zero() {
            tokio::time::sleep(self.vector_delay).await;
        }
        if self.vector_fails {
            return Err(SearchError::BackendUnavailable("vector index not loaded".into()));
        }
        Ok(self.vector.iter().take(top_k).cloned().collect())
    }

    async fn ping(&self) -> Result<(), SearchError> {
        if self.lexical_fails {
            return Err(SearchError::BackendUnavailable("index locked".into()));
        }
        Ok(())
    }
}

// ---------- generation ----------

/// Emits fixed chunks, the last one final, with an optional pause before each.
pub struct ScriptedGenerator {
    pub chunks: Vec<String>,
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub produced: Arc<AtomicU64>,
    pub prompts: Mutex<Vec<Prompt>>,
}

impl ScriptedGenerator {
    pub fn new<S: Into<String>>(chunks: impl IntoIterator<Item = S>) -> Self {
        Self {
            chunks: chunks.into_iter().map(Into::into).collect(),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            produced: Arc::new(AtomicU64::new(0)),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }

    pub fn produced(&self) -> u64 { self.produced.load(Ordering::SeqCst) }
}

#[async_trait]
impl GenerationBackend for ScriptedGenerator {
    fn name(&self) -> &str { "scripted" }

    async fn start(&self, prompt: &Prompt, _params: &GenerationParams) -> Result<GenerationStream, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().expect("lock").push(prompt.clone());
        let (mut tx, stream) = stream::channel(Duration::from_secs(5), 1);
        let chunks = self.chunks.clone();
        let delay = self.delay;
        let produced = Arc::clone(&self.produced);
        tokio::spawn(async move {
            let Some((last, head)) = chunks.split_last() else { return };
            for chunk in head {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                if tx.send(chunk.clone()).await.is_err() {
                    return;
                }
                produced.fetch_add(1, Ordering::SeqCst);
            }
            if tx.finish(last.clone()).await.is_ok() {
                produced.fetch_add(1, Ordering::SeqCst);
            }
        });
        Ok(stream)
    }
}

pub struct FailingGenerator;

#[async_trait]
impl GenerationBackend for FailingGenerator {
    fn name(&self) -> &str { "failing" }

    async fn start(&self, _prompt: &Prompt, _params: &GenerationParams) -> Result<GenerationStream, GenerationError> {
        Err(GenerationError::Backend("model llama3 not found".into()))
    }

    async fn ping(&self) -> Result<(), GenerationError> { Err(GenerationError::Backend("unreachable".into())) }
}

// ---------- tracing ----------

#[derive(Default)]
pub struct CapturingSink {
    traces: Mutex<Vec<Trace>>,
    notify: Notify,
}

impl CapturingSink {
    pub async fn wait_for(&self, n: usize) -> Vec<Trace> {
        loop {
            let notified = self.notify.notified();
            {
                let traces = self.traces.lock().expect("lock");
                if traces.len() >= n {
                    return traces.clone();
                }
            }
            tokio::time::timeout(Duration::from_secs(5), notified).await.expect("trace exported");
        }
    }
}

#[async_trait]
impl TraceSink for CapturingSink {
    fn name(&self) -> &str { "capture" }

    async fn export(&self, trace: &Trace) -> Result<(), TraceError> {
        self.traces.lock().expect("lock").push(trace.clone());
        self.notify.notify_waiters();
        Ok(())
    }
}

pub struct BrokenSink;

#[async_trait]
impl TraceSink for BrokenSink {
    fn name(&self) -> &str { "broken" }

    async fn export(&self, _trace: &Trace) -> Result<(), TraceError> { Err(TraceError::SinkUnavailable("collector down".into())) }
}
