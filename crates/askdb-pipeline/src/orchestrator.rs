//! End-to-end query protocol.
//!
//! One request runs as a short task tree: validate, embed (cache first, the
//! provider on a miss, lexical-only on any failure), lexical and vector search
//! concurrently, fuse, assemble, then stream generation back to the caller.
//! Every request owns its [`TraceRecorder`]; the finished trace is exported on
//! a detached task so a slow or broken sink never delays the response.
//!
//! Both `ask` and `ask_stream` drive the same event producer. The
//! non-streaming form just collects the events.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use askdb_cache::EmbeddingCache;
use askdb_core::config::Settings;
use askdb_core::error::{EmbedError, SearchError};
use askdb_core::normalize;
use askdb_core::traits::{CacheStore, EmbeddingProvider, GenerationBackend, SearchBackend};
use askdb_core::types::{EmbeddingVector, FusedHit, GenerationParams, Prompt, Query, SearchHit};
use askdb_core::{CancelHandle, Error, ErrorKind, PublicError, QueryRequest, Result};
use askdb_generate::build_prompt;
use askdb_hybrid::{ContextAssembler, ResultFuser};
use askdb_trace::{export_detached, LogSink, SpanStatus, TraceRecorder, TraceSink};

use crate::api::{
    empty_timings, AskResponse, SearchResponse, SearchResult, Source, StreamEvent, TimingMs, MODE_BM25, MODE_HYBRID,
    NO_RESULTS_ANSWER,
};
use crate::health::{probe, ComponentHealth, HealthReport};
use crate::stream::AskStream;

/// Cheap to clone; clones share backends and the request counter.
#[derive(Clone)]
pub struct QueryOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    settings: Settings,
    cache: Option<EmbeddingCache>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    search: Arc<dyn SearchBackend>,
    generator: Arc<dyn GenerationBackend>,
    sink: Arc<dyn TraceSink>,
    fuser: ResultFuser,
    assembler: ContextAssembler,
    next_request: AtomicU64,
}

pub struct QueryOrchestratorBuilder {
    settings: Settings,
    cache: Option<Arc<dyn CacheStore>>,
    embedder: Option<Arc<dyn EmbeddingProvider>>,
    search: Option<Arc<dyn SearchBackend>>,
    generator: Option<Arc<dyn GenerationBackend>>,
    sink: Option<Arc<dyn TraceSink>>,
}

impl QueryOrchestratorBuilder {
    pub fn cache(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(store);
        self
    }

    pub fn embedder(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = Some(provider);
        self
    }

    pub fn search(mut self, backend: Arc<dyn SearchBackend>) -> Self {
        self.search = Some(backend);
        self
    }

    pub fn generator(mut self, backend: Arc<dyn GenerationBackend>) -> Self {
        self.generator = Some(backend);
        self
    }

    pub fn trace_sink(mut self, sink: Arc<dyn TraceSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Search and generation are required. Without a cache every request
    /// embeds afresh; without an embedder every request is lexical-only.
    pub fn build(self) -> Result<QueryOrchestrator> {
        self.settings.validate()?;
        let search = self.search.ok_or_else(|| Error::Config("a search backend is required".into()))?;
        let generator = self.generator.ok_or_else(|| Error::Config("a generation backend is required".into()))?;
        let settings = self.settings;
        let inner = Inner {
            cache: self.cache.map(|store| EmbeddingCache::new(store, &settings.cache)),
            embedder: self.embedder,
            search,
            generator,
            sink: self.sink.unwrap_or_else(|| Arc::new(LogSink)),
            fuser: ResultFuser::new(&settings.fusion),
            assembler: ContextAssembler::new(settings.context.token_budget),
            next_request: AtomicU64::new(1),
            settings,
        };
        Ok(QueryOrchestrator { inner: Arc::new(inner) })
    }
}

impl QueryOrchestrator {
    pub fn builder(settings: Settings) -> QueryOrchestratorBuilder {
        QueryOrchestratorBuilder { settings, cache: None, embedder: None, search: None, generator: None, sink: None }
    }

    pub fn settings(&self) -> &Settings { &self.inner.settings }

    /// Answer a question and return the whole answer at once.
    pub async fn ask(&self, request: QueryRequest) -> std::result::Result<AskResponse, PublicError> {
        let (tx, rx) = mpsc::channel(self.inner.settings.generation.buffer.max(1));
        let cancel = CancelHandle::new();
        let (_, response) = tokio::join!(Arc::clone(&self.inner).execute(request, tx, cancel), collect(rx));
        response
    }

    /// Answer a question as a stream of events. The pipeline runs on its own
    /// task; cancelling or dropping the stream cancels generation.
    pub fn ask_stream(&self, request: QueryRequest) -> AskStream {
        let (tx, rx) = mpsc::channel(self.inner.settings.generation.buffer.max(1));
        let cancel = CancelHandle::new();
        tokio::spawn(Arc::clone(&self.inner).execute(request, tx, cancel.clone()));
        AskStream::new(rx, cancel)
    }

    /// Retrieval and fusion only, no generation.
    pub async fn search(&self, request: QueryRequest) -> std::result::Result<SearchResponse, PublicError> {
        let inner = &self.inner;
        let mut rec = TraceRecorder::new(inner.next_request_id(), "search");
        match inner.retrieve(&mut rec, &request).await {
            Ok(mut r) => {
                r.timings.insert("total".into(), elapsed_ms(r.started));
                inner.export(rec.finish(SpanStatus::Ok));
                let hits = r
                    .fused
                    .into_iter()
                    .map(|h| SearchResult { doc_id: h.doc_id, score: h.fused_score, snippet: h.snippet })
                    .collect();
                Ok(SearchResponse { hits, search_mode: r.search_mode.to_string(), timing_ms: r.timings })
            }
            Err(e) => {
                log_failure(rec.request_id(), &e);
                rec.set_attribute(rec.root(), "error_kind", e.kind().code());
                inner.export(rec.finish(status_for(&e)));
                Err(e.to_public())
            }
        }
    }

    /// Probe every component concurrently.
    pub async fn health(&self) -> HealthReport {
        let inner = &self.inner;
        let settings = &inner.settings.health;
        let cache = async {
            let Some(cache) = &inner.cache else { return ComponentHealth::not_configured("cache") };
            let mut health = probe("cache", settings, cache.ping()).await;
            if let Some(s) = cache.stats() {
                health.append_message(format!("hits={} misses={} evictions={} entries={}", s.hits, s.misses, s.evictions, s.entries));
            }
            health
        };
        let embedding = async {
            match &inner.embedder {
                Some(provider) => probe("embedding", settings, provider.ping()).await,
                None => ComponentHealth::not_configured("embedding"),
            }
        };
        let search = probe("search", settings, inner.search.ping());
        let generation = probe("generation", settings, inner.generator.ping());
        let (cache, embedding, search, generation) = tokio::join!(cache, embedding, search, generation);
        HealthReport::new(vec![cache, embedding, search, generation])
    }
}

/// Output of the shared retrieval stages.
struct Retrieval {
    query: Query,
    fused: Vec<FusedHit>,
    search_mode: &'static str,
    timings: TimingMs,
    started: Instant,
}

struct TimedSearch {
    result: std::result::Result<Vec<SearchHit>, SearchError>,
    started: Instant,
    ended: Instant,
}

impl TimedSearch {
    fn elapsed_ms(&self) -> u64 { self.ended.duration_since(self.started).as_millis() as u64 }
}

enum Step {
    Cancelled,
    Deadline,
    Chunk(Option<std::result::Result<askdb_core::types::GenerationChunk, askdb_core::error::GenerationError>>),
}

impl Inner {
    fn next_request_id(&self) -> String { format!("req-{}", self.next_request.fetch_add(1, Ordering::Relaxed)) }

    fn export(&self, trace: askdb_trace::Trace) {
        export_detached(Arc::clone(&self.sink), trace, self.settings.trace.export_timeout());
    }

    /// Produce the event sequence for one ask and record its trace.
    async fn execute(self: Arc<Self>, request: QueryRequest, tx: mpsc::Sender<StreamEvent>, cancel: CancelHandle) {
        let mut rec = TraceRecorder::new(self.next_request_id(), "ask");
        let result = self.answer(&mut rec, &request, &tx, &cancel).await;
        let status = match &result {
            Ok(()) => SpanStatus::Ok,
            Err(e) => {
                log_failure(rec.request_id(), e);
                rec.set_attribute(rec.root(), "error_kind", e.kind().code());
                status_for(e)
            }
        };
        if let Err(e) = result {
            // Dropped when the caller has gone away or cancelled.
            emit(&tx, &cancel, StreamEvent::Error { error: e.to_public() }).await;
        }
        self.export(rec.finish(status));
    }

    async fn answer(
        &self,
        rec: &mut TraceRecorder,
        request: &QueryRequest,
        tx: &mpsc::Sender<StreamEvent>,
        cancel: &CancelHandle,
    ) -> Result<()> {
        let root = rec.root();
        let Retrieval { query, fused, search_mode, mut timings, started } = self.retrieve(rec, request).await?;

        if fused.is_empty() {
            rec.set_attribute(root, "no_results", true);
            timings.insert("total".into(), elapsed_ms(started));
            emit(tx, cancel, StreamEvent::Chunk { text: NO_RESULTS_ANSWER.to_string() }).await;
            let done = StreamEvent::Done { sources: Vec::new(), chunks_used: 0, search_mode: search_mode.to_string(), timing_ms: timings };
            emit(tx, cancel, done).await;
            return Ok(());
        }

        let span = rec.start_span("assembly", root);
        let t = Instant::now();
        let window = self.assembler.assemble(&fused);
        timings.insert("assembly".into(), elapsed_ms(t));
        rec.end_span(
            span,
            SpanStatus::Ok,
            [
                ("passages", window.len().to_string()),
                ("used_tokens", window.used_tokens.to_string()),
                ("token_budget", window.token_budget.to_string()),
            ],
        );
        if window.is_empty() {
            debug!(request_id = %rec.request_id(), "no passage fits the token budget, generating without context");
            rec.set_attribute(root, "context_empty", true);
        }

        let prompt = build_prompt(&query.raw_text, &window);
        let params = GenerationParams {
            model: query.model_hint.clone(),
            temperature: self.settings.generation.temperature,
            max_tokens: self.settings.generation.max_tokens,
        };
        let span = rec.start_span("generation", root);
        rec.set_attribute(span, "backend", self.generator.name());
        rec.set_attribute(span, "model", &params.model);
        let t = Instant::now();
        let generated = self.generate(&prompt, &params, tx, cancel).await;
        timings.insert("generation".into(), elapsed_ms(t));
        match generated {
            Ok(chunks) => rec.end_span(span, SpanStatus::Ok, [("chunks", chunks.to_string())]),
            Err(e) => {
                rec.end_span(span, status_for(&e), [("error", e.to_string())]);
                return Err(e);
            }
        }

        timings.insert("total".into(), elapsed_ms(started));
        let sources = window
            .passages
            .iter()
            .map(|p| Source { doc_id: p.doc_id.clone(), url: p.url.clone(), score: p.score })
            .collect();
        let done = StreamEvent::Done { sources, chunks_used: window.len(), search_mode: search_mode.to_string(), timing_ms: timings };
        if !emit(tx, cancel, done).await {
            debug!(request_id = %rec.request_id(), "caller left after generation completed");
        }
        Ok(())
    }

    /// Relay generation chunks until the final one. Returns the number of
    /// chunks received from the backend.
    async fn generate(
        &self,
        prompt: &Prompt,
        params: &GenerationParams,
        tx: &mpsc::Sender<StreamEvent>,
        cancel: &CancelHandle,
    ) -> Result<u64> {
        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            started = self.generator.start(prompt, params) => started?,
        };

        let deadline = self.settings.generation.request_timeout();
        let expired = async move {
            match deadline {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(expired);

        let mut received = 0u64;
        loop {
            let step = tokio::select! {
                biased;
                _ = cancel.cancelled() => Step::Cancelled,
                _ = &mut expired => Step::Deadline,
                next = stream.next_chunk() => Step::Chunk(next),
            };
            match step {
                Step::Cancelled => {
                    stream.cancel();
                    return Err(Error::Cancelled);
                }
                Step::Deadline => {
                    info!(?deadline, "request deadline reached, cancelling generation");
                    stream.cancel();
                    return Err(Error::Cancelled);
                }
                Step::Chunk(None) => return Err(Error::Cancelled),
                Step::Chunk(Some(Err(e))) => return Err(e.into()),
                Step::Chunk(Some(Ok(chunk))) => {
                    received += 1;
                    if !chunk.text.is_empty() && !emit(tx, cancel, StreamEvent::Chunk { text: chunk.text }).await {
                        stream.cancel();
                        return Err(Error::Cancelled);
                    }
                    if chunk.is_final {
                        return Ok(received);
                    }
                }
            }
        }
    }

    /// Validation, embedding, both searches and fusion.
    async fn retrieve(&self, rec: &mut TraceRecorder, request: &QueryRequest) -> Result<Retrieval> {
        let started = Instant::now();
        let root = rec.root();
        let query = request.validate(&self.settings.query)?;

        let traits = normalize::analyze(&query.raw_text);
        rec.set_attribute(root, "top_k", query.top_k);
        rec.set_attribute(root, "use_hybrid", query.use_hybrid);
        rec.set_attribute(root, "model", &query.model_hint);
        rec.set_attribute(root, "categories", query.categories.len());
        rec.set_attribute(root, "has_year", traits.has_year);
        rec.set_attribute(root, "is_temporal", traits.is_temporal);
        rec.set_attribute(root, "is_comparison", traits.is_comparison);
        rec.set_attribute(root, "is_implementation", traits.is_implementation);

        let mut timings = empty_timings();
        let embedding = if query.use_hybrid { self.embed(rec, &query, &mut timings).await } else { None };

        let filters = query.filters();
        let lexical_span = rec.start_span("lexical_search", root);
        let vector_span = embedding.as_ref().map(|_| rec.start_span("vector_search", root));
        let lexical = timed(self.settings.search.lexical_timeout(), self.search.search_lexical(&query.text, query.top_k, &filters));
        let vector = async {
            match &embedding {
                Some(v) => Some(timed(self.settings.search.vector_timeout(), self.search.search_vector(v, query.top_k, &filters)).await),
                None => None,
            }
        };
        let (lexical, vector) = tokio::join!(lexical, vector);

        let vector_hits = match (vector_span, vector) {
            (Some(span), Some(v)) => {
                timings.insert("vector_search".into(), v.elapsed_ms());
                match v.result {
                    Ok(hits) => {
                        rec.end_span_at(span, SpanStatus::Ok, [("hits", hits.len().to_string())], v.ended);
                        hits
                    }
                    Err(e) => {
                        warn!(request_id = %rec.request_id(), backend = self.search.name(), error = %e, "vector search failed, continuing lexical-only");
                        rec.end_span_at(span, SpanStatus::Error, [("error", e.to_string())], v.ended);
                        rec.set_attribute(root, "vector_error", &e);
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        };

        timings.insert("lexical_search".into(), lexical.elapsed_ms());
        let lexical_hits = match lexical.result {
            Ok(hits) => {
                rec.end_span_at(lexical_span, SpanStatus::Ok, [("hits", hits.len().to_string())], lexical.ended);
                hits
            }
            Err(e) => {
                rec.end_span_at(lexical_span, SpanStatus::Error, [("error", e.to_string())], lexical.ended);
                return Err(Error::SearchUnavailable(e));
            }
        };

        let span = rec.start_span("fusion", root);
        let t = Instant::now();
        let fused = self.fuser.fuse(&lexical_hits, &vector_hits, query.top_k);
        timings.insert("fusion".into(), elapsed_ms(t));
        rec.end_span(
            span,
            SpanStatus::Ok,
            [
                ("lexical_hits", lexical_hits.len().to_string()),
                ("vector_hits", vector_hits.len().to_string()),
                ("fused_hits", fused.len().to_string()),
            ],
        );

        let search_mode = if vector_hits.is_empty() { MODE_BM25 } else { MODE_HYBRID };
        rec.set_attribute(root, "search_mode", search_mode);
        Ok(Retrieval { query, fused, search_mode, timings, started })
    }

    /// Query embedding, or `None` to continue lexical-only. Never fails the request.
    async fn embed(&self, rec: &mut TraceRecorder, query: &Query, timings: &mut TimingMs) -> Option<EmbeddingVector> {
        let root = rec.root();
        let Some(provider) = &self.embedder else {
            rec.set_attribute(root, "embedding_skipped", "no provider");
            return None;
        };
        let span = rec.start_span("embedding", root);
        let t = Instant::now();
        let hash = normalize::source_hash(&query.text);
        rec.set_attribute(span, "provider", provider.name());

        if let Some(cache) = &self.cache {
            match cache.get(&hash).await {
                Ok(Some(vector)) if vector.len() == provider.dim() => {
                    timings.insert("embedding".into(), elapsed_ms(t));
                    rec.end_span(span, SpanStatus::Ok, [("cache", "hit")]);
                    return Some(vector);
                }
                Ok(_) => rec.set_attribute(span, "cache", "miss"),
                Err(e) => {
                    warn!(request_id = %rec.request_id(), store = cache.store_name(), error = %e, "cache lookup failed, treating as miss");
                    rec.set_attribute(span, "cache_error", &e);
                }
            }
        }

        let limit = self.settings.embedding.timeout();
        let result = match tokio::time::timeout(limit, provider.embed(&query.text)).await {
            Ok(r) => r,
            Err(_) => Err(EmbedError::ProviderTimeout(limit)),
        }
        .and_then(|v| {
            if v.len() == provider.dim() {
                Ok(EmbeddingVector { dims: v.dims, source_hash: hash.clone() })
            } else {
                Err(EmbedError::InvalidResponse(format!("expected {} dims, got {}", provider.dim(), v.len())))
            }
        });

        match result {
            Ok(vector) => {
                if let Some(cache) = &self.cache {
                    if let Err(e) = cache.put(&vector).await {
                        warn!(request_id = %rec.request_id(), store = cache.store_name(), error = %e, "cache write failed");
                        rec.set_attribute(span, "cache_error", &e);
                    }
                }
                timings.insert("embedding".into(), elapsed_ms(t));
                rec.end_span(span, SpanStatus::Ok, std::iter::empty::<(String, String)>());
                Some(vector)
            }
            Err(e) => {
                warn!(request_id = %rec.request_id(), provider = provider.name(), error = %e, "embedding failed, continuing lexical-only");
                timings.insert("embedding".into(), elapsed_ms(t));
                rec.end_span(span, SpanStatus::Error, [("embedding_error", e.label().to_string()), ("error", e.to_string())]);
                rec.set_attribute(root, "degraded", "lexical_only");
                None
            }
        }
    }
}

async fn timed<F>(limit: Duration, search: F) -> TimedSearch
where
    F: Future<Output = std::result::Result<Vec<SearchHit>, SearchError>>,
{
    let started = Instant::now();
    let result = match tokio::time::timeout(limit, search).await {
        Ok(r) => r,
        Err(_) => Err(SearchError::Timeout(limit)),
    };
    TimedSearch { result, started, ended: Instant::now() }
}

/// Deliver one event unless the caller has cancelled or gone away.
async fn emit(tx: &mpsc::Sender<StreamEvent>, cancel: &CancelHandle, event: StreamEvent) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(event) => sent.is_ok(),
    }
}

async fn collect(mut rx: mpsc::Receiver<StreamEvent>) -> std::result::Result<AskResponse, PublicError> {
    let mut answer = String::new();
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Chunk { text } => answer.push_str(&text),
            StreamEvent::Done { sources, chunks_used, search_mode, timing_ms } => {
                return Ok(AskResponse { answer, sources, chunks_used, timing_ms, search_mode });
            }
            StreamEvent::Error { error } => return Err(error),
        }
    }
    Err(Error::Internal("answer stream ended without a terminal event".into()).to_public())
}

fn status_for(e: &Error) -> SpanStatus {
    match e {
        Error::Cancelled => SpanStatus::Cancelled,
        _ => SpanStatus::Error,
    }
}

fn log_failure(request_id: &str, e: &Error) {
    match e.kind() {
        ErrorKind::InvalidQuery | ErrorKind::Cancelled => info!(request_id, error = %e, "request ended"),
        _ => warn!(request_id, error = %e, "request failed"),
    }
}

fn elapsed_ms(since: Instant) -> u64 { since.elapsed().as_millis() as u64 }
