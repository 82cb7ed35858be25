//! Trace export. Export is best effort: it runs detached from the request,
//! is bounded by a timeout, and a failure is only logged.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use askdb_core::config::{resolve_with_base, TraceSettings, TraceSinkKind};
use askdb_core::error::TraceError;

use crate::recorder::Trace;

#[async_trait]
pub trait TraceSink: Send + Sync {
    fn name(&self) -> &str;
    async fn export(&self, trace: &Trace) -> Result<(), TraceError>;
}

/// Emits one structured log event per trace.
pub struct LogSink;

#[async_trait]
impl TraceSink for LogSink {
    fn name(&self) -> &str { "log" }

    async fn export(&self, trace: &Trace) -> Result<(), TraceError> {
        let spans = serde_json::to_string(&trace.spans).map_err(|e| TraceError::SinkUnavailable(e.to_string()))?;
        let (status, duration_ms) = trace.root().map(|r| (r.status.as_str(), r.duration_ms)).unwrap_or(("UNKNOWN", 0));
        info!(target: "askdb::trace", request_id = %trace.request_id, status, duration_ms, spans = %spans, "trace");
        Ok(())
    }
}

/// Appends one JSON line per trace to a file.
pub struct JsonlFileSink {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonlFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into(), lock: Mutex::new(()) } }

    pub fn path(&self) -> &Path { &self.path }
}

#[async_trait]
impl TraceSink for JsonlFileSink {
    fn name(&self) -> &str { "jsonl" }

    async fn export(&self, trace: &Trace) -> Result<(), TraceError> {
        let unavailable = |e: std::io::Error| TraceError::SinkUnavailable(format!("{}: {e}", self.path.display()));
        let mut line = serde_json::to_vec(trace).map_err(|e| TraceError::SinkUnavailable(e.to_string()))?;
        line.push(b'\n');
        let _guard = self.lock.lock().await;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(unavailable)?;
        }
        let mut file = tokio::fs::OpenOptions::new().create(true).append(true).open(&self.path).await.map_err(unavailable)?;
        file.write_all(&line).await.map_err(unavailable)?;
        file.flush().await.map_err(unavailable)
    }
}

pub struct NoopSink;

#[async_trait]
impl TraceSink for NoopSink {
    fn name(&self) -> &str { "none" }

    async fn export(&self, _trace: &Trace) -> Result<(), TraceError> { Ok(()) }
}

pub fn sink_from_settings(settings: &TraceSettings, base: &Path) -> Arc<dyn TraceSink> {
    match settings.sink {
        TraceSinkKind::Log => Arc::new(LogSink),
        TraceSinkKind::Jsonl => Arc::new(JsonlFileSink::new(resolve_with_base(base, &settings.path))),
        TraceSinkKind::None => Arc::new(NoopSink),
    }
}

/// Export `trace` on a detached task, giving up after `timeout`.
pub fn export_detached(sink: Arc<dyn TraceSink>, trace: Trace, timeout: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::time::timeout(timeout, sink.export(&trace)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(sink = sink.name(), request_id = %trace.request_id, error = %e, "trace export failed"),
            Err(_) => warn!(sink = sink.name(), request_id = %trace.request_id, ?timeout, "trace export timed out"),
        }
    })
}
