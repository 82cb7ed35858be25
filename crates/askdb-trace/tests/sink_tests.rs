use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use askdb_core::error::TraceError;
use askdb_trace::{export_detached, JsonlFileSink, SpanStatus, Trace, TraceRecorder, TraceSink};

fn sample_trace(id: &str) -> Trace {
    let mut rec = TraceRecorder::new(id, "request");
    let s = rec.start_span("lexical_search", rec.root());
    rec.end_span(s, SpanStatus::Ok, [("hits", "2")]);
    rec.finish(SpanStatus::Ok)
}

#[tokio::test]
async fn jsonl_sink_appends_one_line_per_trace() {
    let tmp = tempfile::tempdir().expect("tmp");
    let sink = JsonlFileSink::new(tmp.path().join("nested/traces.jsonl"));
    sink.export(&sample_trace("a")).await.expect("export a");
    sink.export(&sample_trace("b")).await.expect("export b");

    let content = std::fs::read_to_string(sink.path()).expect("read");
    let lines: Vec<serde_json::Value> = content.lines().map(|l| serde_json::from_str(l).expect("json")).collect();
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1]["request_id"], "b");
    assert_eq!(lines[0]["spans"][1]["name"], "lexical_search");
    assert_eq!(lines[0]["spans"][0]["status"], "OK");
}

struct BrokenSink(AtomicUsize);

#[async_trait]
impl TraceSink for BrokenSink {
    fn name(&self) -> &str { "broken" }

    async fn export(&self, _trace: &Trace) -> Result<(), TraceError> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Err(TraceError::SinkUnavailable("collector down".into()))
    }
}

struct HangingSink;

#[async_trait]
impl TraceSink for HangingSink {
    fn name(&self) -> &str { "hanging" }

    async fn export(&self, _trace: &Trace) -> Result<(), TraceError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

#[tokio::test]
async fn failing_export_is_swallowed() {
    let sink = Arc::new(BrokenSink(AtomicUsize::new(0)));
    export_detached(sink.clone(), sample_trace("c"), Duration::from_millis(100)).await.expect("task does not panic");
    assert_eq!(sink.0.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn hanging_export_is_bounded() {
    let handle = export_detached(Arc::new(HangingSink), sample_trace("d"), Duration::from_millis(100));
    tokio::time::timeout(Duration::from_secs(1), handle).await.expect("bounded").expect("join");
}
