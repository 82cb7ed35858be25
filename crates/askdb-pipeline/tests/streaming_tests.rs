mod support;

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use askdb_core::types::SourceKind;
use askdb_core::{ErrorKind, QueryRequest};
use askdb_pipeline::{QueryOrchestrator, StreamEvent};
use askdb_trace::SpanStatus;

use support::*;

fn corpus() -> Vec<askdb_core::types::SearchHit> {
    vec![hit("2005.14165#0", 3.0, SourceKind::Lexical, "Language models are few-shot learners when scaled up.")]
}

fn orchestrator(generator: Arc<ScriptedGenerator>, sink: Arc<CapturingSink>, settings: askdb_core::config::Settings) -> QueryOrchestrator {
    QueryOrchestrator::builder(settings)
        .search(Arc::new(ScriptedSearch::lexical(corpus())))
        .generator(generator)
        .trace_sink(sink)
        .build()
        .expect("build")
}

#[tokio::test]
async fn streamed_chunks_concatenate_to_the_answer() {
    let words: Vec<String> = (0..40).map(|i| format!("w{i} ")).collect();
    let generator = Arc::new(ScriptedGenerator::new(words.clone()));
    let orch = orchestrator(generator, Arc::new(CapturingSink::default()), settings());

    let events: Vec<StreamEvent> = orch.ask_stream(QueryRequest::new("few-shot learning")).collect().await;
    let (last, chunks) = events.split_last().expect("events");
    let text: String = chunks
        .iter()
        .map(|e| match e {
            StreamEvent::Chunk { text } => text.as_str(),
            other => panic!("terminal event before the end: {other:?}"),
        })
        .collect();
    assert_eq!(text, words.concat());
    match last {
        StreamEvent::Done { sources, chunks_used, search_mode, .. } => {
            assert_eq!(sources.len(), 1);
            assert_eq!(*chunks_used, 1);
            assert_eq!(search_mode, "bm25");
        }
        other => panic!("expected done, got {other:?}"),
    }

    let answer = orch.ask(QueryRequest::new("few-shot learning")).await.expect("answer");
    assert_eq!(answer.answer, text);
}

#[tokio::test]
async fn cancel_stops_generation_and_marks_trace_cancelled() {
    let generator = Arc::new(ScriptedGenerator::new((0..50).map(|i| format!("t{i} "))).with_delay(Duration::from_millis(20)));
    let sink = Arc::new(CapturingSink::default());
    let mut s = settings();
    s.generation.buffer = 1;
    let orch = orchestrator(generator.clone(), sink.clone(), s);

    let mut stream = orch.ask_stream(QueryRequest::new("few-shot learning"));
    for _ in 0..3 {
        let event = tokio::time::timeout(Duration::from_secs(5), stream.next_event()).await.expect("in time").expect("event");
        assert!(matches!(event, StreamEvent::Chunk { .. }));
    }
    stream.cancel();
    assert!(stream.next_event().await.is_none());

    let trace = &sink.wait_for(1).await[0];
    assert_eq!(trace.root().expect("root").status, SpanStatus::Cancelled);
    assert_eq!(trace.span("generation").expect("span").status, SpanStatus::Cancelled);

    tokio::time::sleep(Duration::from_millis(200)).await;
    let produced = generator.produced();
    assert!(produced < 10, "generator kept producing after cancel: {produced}");
}

#[tokio::test]
async fn dropping_the_stream_cancels_the_request() {
    let generator = Arc::new(ScriptedGenerator::new((0..50).map(|i| format!("t{i} "))).with_delay(Duration::from_millis(20)));
    let sink = Arc::new(CapturingSink::default());
    let orch = orchestrator(generator.clone(), sink.clone(), settings());

    let mut stream = orch.ask_stream(QueryRequest::new("few-shot learning"));
    let first = stream.next_event().await.expect("event");
    assert!(matches!(first, StreamEvent::Chunk { .. }));
    drop(stream);

    let trace = &sink.wait_for(1).await[0];
    assert_eq!(trace.root().expect("root").status, SpanStatus::Cancelled);
    assert!(generator.produced() < 50);
}

#[tokio::test(start_paused = true)]
async fn request_deadline_ends_stream_with_cancelled_error() {
    let generator = Arc::new(ScriptedGenerator::new(["slow ", "answer"]).with_delay(Duration::from_secs(2)));
    let sink = Arc::new(CapturingSink::default());
    let mut s = settings();
    s.generation.request_timeout_ms = 500;
    let orch = orchestrator(generator, sink.clone(), s);

    let events: Vec<StreamEvent> = orch.ask_stream(QueryRequest::new("few-shot learning")).collect().await;
    match events.last().expect("terminal") {
        StreamEvent::Error { error } => assert_eq!(error.kind, ErrorKind::Cancelled),
        other => panic!("expected error, got {other:?}"),
    }
    let trace = &sink.wait_for(1).await[0];
    assert_eq!(trace.root().expect("root").status, SpanStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn non_streaming_ask_surfaces_the_deadline() {
    let generator = Arc::new(ScriptedGenerator::new(["slow ", "answer"]).with_delay(Duration::from_secs(2)));
    let mut s = settings();
    s.generation.request_timeout_ms = 500;
    let orch = orchestrator(generator, Arc::new(CapturingSink::default()), s);

    let err = orch.ask(QueryRequest::new("few-shot learning")).await.expect_err("deadline");
    assert_eq!(err.code, "cancelled");
}

#[tokio::test]
async fn cancel_after_completion_is_a_noop() {
    let generator = Arc::new(ScriptedGenerator::new(["done"]));
    let sink = Arc::new(CapturingSink::default());
    let orch = orchestrator(generator, sink.clone(), settings());

    let mut stream = orch.ask_stream(QueryRequest::new("few-shot learning"));
    let mut terminal = None;
    while let Some(event) = stream.next_event().await {
        terminal = Some(event);
    }
    stream.cancel();
    assert!(matches!(terminal, Some(StreamEvent::Done { .. })));
    let trace = &sink.wait_for(1).await[0];
    assert_eq!(trace.root().expect("root").status, SpanStatus::Ok);
}

#[tokio::test]
async fn validation_error_arrives_as_terminal_event() {
    let orch = orchestrator(Arc::new(ScriptedGenerator::new(["x"])), Arc::new(CapturingSink::default()), settings());
    let events: Vec<StreamEvent> = orch.ask_stream(QueryRequest::new("")).collect().await;
    assert_eq!(events.len(), 1);
    assert!(matches!(&events[0], StreamEvent::Error { error } if error.code == "invalid_query"));
}

#[tokio::test]
async fn concurrent_requests_do_not_interfere() {
    let generator = Arc::new(ScriptedGenerator::new(["a ", "b ", "c"]).with_delay(Duration::from_millis(5)));
    let sink = Arc::new(CapturingSink::default());
    let orch = orchestrator(generator.clone(), sink.clone(), settings());

    let asks = (0..8).map(|i| {
        let orch = orch.clone();
        async move { orch.ask(QueryRequest::new(format!("few-shot learning {i}"))).await }
    });
    let answers = futures::future::join_all(asks).await;
    for answer in answers {
        assert_eq!(answer.expect("answer").answer, "a b c");
    }
    assert_eq!(generator.calls(), 8);
    let traces = sink.wait_for(8).await;
    let mut ids: Vec<&str> = traces.iter().map(|t| t.request_id.as_str()).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 8);
}
