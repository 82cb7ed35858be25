//! Span tree for one request.
//!
//! The recorder is owned by the request's pipeline and needs no locking.
//! Times are taken from a monotonic clock and converted to wall-clock
//! timestamps only when the trace is finished, so `ended_at >= started_at`
//! always holds. Nesting is enforced on close: ending a span first ends its
//! open descendants, and a span never ends before any of its children.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::debug;

pub type SpanId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpanStatus {
    Ok,
    Error,
    Cancelled,
}

impl SpanStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SpanStatus::Ok => "OK",
            SpanStatus::Error => "ERROR",
            SpanStatus::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug)]
struct SpanRecord {
    id: SpanId,
    parent: Option<SpanId>,
    name: String,
    start: Instant,
    end: Option<Instant>,
    status: Option<SpanStatus>,
    attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceSpan {
    pub span_id: SpanId,
    pub parent_id: Option<SpanId>,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub status: SpanStatus,
    pub attributes: BTreeMap<String, String>,
}

/// A finished trace, ready for export.
#[derive(Debug, Clone, Serialize)]
pub struct Trace {
    pub request_id: String,
    pub spans: Vec<TraceSpan>,
}

impl Trace {
    pub fn root(&self) -> Option<&TraceSpan> { self.spans.iter().find(|s| s.parent_id.is_none()) }

    pub fn span(&self, name: &str) -> Option<&TraceSpan> { self.spans.iter().find(|s| s.name == name) }

    pub fn children(&self, id: SpanId) -> impl Iterator<Item = &TraceSpan> {
        self.spans.iter().filter(move |s| s.parent_id == Some(id))
    }
}

pub struct TraceRecorder {
    request_id: String,
    origin: Instant,
    origin_wall: DateTime<Utc>,
    spans: Vec<SpanRecord>,
}

impl TraceRecorder {
    /// Start a trace whose root span is named `root_name`.
    pub fn new(request_id: impl Into<String>, root_name: &str) -> Self {
        let origin = Instant::now();
        let root = SpanRecord {
            id: 0,
            parent: None,
            name: root_name.to_string(),
            start: origin,
            end: None,
            status: None,
            attributes: BTreeMap::new(),
        };
        Self { request_id: request_id.into(), origin, origin_wall: Utc::now(), spans: vec![root] }
    }

    pub fn request_id(&self) -> &str { &self.request_id }

    pub fn root(&self) -> SpanId { 0 }

    /// Open a child of `parent`. If `parent` has already ended (or is unknown),
    /// the span attaches to its nearest open ancestor instead.
    pub fn start_span(&mut self, name: &str, parent: SpanId) -> SpanId {
        let parent = self.nearest_open(parent);
        let id = self.spans.len() as SpanId;
        self.spans.push(SpanRecord {
            id,
            parent: Some(parent),
            name: name.to_string(),
            start: Instant::now(),
            end: None,
            status: None,
            attributes: BTreeMap::new(),
        });
        id
    }

    pub fn set_attribute(&mut self, id: SpanId, key: &str, value: impl ToString) {
        if let Some(span) = self.spans.get_mut(id as usize) {
            span.attributes.insert(key.to_string(), value.to_string());
        }
    }

    pub fn end_span<I, K, V>(&mut self, id: SpanId, status: SpanStatus, attributes: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.end_span_at(id, status, attributes, Instant::now());
    }

    /// End a span at a time measured elsewhere, e.g. inside a concurrently
    /// running task. The time is clamped into `[start, now]`.
    pub fn end_span_at<I, K, V>(&mut self, id: SpanId, status: SpanStatus, attributes: I, ended: Instant)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let idx = id as usize;
        let Some(span) = self.spans.get(idx) else { return };
        if span.end.is_some() {
            return;
        }
        let now = Instant::now();
        let mut end = ended.min(now).max(span.start);

        // Close open children first, then never end before any child.
        let children: Vec<SpanId> = self.spans.iter().filter(|s| s.parent == Some(id)).map(|s| s.id).collect();
        for child in &children {
            let open = self.spans[*child as usize].end.is_none();
            if open {
                let child_status = if status == SpanStatus::Ok { SpanStatus::Error } else { status };
                self.end_span_at(*child, child_status, [("closed_by_parent", "true")], end);
            }
            if let Some(child_end) = self.spans[*child as usize].end {
                end = end.max(child_end);
            }
        }

        let span = &mut self.spans[idx];
        span.attributes.extend(attributes.into_iter().map(|(k, v)| (k.into(), v.into())));
        span.end = Some(end);
        span.status = Some(status);
        debug!(request_id = %self.request_id, span = %span.name, status = status.as_str(), elapsed_ms = end.duration_since(span.start).as_millis() as u64, "span closed");
    }

    pub fn is_open(&self, id: SpanId) -> bool { self.spans.get(id as usize).is_some_and(|s| s.end.is_none()) }

    /// Close the root (and anything still open) and produce the trace.
    pub fn finish(mut self, status: SpanStatus) -> Trace {
        self.end_span(0, status, std::iter::empty::<(String, String)>());
        let spans = self
            .spans
            .iter()
            .map(|s| {
                let end = s.end.unwrap_or(s.start);
                TraceSpan {
                    span_id: s.id,
                    parent_id: s.parent,
                    name: s.name.clone(),
                    started_at: self.wall(s.start),
                    ended_at: self.wall(end),
                    duration_ms: end.duration_since(s.start).as_millis() as u64,
                    status: s.status.unwrap_or(status),
                    attributes: s.attributes.clone(),
                }
            })
            .collect();
        Trace { request_id: self.request_id, spans }
    }

    fn nearest_open(&self, mut id: SpanId) -> SpanId {
        loop {
            match self.spans.get(id as usize) {
                Some(s) if s.end.is_none() => return id,
                Some(SpanRecord { parent: Some(p), .. }) => id = *p,
                _ => return 0,
            }
        }
    }

    fn wall(&self, at: Instant) -> DateTime<Utc> {
        let offset = at.duration_since(self.origin);
        chrono::Duration::from_std(offset).ok().and_then(|d| self.origin_wall.checked_add_signed(d)).unwrap_or(self.origin_wall)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn none() -> [(String, String); 0] { [] }

    #[test]
    fn spans_nest_and_close_in_order() {
        let mut rec = TraceRecorder::new("req-1", "request");
        let root = rec.root();
        let embed = rec.start_span("embedding", root);
        rec.end_span(embed, SpanStatus::Ok, [("cache", "miss")]);
        let gen = rec.start_span("generation", root);
        std::thread::sleep(Duration::from_millis(2));
        rec.end_span(gen, SpanStatus::Ok, none());
        let trace = rec.finish(SpanStatus::Ok);

        let root = trace.root().expect("root");
        assert_eq!(root.name, "request");
        assert_eq!(trace.children(root.span_id).count(), 2);
        let embed = trace.span("embedding").expect("embedding");
        assert_eq!(embed.attributes["cache"], "miss");
        for s in &trace.spans {
            assert!(s.ended_at >= s.started_at);
            assert!(s.ended_at <= root.ended_at);
        }
    }

    #[test]
    fn closing_parent_closes_open_children() {
        let mut rec = TraceRecorder::new("req-2", "request");
        let gen = rec.start_span("generation", rec.root());
        let trace = rec.finish(SpanStatus::Cancelled);
        let gen = trace.spans.iter().find(|s| s.span_id == gen).expect("gen");
        assert_eq!(gen.status, SpanStatus::Cancelled);
        assert_eq!(gen.attributes["closed_by_parent"], "true");
        assert_eq!(trace.root().expect("root").status, SpanStatus::Cancelled);
    }

    #[test]
    fn end_time_is_clamped_to_children_and_start() {
        let mut rec = TraceRecorder::new("req-3", "request");
        let parent = rec.start_span("retrieval", rec.root());
        let child = rec.start_span("lexical_search", parent);
        std::thread::sleep(Duration::from_millis(2));
        rec.end_span(child, SpanStatus::Ok, none());
        // a stale end time cannot move the parent before its child
        rec.end_span_at(parent, SpanStatus::Ok, none(), Instant::now() - Duration::from_secs(5));
        let trace = rec.finish(SpanStatus::Ok);
        let parent = trace.span("retrieval").expect("parent");
        let child = trace.span("lexical_search").expect("child");
        assert!(parent.ended_at >= child.ended_at);
        assert!(parent.ended_at >= parent.started_at);
    }

    #[test]
    fn start_under_closed_parent_attaches_to_open_ancestor() {
        let mut rec = TraceRecorder::new("req-4", "request");
        let a = rec.start_span("a", rec.root());
        rec.end_span(a, SpanStatus::Ok, none());
        let b = rec.start_span("b", a);
        let trace = rec.finish(SpanStatus::Ok);
        let b = trace.spans.iter().find(|s| s.span_id == b).expect("b");
        assert_eq!(b.parent_id, Some(0));
    }

    #[test]
    fn double_end_is_ignored() {
        let mut rec = TraceRecorder::new("req-5", "request");
        let a = rec.start_span("a", rec.root());
        rec.end_span(a, SpanStatus::Error, [("error", "boom")]);
        rec.end_span(a, SpanStatus::Ok, none());
        assert!(!rec.is_open(a));
        let trace = rec.finish(SpanStatus::Ok);
        assert_eq!(trace.span("a").expect("a").status, SpanStatus::Error);
    }
}
