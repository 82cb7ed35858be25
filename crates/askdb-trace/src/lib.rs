//! askdb-trace
//!
//! Per-request span trees, best-effort trace export, and process logging setup.

pub mod logging;
pub mod recorder;
pub mod sink;

pub use recorder::{SpanId, SpanStatus, Trace, TraceRecorder, TraceSpan};
pub use sink::{export_detached, sink_from_settings, JsonlFileSink, LogSink, NoopSink, TraceSink};
