//! Historical span types and emitters for retroactive workflow traces.
//!
//! Spans here describe intervals that already happened: both timestamps come
//! from the CI provider's payloads, never from the clock at emission time.
//!
//! # Span Hierarchy
//!
//! ```text
//! Workflow run (root)
//!   ├─ Queued
//!   └─ Job (one per job)
//!       └─ Step (one per step)
//! ```
//!
//! # Usage
//!
//! 1. Pick a `SpanEmitter`: `LogEmitter`, `RecordingEmitter`, or `OtlpEmitter`
//!    (feature `otlp`).
//! 2. Emit each span with its parent's `SpanContext`.
//! 3. With `RecordingEmitter`, use `trees()` to get the assembled `SpanTree`.

pub mod emitter;
#[cfg(feature = "otlp")]
pub mod otlp;
pub mod recording;
pub mod span;
pub mod tree;

pub use emitter::{LogEmitter, SpanEmitter};
#[cfg(feature = "otlp")]
pub use otlp::{OtlpEmitter, OtlpError};
pub use recording::{RecordedSpan, RecordingEmitter};
pub use span::{AttributeValue, HistoricalSpan, SpanContext, SpanId, TraceId};
pub use tree::SpanTree;
