//! The span emission seam and its logging implementation.

use crate::span::{HistoricalSpan, SpanContext};

/// Sink for historical spans.
///
/// `emit` is called once per span, parent first. The returned context is
/// what children pass back in as `parent`. Emission never fails from the
/// caller's point of view: exporting, batching and sampling belong to the
/// implementation.
pub trait SpanEmitter: Send + Sync {
    /// Emit a finished span under `parent` (or as a new root).
    fn emit(&self, span: HistoricalSpan, parent: Option<&SpanContext>) -> SpanContext;
}

/// Emitter that writes each span as a structured log event.
///
/// Used when no collector endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEmitter;

impl LogEmitter {
    pub fn new() -> Self {
        Self
    }
}

impl SpanEmitter for LogEmitter {
    fn emit(&self, span: HistoricalSpan, parent: Option<&SpanContext>) -> SpanContext {
        let ctx = SpanContext::child_of(parent);
        let attributes = serde_json::to_string(&span.attributes).unwrap_or_default();

        tracing::info!(
            trace_id = %ctx.trace_id,
            span_id = %ctx.span_id,
            parent_span_id = parent.map(|p| p.span_id.to_string()),
            name = %span.name,
            start = %span.start.to_rfc3339(),
            end = %span.end.to_rfc3339(),
            duration_ms = span.duration_ms(),
            attributes = %attributes,
            "historical span"
        );

        ctx
    }
}
