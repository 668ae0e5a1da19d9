//! In-memory emitter that keeps every span it is handed.

use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};

use crate::emitter::SpanEmitter;
use crate::span::{HistoricalSpan, SpanContext, SpanId};
use crate::tree::SpanTree;

/// A span as it was emitted, with its identity and parent link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedSpan {
    pub context: SpanContext,
    pub parent_span_id: Option<SpanId>,
    pub span: HistoricalSpan,
}

/// Emitter that records spans in emission order.
///
/// Backs the `replay` command and is the emitter of choice in tests.
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    spans: Mutex<Vec<RecordedSpan>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<RecordedSpan>> {
        self.spans.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Snapshot of all recorded spans, in emission order.
    pub fn spans(&self) -> Vec<RecordedSpan> {
        self.lock().clone()
    }

    /// Number of spans recorded so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// First recorded span with the given name.
    pub fn find(&self, name: &str) -> Option<RecordedSpan> {
        self.lock().iter().find(|s| s.span.name == name).cloned()
    }

    /// Recorded children of `parent`, in emission order.
    pub fn children_of(&self, parent: SpanId) -> Vec<RecordedSpan> {
        self.lock()
            .iter()
            .filter(|s| s.parent_span_id == Some(parent))
            .cloned()
            .collect()
    }

    /// Drain the recorded spans.
    pub fn take(&self) -> Vec<RecordedSpan> {
        std::mem::take(&mut *self.lock())
    }

    /// Assemble the recorded spans into trees, one per root.
    pub fn trees(&self) -> Vec<SpanTree> {
        SpanTree::assemble(&self.lock())
    }
}

impl SpanEmitter for RecordingEmitter {
    fn emit(&self, span: HistoricalSpan, parent: Option<&SpanContext>) -> SpanContext {
        let context = SpanContext::child_of(parent);
        self.lock().push(RecordedSpan {
            context,
            parent_span_id: parent.map(|p| p.span_id),
            span,
        });
        context
    }
}
