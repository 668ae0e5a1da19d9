//! Span tree assembly for recorded spans.
//!
//! Rebuilds the run -> job -> step hierarchy from a flat, parent-linked list
//! so it can be printed or returned as JSON.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::recording::RecordedSpan;
use crate::span::{AttributeValue, SpanId, TraceId};

/// A recorded span with its children nested beneath it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanTree {
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_ms: i64,
    pub attributes: BTreeMap<String, AttributeValue>,
    pub children: Vec<SpanTree>,
}

impl SpanTree {
    /// Build one tree per root span.
    ///
    /// Children keep their emission order. Spans whose parent was never
    /// recorded are treated as roots.
    pub fn assemble(spans: &[RecordedSpan]) -> Vec<SpanTree> {
        let known: HashMap<SpanId, usize> = spans
            .iter()
            .enumerate()
            .map(|(i, s)| (s.context.span_id, i))
            .collect();

        let mut children: HashMap<SpanId, Vec<usize>> = HashMap::new();
        let mut roots = Vec::new();
        for (i, s) in spans.iter().enumerate() {
            match s.parent_span_id.filter(|p| known.contains_key(p)) {
                Some(parent) => children.entry(parent).or_default().push(i),
                None => roots.push(i),
            }
        }

        roots
            .into_iter()
            .map(|i| Self::build(spans, i, &children))
            .collect()
    }

    fn build(spans: &[RecordedSpan], index: usize, children: &HashMap<SpanId, Vec<usize>>) -> SpanTree {
        let recorded = &spans[index];
        let nested = children
            .get(&recorded.context.span_id)
            .map(|idx| idx.iter().map(|&c| Self::build(spans, c, children)).collect())
            .unwrap_or_default();

        SpanTree {
            trace_id: recorded.context.trace_id,
            span_id: recorded.context.span_id,
            name: recorded.span.name.clone(),
            start: recorded.span.start,
            end: recorded.span.end,
            duration_ms: recorded.span.duration_ms(),
            attributes: recorded.span.attributes.clone(),
            children: nested,
        }
    }

    /// Total number of spans in this tree, including the root.
    pub fn len(&self) -> usize {
        1 + self.children.iter().map(SpanTree::len).sum::<usize>()
    }

    /// A tree always holds at least its root.
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Render the tree as indented text, one span per line.
    pub fn render(&self) -> String {
        let mut out = String::new();
        self.render_into(&mut out, 0);
        out
    }

    fn render_into(&self, out: &mut String, depth: usize) {
        out.push_str(&format!(
            "{}{} [{} -> {}] {}ms\n",
            "  ".repeat(depth),
            self.name,
            self.start.to_rfc3339(),
            self.end.to_rfc3339(),
            self.duration_ms
        ));
        for child in &self.children {
            child.render_into(out, depth + 1);
        }
    }
}
