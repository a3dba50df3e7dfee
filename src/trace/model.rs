//! Span and trace value types.
//!
//! A [`Span`] is immutable once created and value-copied into every consumer
//! that holds it (store, hub, persistence queue) - there is no shared mutable
//! ownership of span data anywhere in the crate. [`Trace`] and
//! [`TraceSummary`] are derived aggregates recomputed on read from a trace's
//! stored span sequence; they are never stored themselves.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Outcome classification of a span, serialized as `"OK"` / `"ERROR"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpanStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
}

/// A single timed operation within a distributed trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// 16 lowercase hex chars.
    pub span_id: String,
    /// Empty string = this is a root span.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub parent_span_id: String,
    /// 32 lowercase hex chars.
    pub trace_id: String,
    /// Human-readable operation label, e.g. `GET https://...`.
    pub operation: String,
    pub service_name: String,
    /// Unix microseconds.
    pub start_time: i64,
    /// Microseconds; zero is valid.
    pub duration: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SpanStatus>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
}

impl Span {
    /// Whether this span has no parent, i.e. it is the root of its trace.
    pub fn is_root(&self) -> bool {
        self.parent_span_id.is_empty()
    }

    /// End time in unix microseconds.
    pub fn end_time(&self) -> i64 {
        self.start_time + self.duration
    }
}

/// Full derived aggregate over all spans sharing a trace id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_span: Option<Span>,
    /// Arrival order, not causal order.
    pub spans: Vec<Span>,
    /// Distinct service names, in first-seen order.
    pub services: Vec<String>,
    /// max(start + duration) - min(start) across all spans, microseconds.
    pub duration: i64,
    pub span_count: usize,
}

impl Trace {
    /// Recompute the aggregate from a trace's span sequence.
    ///
    /// Returns `None` for an empty sequence: a trace with no spans does not
    /// exist as far as queries are concerned.
    pub fn from_spans(trace_id: &str, spans: &[Span]) -> Option<Self> {
        if spans.is_empty() {
            return None;
        }

        let root_span = spans.iter().find(|s| s.is_root()).cloned();

        let mut services = Vec::new();
        for span in spans {
            if !services.contains(&span.service_name) {
                services.push(span.service_name.clone());
            }
        }

        let min_start = spans.iter().map(|s| s.start_time).min().unwrap_or(0);
        let max_end = spans.iter().map(Span::end_time).max().unwrap_or(0);

        Some(Self {
            trace_id: trace_id.to_string(),
            root_span,
            spans: spans.to_vec(),
            services,
            duration: max_end - min_start,
            span_count: spans.len(),
        })
    }
}

/// One row of the trace list view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceSummary {
    pub trace_id: String,
    /// Root span's operation label, or empty if no root span arrived yet.
    pub root_name: String,
    pub services: Vec<String>,
    pub duration: i64,
    pub span_count: usize,
    /// Earliest span start, unix microseconds.
    pub start_time: i64,
}

impl TraceSummary {
    pub fn from_spans(trace_id: &str, spans: &[Span]) -> Option<Self> {
        let trace = Trace::from_spans(trace_id, spans)?;
        let start_time = trace.spans.iter().map(|s| s.start_time).min().unwrap_or(0);
        Some(Self {
            trace_id: trace.trace_id,
            root_name: trace
                .root_span
                .map(|s| s.operation)
                .unwrap_or_default(),
            services: trace.services,
            duration: trace.duration,
            span_count: trace.span_count,
            start_time,
        })
    }
}
