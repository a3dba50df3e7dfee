//! Records handed to the durable-write queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::trace::model::Span;

/// A span destined for durable storage, with its own row id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpanRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub span: Span,
}

impl SpanRecord {
    pub fn new(span: Span) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            span,
        }
    }
}

/// One executed protocol call: ties a saved request to its trace and outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Caller-supplied id of the saved request definition, if any.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    pub trace_id: String,
    /// HTTP status for REST/GraphQL, gRPC status code for gRPC.
    pub status_code: i32,
    pub latency_ms: i64,
}

impl ExecutionRecord {
    pub fn new(request_id: &str, trace_id: &str, status_code: i32, latency_ms: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            request_id: request_id.to_string(),
            trace_id: trace_id.to_string(),
            status_code,
            latency_ms,
        }
    }
}

/// Everything the durable-write queue accepts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Record {
    Span(SpanRecord),
    Execution(ExecutionRecord),
}

impl Record {
    /// Short type label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Record::Span(_) => "Span",
            Record::Execution(_) => "Execution",
        }
    }

    /// The record's own unique id.
    pub fn record_id(&self) -> &str {
        match self {
            Record::Span(r) => &r.id,
            Record::Execution(r) => &r.id,
        }
    }
}
