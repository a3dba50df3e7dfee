//! Protocol executors: outbound REST, GraphQL, and gRPC calls with tracing.
//!
//! Shared shape: every executor takes a target description, generates fresh
//! trace context, injects the `traceparent` carrier, runs the call under a
//! 30-second timeout, and reports what happened. Upstream failures (HTTP
//! error statuses, connection failures, RPC errors) live inside the `Ok`
//! envelope - `Err` is reserved for malformed input that aborts the call
//! before any network I/O. Every execution emits its root span through the
//! [`TracePipeline`](crate::pipeline::TracePipeline) and queues an
//! execution record for durable storage.

pub mod graphql;
pub mod grpc;
pub mod rest;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use graphql::GraphqlExecutor;
pub use grpc::{GrpcExecutor, GrpcRequest, GrpcResponse, InvokeError};
pub use rest::RestExecutor;

/// Absolute per-call timeout for all outbound protocol calls.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Client-input errors: the call is aborted before any network I/O.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("invalid HTTP method '{0}'")]
    InvalidMethod(String),

    #[error("invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("invalid header '{0}'")]
    InvalidHeader(String),

    #[error("failed to encode request body: {0}")]
    BodyEncode(String),
}

/// Fine-grained HTTP timing phases, microseconds. Phases the client cannot
/// observe are reported as zero and produce no child span.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimingInfo {
    pub dns_lookup_us: i64,
    pub tcp_connect_us: i64,
    pub tls_handshake_us: i64,
    /// Request sent until first response byte.
    pub server_processing_us: i64,
    /// First response byte until body fully read.
    pub content_transfer_us: i64,
}

/// Outbound REST call description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Saved-request id passed through to the execution record.
    #[serde(default)]
    pub request_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestResponse {
    #[serde(rename = "request_duration")]
    pub duration: String,
    #[serde(rename = "status")]
    pub status_code: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
    #[serde(rename = "error_msg")]
    pub error: String,
    pub response_size: i64,
    pub request_size: i64,
    pub timing: TimingInfo,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub execution_id: String,
    pub trace_id: String,
    pub span_id: String,
    /// Local spans captured for this request.
    pub spans: Vec<crate::trace::model::Span>,
}

/// Outbound GraphQL call description (GraphQL-over-HTTP POST).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphqlRequest {
    pub url: String,
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    pub operation_name: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub request_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphqlResponse {
    #[serde(rename = "request_duration")]
    pub duration: String,
    #[serde(rename = "status")]
    pub status_code: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
    #[serde(rename = "error_msg")]
    pub error: String,
    pub response_size: i64,
    pub request_size: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub request_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub execution_id: String,
    pub trace_id: String,
    pub span_id: String,
    pub spans: Vec<crate::trace::model::Span>,
}

/// Format a wall-clock duration the way every response envelope reports it.
pub(crate) fn duration_label(elapsed: Duration) -> String {
    format!("{}ms", elapsed.as_millis())
}

/// Flatten multi-valued HTTP headers into `", "`-joined single values.
pub(crate) fn flatten_headers(headers: &reqwest::header::HeaderMap) -> HashMap<String, String> {
    let mut flat = HashMap::new();
    for key in headers.keys() {
        let joined = headers
            .get_all(key)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect::<Vec<_>>()
            .join(", ");
        flat.insert(key.to_string(), joined);
    }
    flat
}
