//! Trace-context identifier generation and the W3C `traceparent` carrier.
//!
//! Every outbound call (REST, GraphQL, gRPC) injects one carrier entry so
//! the target can join the caller's trace. Identifiers are drawn from a
//! random UUID per call; generation never fails and never blocks. Inbound
//! OTLP data keeps the ids assigned by its origin - nothing here regenerates
//! them.

use uuid::Uuid;

/// Header / metadata key carrying trace context across call boundaries.
pub const TRACEPARENT_HEADER: &str = "traceparent";

/// Generate a trace id: 32 lowercase hex chars (16 random bytes).
pub fn new_trace_id() -> String {
    hex::encode(Uuid::new_v4().as_bytes())
}

/// Generate a span id: 16 lowercase hex chars (8 random bytes).
pub fn new_span_id() -> String {
    hex::encode(&Uuid::new_v4().as_bytes()[..8])
}

/// Format the `traceparent` value: `00-{trace_id}-{span_id}-01`.
///
/// Version `00`, sampled flag always set.
pub fn traceparent(trace_id: &str, span_id: &str) -> String {
    format!("00-{trace_id}-{span_id}-01")
}
