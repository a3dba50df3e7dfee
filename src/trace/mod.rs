//! Span/trace data model, trace-context propagation, and the two in-process
//! span consumers: the bounded [`store::TraceStore`] for queries and the
//! [`hub::TraceHub`] for live streaming.

pub mod context;
pub mod hub;
pub mod model;
pub mod store;
pub mod stream;

pub use context::{new_span_id, new_trace_id, traceparent, TRACEPARENT_HEADER};
pub use hub::{HubConfig, HubEvent, Subscription, TraceHub};
pub use model::{Span, SpanStatus, Trace, TraceSummary};
pub use store::TraceStore;
