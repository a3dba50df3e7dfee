//! Tracebridge - protocol-execution and distributed-tracing relay.
//!
//! Executes outbound REST, GraphQL, and gRPC calls on behalf of a client,
//! instruments every call with W3C-style trace context, and runs a small
//! OTLP-compatible tracing backend: ingestion, bounded in-memory storage,
//! and live per-trace streaming.
//!
//! ## Architecture
//!
//! ```text
//! executors (REST / GraphQL / gRPC)      OTLP peers
//!        │                                   │
//!        │ spans                             │ protobuf | JSON
//!        ▼                                   ▼
//!   TracePipeline ◄──────────────────── Ingester
//!     ├── TraceStore   (bounded, evicting, query)
//!     ├── TraceHub     (live pub/sub, completion detection)
//!     └── RecordQueue  (async durable-write hand-off, drop-on-full)
//! ```
//!
//! All shared components are constructed once at process start and injected
//! by reference; nothing in this crate is global state. HTTP routing, config
//! loading, and the durable store behind [`persist::RecordWriter`] are
//! external collaborators.

pub mod exec;
pub mod ingest;
pub mod persist;
pub mod pipeline;
pub mod trace;

pub use exec::{GraphqlExecutor, GrpcExecutor, RestExecutor};
pub use pipeline::TracePipeline;
pub use trace::hub::{HubConfig, HubEvent, Subscription, TraceHub};
pub use trace::model::{Span, SpanStatus, Trace, TraceSummary};
pub use trace::store::TraceStore;

/// Service name attached to every span this process emits for its own calls.
pub const SERVICE_NAME: &str = "tracebridge";
