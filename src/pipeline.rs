//! Span fan-out shared by the protocol executors and the OTLP ingester.
//!
//! One `TracePipeline` is constructed at process start and handed around by
//! reference. Each recorded span is value-copied into the three sinks: the
//! bounded [`TraceStore`] for queries, the [`TraceHub`] for live streaming,
//! and the [`RecordQueue`] for asynchronous durable writes.

use std::sync::Arc;

use crate::persist::{ExecutionRecord, Record, RecordQueue, SpanRecord};
use crate::trace::hub::TraceHub;
use crate::trace::model::Span;
use crate::trace::store::TraceStore;

#[derive(Clone)]
pub struct TracePipeline {
    store: Arc<TraceStore>,
    hub: Arc<TraceHub>,
    queue: Arc<RecordQueue>,
}

impl TracePipeline {
    pub fn new(store: Arc<TraceStore>, hub: Arc<TraceHub>, queue: Arc<RecordQueue>) -> Self {
        Self { store, hub, queue }
    }

    /// Push one span to all three sinks. None of them can fail or block the
    /// caller; overflow anywhere is logged and dropped by the sink itself.
    pub fn record_span(&self, span: Span) {
        self.store.add_span(span.clone());
        self.hub.publish(span.clone());
        self.queue.enqueue(Record::Span(SpanRecord::new(span)));
    }

    /// Push several spans, preserving order.
    pub fn record_spans(&self, spans: Vec<Span>) {
        for span in spans {
            self.record_span(span);
        }
    }

    /// Queue an execution record for durable write.
    pub fn record_execution(&self, execution: ExecutionRecord) {
        self.queue.enqueue(Record::Execution(execution));
    }

    pub fn store(&self) -> &Arc<TraceStore> {
        &self.store
    }

    pub fn hub(&self) -> &Arc<TraceHub> {
        &self.hub
    }

    pub fn queue(&self) -> &Arc<RecordQueue> {
        &self.queue
    }
}
