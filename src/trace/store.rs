//! Bounded in-memory trace store.
//!
//! Maps trace id -> append-ordered span sequence, with a parallel
//! most-recent-first recency list bounding the number of retained traces.
//! This is a live-view cache, not durable storage: under capacity pressure
//! the oldest whole trace is silently evicted, and the store itself never
//! errors. Durable writes go through [`crate::persist`] instead.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use tracing::debug;

use super::model::{Span, Trace, TraceSummary};

/// Default number of summaries returned by the list endpoint when the caller
/// does not pass a limit. Clamping is the boundary layer's job; the store
/// only exposes the agreed constants.
pub const DEFAULT_LIST_LIMIT: usize = 50;
/// Hard cap a boundary layer should clamp list requests to.
pub const MAX_LIST_LIMIT: usize = 100;

/// Default number of distinct traces retained before eviction starts.
pub const DEFAULT_CAPACITY: usize = 500;

struct StoreInner {
    /// trace id -> spans in arrival order.
    spans: HashMap<String, Vec<Span>>,
    /// Most-recently-arrived trace ids, front = newest. Ordered by arrival
    /// of a trace's first span, not by span timestamps.
    order: VecDeque<String>,
}

/// Concurrent bounded trace index.
///
/// A single lock guards both maps so the recency list and the span map
/// always mutate together atomically; readers see a consistent snapshot of
/// any trace's span sequence.
pub struct TraceStore {
    inner: RwLock<StoreInner>,
    capacity: usize,
}

impl TraceStore {
    /// Create a store retaining at most `capacity` distinct traces.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(StoreInner {
                spans: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity: capacity.max(1),
        }
    }

    /// Append a span to its trace, inserting the trace at the front of the
    /// recency list if it is new and evicting the oldest trace when over
    /// capacity. Eviction unit is a whole trace, never a single span.
    pub fn add_span(&self, span: Span) {
        let mut inner = self.inner.write().expect("trace store lock poisoned");

        if !inner.spans.contains_key(&span.trace_id) {
            inner.order.push_front(span.trace_id.clone());
            if inner.order.len() > self.capacity {
                if let Some(evicted) = inner.order.pop_back() {
                    inner.spans.remove(&evicted);
                    debug!(trace_id = %evicted, "trace store at capacity, evicted oldest trace");
                }
            }
        }

        inner
            .spans
            .entry(span.trace_id.clone())
            .or_default()
            .push(span);
    }

    /// Append several spans, preserving the given order.
    pub fn add_spans(&self, spans: Vec<Span>) {
        for span in spans {
            self.add_span(span);
        }
    }

    /// Recompute and return the full aggregate for one trace, or `None` if
    /// no spans are stored under that id.
    pub fn get_trace(&self, trace_id: &str) -> Option<Trace> {
        let inner = self.inner.read().expect("trace store lock poisoned");
        let spans = inner.spans.get(trace_id)?;
        Trace::from_spans(trace_id, spans)
    }

    /// Up to `limit` most-recently-arrived traces, newest first.
    pub fn list_traces(&self, limit: usize) -> Vec<TraceSummary> {
        let inner = self.inner.read().expect("trace store lock poisoned");
        inner
            .order
            .iter()
            .take(limit)
            .filter_map(|id| {
                inner
                    .spans
                    .get(id)
                    .and_then(|spans| TraceSummary::from_spans(id, spans))
            })
            .collect()
    }

    /// Number of currently retained traces.
    pub fn len(&self) -> usize {
        self.inner.read().expect("trace store lock poisoned").order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TraceStore {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap as Map;

    fn span(trace: &str, span_id: &str, parent: &str, start: i64) -> Span {
        Span {
            span_id: span_id.into(),
            parent_span_id: parent.into(),
            trace_id: trace.into(),
            operation: format!("op-{span_id}"),
            service_name: "svc".into(),
            start_time: start,
            duration: 10,
            status: None,
            tags: Map::new(),
        }
    }

    #[test]
    fn added_span_is_reported_with_correct_count() {
        let store = TraceStore::new(10);
        store.add_span(span("t1", "a", "", 100));
        store.add_span(span("t1", "b", "a", 110));

        let trace = store.get_trace("t1").unwrap();
        assert_eq!(trace.span_count, 2);
        assert!(trace.spans.iter().any(|s| s.span_id == "a"));
        assert!(trace.spans.iter().any(|s| s.span_id == "b"));
    }

    #[test]
    fn missing_trace_is_none() {
        let store = TraceStore::new(10);
        assert!(store.get_trace("nope").is_none());
    }

    #[test]
    fn eviction_drops_oldest_whole_trace() {
        let store = TraceStore::new(3);
        for i in 0..4 {
            // Two spans each, so eviction is clearly per-trace not per-span
            store.add_span(span(&format!("t{i}"), "a", "", 100));
            store.add_span(span(&format!("t{i}"), "b", "a", 110));
        }

        assert!(store.get_trace("t0").is_none());
        for i in 1..4 {
            assert_eq!(store.get_trace(&format!("t{i}")).unwrap().span_count, 2);
        }
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn list_orders_by_arrival_of_first_span() {
        let store = TraceStore::new(10);
        store.add_span(span("t1", "a", "", 999)); // late timestamp, early arrival
        store.add_span(span("t2", "a", "", 1));
        // Extra span for t1 must not move it to the front
        store.add_span(span("t1", "b", "a", 2));

        let list = store.list_traces(10);
        let ids: Vec<_> = list.iter().map(|t| t.trace_id.as_str()).collect();
        assert_eq!(ids, vec!["t2", "t1"]);
    }

    #[test]
    fn list_respects_limit() {
        let store = TraceStore::new(10);
        for i in 0..5 {
            store.add_span(span(&format!("t{i}"), "a", "", i));
        }
        assert_eq!(store.list_traces(2).len(), 2);
    }

    #[test]
    fn concurrent_writers_do_not_lose_spans() {
        use std::sync::Arc;

        let store = Arc::new(TraceStore::new(16));
        let mut handles = Vec::new();
        for w in 0..8 {
            let store = Arc::clone(&store);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    store.add_span(span("shared", &format!("{w}-{i}"), "", i));
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(store.get_trace("shared").unwrap().span_count, 800);
    }
}
