//! Live trace hub: per-trace pub/sub with replay and completion detection.
//!
//! Fans newly published spans out to every subscriber following that trace.
//! The hub keeps its own small per-trace span cache (distinct from the
//! [`TraceStore`](super::store::TraceStore)) purely to replay history to late
//! subscribers.
//!
//! Delivery is non-blocking from the publisher's perspective: a subscriber
//! whose buffer is full misses that span rather than stalling the publisher.
//!
//! ## Completion heuristic
//!
//! There is no protocol-level signal that a trace is finished, so the hub
//! infers it: a background sweeper wakes every [`HubConfig::sweep_interval`]
//! and, once a root span has been seen and the trace has been idle longer
//! than [`HubConfig::idle_timeout`], emits a terminal [`HubEvent::Complete`]
//! to subscribers and purges the trace's cache and state. A trace whose root
//! span never arrives is purged the same way once it is older than
//! [`HubConfig::max_trace_age`], so rootless traffic cannot grow the hub
//! without bound. The sweeper task stops when the hub is dropped.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, trace};

use super::model::Span;

/// Hub tuning knobs.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Per-subscriber delivery buffer; a full buffer drops, never blocks.
    pub subscriber_buffer: usize,
    /// Idle period after the root span before a trace counts as complete.
    pub idle_timeout: Duration,
    /// How often the completion sweeper runs.
    pub sweep_interval: Duration,
    /// Hard cap on how long a trace stays tracked, root span or not.
    pub max_trace_age: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: 50,
            idle_timeout: Duration::from_secs(3),
            sweep_interval: Duration::from_secs(1),
            max_trace_age: Duration::from_secs(300),
        }
    }
}

/// What a subscriber receives: spans as they arrive, then one terminal
/// `Complete` when the hub infers the trace is done.
#[derive(Debug, Clone, PartialEq)]
pub enum HubEvent {
    Span(Span),
    Complete,
}

struct TraceState {
    root_seen: bool,
    first_seen: Instant,
    last_activity: Instant,
}

struct SubscriberSlot {
    id: u64,
    tx: mpsc::Sender<HubEvent>,
}

#[derive(Default)]
struct HubInner {
    subscribers: HashMap<String, Vec<SubscriberSlot>>,
    states: HashMap<String, TraceState>,
    spans: HashMap<String, Vec<Span>>,
    next_subscriber_id: u64,
}

/// Per-trace pub/sub hub. Construct once with [`TraceHub::new`] and share
/// via `Arc`; subscriber registration, cache, and per-trace state all mutate
/// under one lock, so publish and subscribe never race destructively.
pub struct TraceHub {
    inner: Mutex<HubInner>,
    config: HubConfig,
}

impl TraceHub {
    /// Create the hub and spawn its completion sweeper. Must be called from
    /// within a tokio runtime; the sweeper exits when the hub is dropped.
    pub fn new(config: HubConfig) -> Arc<Self> {
        let hub = Arc::new(Self {
            inner: Mutex::new(HubInner::default()),
            config,
        });

        let weak: Weak<TraceHub> = Arc::downgrade(&hub);
        let sweep_interval = hub.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            // First tick fires immediately; skip it so idle math starts clean.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match weak.upgrade() {
                    Some(hub) => hub.sweep(),
                    None => break,
                }
            }
        });

        hub
    }

    /// Register a subscriber for one trace id.
    ///
    /// Spans already cached for the trace are delivered into the channel
    /// before any later publish, in their original arrival order and in
    /// full: the channel is sized to the cached history plus one live
    /// buffer, so only live delivery is ever subject to drop-on-full.
    /// Dropping the returned [`Subscription`] unsubscribes.
    pub fn subscribe(self: &Arc<Self>, trace_id: &str) -> Subscription {
        let mut inner = self.inner.lock().expect("trace hub lock poisoned");

        let cached_len = inner.spans.get(trace_id).map(Vec::len).unwrap_or(0);
        let capacity = (self.config.subscriber_buffer + cached_len).max(1);
        let (tx, rx) = mpsc::channel(capacity);

        let id = inner.next_subscriber_id;
        inner.next_subscriber_id += 1;

        inner
            .subscribers
            .entry(trace_id.to_string())
            .or_default()
            .push(SubscriberSlot { id, tx: tx.clone() });

        // Replay history while the lock is held: publish takes the same lock,
        // so nothing can interleave between replay and live delivery. The
        // capacity covers the whole cache, so these sends cannot fail.
        if let Some(cached) = inner.spans.get(trace_id) {
            for span in cached {
                let _ = tx.try_send(HubEvent::Span(span.clone()));
            }
        }
        drop(inner);

        Subscription {
            id,
            trace_id: trace_id.to_string(),
            rx,
            hub: Arc::downgrade(self),
        }
    }

    /// Remove and close one subscription. Equivalent to dropping it.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    /// Cache a span, refresh the trace's activity state, and deliver it to
    /// every current subscriber for its trace. Never blocks: a subscriber
    /// with a full buffer misses the span.
    pub fn publish(&self, span: Span) {
        let mut inner = self.inner.lock().expect("trace hub lock poisoned");

        inner
            .spans
            .entry(span.trace_id.clone())
            .or_default()
            .push(span.clone());

        let state = inner
            .states
            .entry(span.trace_id.clone())
            .or_insert_with(|| TraceState {
                root_seen: false,
                first_seen: Instant::now(),
                last_activity: Instant::now(),
            });
        state.last_activity = Instant::now();
        if span.is_root() {
            state.root_seen = true;
        }

        if let Some(subs) = inner.subscribers.get(&span.trace_id) {
            for sub in subs {
                if sub.tx.try_send(HubEvent::Span(span.clone())).is_err() {
                    debug!(
                        trace_id = %span.trace_id,
                        subscriber = sub.id,
                        "subscriber buffer full, dropping span"
                    );
                }
            }
        }
    }

    /// Whether the hub currently tracks (caches or has state for) a trace.
    pub fn is_tracking(&self, trace_id: &str) -> bool {
        let inner = self.inner.lock().expect("trace hub lock poisoned");
        inner.spans.contains_key(trace_id) || inner.states.contains_key(trace_id)
    }

    /// Spans currently cached for replay, in arrival order.
    pub fn cached_spans(&self, trace_id: &str) -> Vec<Span> {
        let inner = self.inner.lock().expect("trace hub lock poisoned");
        inner.spans.get(trace_id).cloned().unwrap_or_default()
    }

    /// One sweeper pass: complete and purge every idle trace with a root,
    /// plus any trace that outlived the max age without ever getting one.
    fn sweep(&self) {
        let mut inner = self.inner.lock().expect("trace hub lock poisoned");
        let now = Instant::now();
        let idle = self.config.idle_timeout;
        let max_age = self.config.max_trace_age;

        let finished: Vec<String> = inner
            .states
            .iter()
            .filter(|(_, state)| {
                let idle_done =
                    state.root_seen && now.duration_since(state.last_activity) > idle;
                let aged_out = now.duration_since(state.first_seen) > max_age;
                idle_done || aged_out
            })
            .map(|(id, _)| id.clone())
            .collect();

        for trace_id in finished {
            inner.spans.remove(&trace_id);
            inner.states.remove(&trace_id);
            if let Some(subs) = inner.subscribers.remove(&trace_id) {
                for sub in &subs {
                    let _ = sub.tx.try_send(HubEvent::Complete);
                }
                // Senders drop here, closing every subscriber channel.
            }
            debug!(trace_id = %trace_id, "trace complete, purged from hub");
        }
    }

    fn remove_subscriber(&self, trace_id: &str, id: u64) {
        let mut inner = self.inner.lock().expect("trace hub lock poisoned");
        if let Some(subs) = inner.subscribers.get_mut(trace_id) {
            subs.retain(|s| s.id != id);
            if subs.is_empty() {
                inner.subscribers.remove(trace_id);
            }
            trace!(trace_id, subscriber = id, "unsubscribed");
        }
    }
}

/// One subscriber's receiving end. Dropping it unsubscribes from the hub.
pub struct Subscription {
    id: u64,
    trace_id: String,
    rx: mpsc::Receiver<HubEvent>,
    hub: Weak<TraceHub>,
}

impl Subscription {
    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    /// Next event, or `None` once the channel is closed (trace completed and
    /// purged, or the hub itself is gone).
    pub async fn recv(&mut self) -> Option<HubEvent> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove_subscriber(&self.trace_id, self.id);
        }
    }
}
