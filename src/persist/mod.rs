//! Asynchronous hand-off to durable storage.
//!
//! The core never writes to a database itself: it enqueues [`Record`]s into
//! a bounded [`RecordQueue`] whose background worker feeds an injected
//! [`RecordWriter`] (the external persistence collaborator). Enqueueing is
//! non-blocking and drops on overflow with a log signal - a stalled database
//! must never stall a live request. [`RecordQueue::shutdown`] drains
//! everything still buffered before the worker exits.

pub mod records;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub use records::{ExecutionRecord, Record, SpanRecord};

/// Default queue depth before records start dropping.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// The injected durable writer. Implementations own connection pooling,
/// retries, and schema; a write error here is logged and the record is lost.
#[async_trait]
pub trait RecordWriter: Send + Sync + 'static {
    async fn write(&self, record: &Record) -> anyhow::Result<()>;
}

/// Bounded async write queue with a single background worker.
pub struct RecordQueue {
    tx: Mutex<Option<mpsc::Sender<Record>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RecordQueue {
    /// Spawn the worker. Must be called from within a tokio runtime.
    pub fn new(writer: Arc<dyn RecordWriter>, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<Record>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                match writer.write(&record).await {
                    Ok(()) => {
                        debug!(kind = record.kind(), id = %record.record_id(), "record persisted")
                    }
                    Err(err) => {
                        warn!(
                            kind = record.kind(),
                            id = %record.record_id(),
                            error = %err,
                            "failed to persist record"
                        )
                    }
                }
            }
        });

        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Queue a record for asynchronous durable write. Never blocks; when the
    /// queue is full (or already shut down) the record is dropped with a
    /// warning.
    pub fn enqueue(&self, record: Record) {
        let guard = self.tx.lock().expect("record queue lock poisoned");
        let Some(tx) = guard.as_ref() else {
            warn!(kind = record.kind(), "record queue shut down, dropping record");
            return;
        };
        if let Err(err) = tx.try_send(record) {
            let record = match err {
                mpsc::error::TrySendError::Full(r) => r,
                mpsc::error::TrySendError::Closed(r) => r,
            };
            warn!(
                kind = record.kind(),
                id = %record.record_id(),
                "record queue full, dropping record"
            );
        }
    }

    /// Stop accepting records, drain everything buffered, and wait for the
    /// worker to exit. Safe to call once during graceful shutdown.
    pub async fn shutdown(&self) {
        let tx = self.tx.lock().expect("record queue lock poisoned").take();
        drop(tx); // closes the channel; the worker drains what remains

        let worker = self
            .worker
            .lock()
            .expect("record queue lock poisoned")
            .take();
        if let Some(handle) = worker {
            let _ = handle.await;
        }
    }
}
