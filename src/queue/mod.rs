//! Correlation work queues
//!
//! The dispatch core hands work to out-of-process workers through
//! correlation tables: the trigger side enqueues a payload under a
//! correlation id together with a continuation, the worker pops the
//! payload by id over its request/response channel, and exactly one
//! terminal call (`respond` or `error`) completes the continuation and
//! frees the entry.
//!
//! [`WorkQueue`] is the generic table; [`http`], [`rpc`], and [`tool`]
//! specialize it for streamed HTTP responses, RPC pass-through calls, and
//! tool invocations.
//!
//! # Cancellation
//!
//! The enqueuing caller holds a `oneshot::Receiver` as its continuation.
//! Dropping that receiver is cancellation: any later terminal call fails
//! with `CallCancelled` and the entry is still removed, so late workers
//! get an error instead of a hang.

pub mod http;
pub mod rpc;
pub mod tool;

use crate::error::{DispatchError, QueueError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tracing::debug;

/// Counters for one work queue. Snapshots are cheap and lock-free.
#[derive(Debug, Default)]
pub struct QueueMetrics {
    enqueued: AtomicU64,
    popped: AtomicU64,
    resolved: AtomicU64,
    rejected: AtomicU64,
    cancelled: AtomicU64,
    withdrawn: AtomicU64,
}

/// Point-in-time copy of [`QueueMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetricsSnapshot {
    pub enqueued: u64,
    pub popped: u64,
    pub resolved: u64,
    pub rejected: u64,
    /// Terminal calls that found the caller gone
    pub cancelled: u64,
    /// Entries withdrawn by the owning side before any terminal call
    pub withdrawn: u64,
}

impl QueueMetrics {
    pub fn snapshot(&self) -> QueueMetricsSnapshot {
        QueueMetricsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            popped: self.popped.load(Ordering::Relaxed),
            resolved: self.resolved.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            withdrawn: self.withdrawn.load(Ordering::Relaxed),
        }
    }

    fn record_enqueue(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    fn record_pop(&self) {
        self.popped.fetch_add(1, Ordering::Relaxed);
    }

    fn record_resolve(&self) {
        self.resolved.fetch_add(1, Ordering::Relaxed);
    }

    fn record_reject(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    fn record_cancel(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    fn record_withdraw(&self) {
        self.withdrawn.fetch_add(1, Ordering::Relaxed);
    }
}

/// One outstanding unit of work: the payload the worker will pop and the
/// continuation the terminal call completes.
struct QueueEntry<P, R> {
    /// Present until the worker pops (or the owner dequeues) it
    payload: Option<P>,
    /// Resolved or rejected exactly once by the terminal call
    reply: oneshot::Sender<Result<R>>,
}

/// Generic correlation table keyed by event id.
///
/// Map mutations are atomic under one mutex; entries for different ids
/// never block each other beyond map access.
pub struct WorkQueue<P, R> {
    entries: Mutex<HashMap<String, QueueEntry<P, R>>>,
    metrics: QueueMetrics,
}

impl<P, R> Default for WorkQueue<P, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P, R> WorkQueue<P, R> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            metrics: QueueMetrics::default(),
        }
    }

    /// Store a payload under `id` and hand back the continuation the
    /// caller awaits. Fails with `DuplicateId` if `id` is already
    /// outstanding, leaving the existing entry untouched.
    pub fn enqueue(&self, id: &str, payload: P) -> Result<oneshot::Receiver<Result<R>>> {
        let mut entries = self.entries.lock();
        if entries.contains_key(id) {
            return Err(QueueError::DuplicateId(id.to_string()).into());
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(
            id.to_string(),
            QueueEntry {
                payload: Some(payload),
                reply: tx,
            },
        );
        self.metrics.record_enqueue();
        debug!(id, size = entries.len(), "enqueued work item");
        Ok(rx)
    }

    /// Fetch the payload for `id`. The payload is handed out once; the
    /// entry and its continuation stay in the table until a terminal
    /// call. A second pop, or a pop for an id never enqueued, fails with
    /// `UnknownId`.
    pub fn pop(&self, id: &str) -> Result<P> {
        let mut entries = self.entries.lock();
        let payload = entries
            .get_mut(id)
            .and_then(|entry| entry.payload.take())
            .ok_or_else(|| QueueError::UnknownId(id.to_string()))?;
        self.metrics.record_pop();
        Ok(payload)
    }

    /// Withdraw the entry without invoking the continuation. Used by the
    /// owning side when the original call goes away before the worker
    /// touches it. Returns the payload if the worker had not popped it.
    pub fn dequeue(&self, id: &str) -> Result<Option<P>> {
        let mut entries = self.entries.lock();
        let entry = entries
            .remove(id)
            .ok_or_else(|| QueueError::UnknownId(id.to_string()))?;
        self.metrics.record_withdraw();
        debug!(id, "dequeued work item");
        Ok(entry.payload)
    }

    /// Resolve the continuation for `id` with `value` and remove the
    /// entry. Fails with `CallNotFound` if the id has no entry and with
    /// `CallCancelled` (entry still removed) if the caller gave up.
    pub fn respond(&self, id: &str, value: R) -> Result<()> {
        let entry = self.take_entry(id)?;
        if entry.reply.is_closed() {
            self.metrics.record_cancel();
            return Err(QueueError::CallCancelled(id.to_string()).into());
        }
        entry
            .reply
            .send(Ok(value))
            .map_err(|_| DispatchError::from(QueueError::CallCancelled(id.to_string())))?;
        self.metrics.record_resolve();
        Ok(())
    }

    /// Reject the continuation for `id` with `err` and remove the entry.
    /// Same `CallNotFound`/`CallCancelled` semantics as [`respond`].
    ///
    /// [`respond`]: WorkQueue::respond
    pub fn error(&self, id: &str, err: DispatchError) -> Result<()> {
        let entry = self.take_entry(id)?;
        if entry.reply.is_closed() {
            self.metrics.record_cancel();
            return Err(QueueError::CallCancelled(id.to_string()).into());
        }
        entry
            .reply
            .send(Err(err))
            .map_err(|_| DispatchError::from(QueueError::CallCancelled(id.to_string())))?;
        self.metrics.record_reject();
        Ok(())
    }

    /// Number of outstanding entries: enqueued but not yet completed by a
    /// terminal call or dequeue. `pop` does not change the size.
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether `id` has an outstanding entry
    pub fn contains(&self, id: &str) -> bool {
        self.entries.lock().contains_key(id)
    }

    /// Metrics counters for this queue
    pub fn metrics(&self) -> QueueMetricsSnapshot {
        self.metrics.snapshot()
    }

    fn take_entry(&self, id: &str) -> Result<QueueEntry<P, R>> {
        self.entries
            .lock()
            .remove(id)
            .ok_or_else(|| QueueError::CallNotFound(id.to_string()).into())
    }
}
