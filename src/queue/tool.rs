//! Tool-invocation work queue
//!
//! A pure promise-correlation table for agent tool calls: the host
//! enqueues the tool message under a correlation id, the worker pops it
//! once, runs the tool, and responds with either a result value or an
//! `{"error": …}` object which rejects the waiting continuation with the
//! error's text.
//!
//! Unlike the generic queue, a terminal call here is only legal after the
//! id has been popped: responding to an id that was never popped fails
//! with `NoPendingRequest`.

use super::QueueMetrics;
use crate::error::{DispatchError, QueueError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::debug;

struct ToolEntry {
    /// Present until popped; popping removes the id from the pending-pop
    /// index so a second pop fails with `UnknownId`.
    message: Option<serde_json::Value>,
    popped: bool,
    reply: oneshot::Sender<Result<serde_json::Value>>,
}

/// Correlation table for tool invocations
pub struct ToolWorkQueue {
    entries: Mutex<HashMap<String, ToolEntry>>,
    metrics: QueueMetrics,
}

impl Default for ToolWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolWorkQueue {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            metrics: QueueMetrics::default(),
        }
    }

    /// Store a tool message and hand back the continuation for its result
    pub fn enqueue(
        &self,
        id: &str,
        message: serde_json::Value,
    ) -> Result<oneshot::Receiver<Result<serde_json::Value>>> {
        let mut entries = self.entries.lock();
        if entries.contains_key(id) {
            return Err(QueueError::DuplicateId(id.to_string()).into());
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(
            id.to_string(),
            ToolEntry {
                message: Some(message),
                popped: false,
                reply: tx,
            },
        );
        self.metrics.record_enqueue();
        debug!(id, "enqueued tool invocation");
        Ok(rx)
    }

    /// Fetch the tool message exactly once. The id leaves the pending-pop
    /// index, so both a never-enqueued id and an already-popped id fail
    /// with `UnknownId`.
    pub fn pop(&self, id: &str) -> Result<serde_json::Value> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(id)
            .filter(|entry| entry.message.is_some())
            .ok_or_else(|| QueueError::UnknownId(id.to_string()))?;
        entry.popped = true;
        let message = entry
            .message
            .take()
            .ok_or_else(|| QueueError::UnknownId(id.to_string()))?;
        self.metrics.record_pop();
        Ok(message)
    }

    /// Complete the invocation. A result carrying an `error` key rejects
    /// the continuation with that error's text (non-string error values
    /// are stringified); anything else resolves it.
    /// Fails with `NoPendingRequest` if the id was never popped, and with
    /// `CallCancelled` (entry still freed) if the caller gave up.
    pub fn respond(&self, id: &str, result: serde_json::Value) -> Result<()> {
        let entry = {
            let mut entries = self.entries.lock();
            match entries.get(id) {
                Some(entry) if entry.popped => entries
                    .remove(id)
                    .ok_or_else(|| QueueError::NoPendingRequest(id.to_string()))?,
                // Present but never popped, or absent entirely
                _ => return Err(QueueError::NoPendingRequest(id.to_string()).into()),
            }
        };

        if entry.reply.is_closed() {
            self.metrics.record_cancel();
            return Err(QueueError::CallCancelled(id.to_string()).into());
        }

        let outcome = match result.get("error") {
            Some(err) => {
                self.metrics.record_reject();
                // Non-string error values are stringified as JSON
                let text = match err.as_str() {
                    Some(text) => text.to_string(),
                    None => err.to_string(),
                };
                Err(DispatchError::Worker(text))
            }
            None => {
                self.metrics.record_resolve();
                Ok(result)
            }
        };
        entry
            .reply
            .send(outcome)
            .map_err(|_| DispatchError::from(QueueError::CallCancelled(id.to_string())))?;
        Ok(())
    }

    /// Outstanding entries (enqueued, not yet responded)
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn metrics(&self) -> super::QueueMetricsSnapshot {
        self.metrics.snapshot()
    }
}
