//! RPC pass-through work queue
//!
//! Lets a sandboxed worker answer an RPC call the host received, without
//! the worker ever holding the live call. The host enqueues the inbound
//! call descriptor together with a handle to the real call; the worker
//! pops the descriptor, computes a response, and sends it back as a JSON
//! payload which the queue forwards to the original call as metadata,
//! then message, then end.
//!
//! Cancellation is checked before anything is forwarded: a call whose
//! originator hung up fails with `CallCancelled` and its entry is freed.

use super::QueueMetrics;
use crate::error::{QueueError, Result};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Inbound call descriptor offered to the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub service: String,
    pub method: String,
    /// Deserialized request payload
    pub payload: serde_json::Value,
}

/// Error a worker reports for an RPC call: status code, message, and
/// optional trailing metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcStatus {
    pub code: u32,
    pub message: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// The live call held by the host. The transport implements this over its
/// actual connection; the queue forwards the worker's response into it.
pub trait RpcCall: Send {
    /// Whether the original caller has given up on the call
    fn is_cancelled(&self) -> bool;

    fn send_metadata(&mut self, metadata: &HashMap<String, String>) -> Result<()>;

    fn send_message(&mut self, message: &serde_json::Value) -> Result<()>;

    /// Complete the call successfully
    fn end(&mut self) -> Result<()>;

    /// Complete the call with a failure status
    fn fail(&mut self, status: &RpcStatus) -> Result<()>;
}

/// Worker response wire shape: optional initial metadata plus the message
#[derive(Debug, Deserialize)]
struct RpcResponsePayload {
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
    message: serde_json::Value,
}

struct RpcEntry {
    request: Option<RpcRequest>,
    call: Box<dyn RpcCall>,
}

/// Correlation table for RPC pass-through calls
pub struct RpcWorkQueue {
    entries: Mutex<HashMap<String, RpcEntry>>,
    metrics: QueueMetrics,
}

impl Default for RpcWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl RpcWorkQueue {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            metrics: QueueMetrics::default(),
        }
    }

    /// Store the inbound call descriptor together with the live call
    pub fn enqueue(&self, id: &str, request: RpcRequest, call: Box<dyn RpcCall>) -> Result<()> {
        let mut entries = self.entries.lock();
        if entries.contains_key(id) {
            return Err(QueueError::DuplicateId(id.to_string()).into());
        }
        entries.insert(
            id.to_string(),
            RpcEntry {
                request: Some(request),
                call,
            },
        );
        self.metrics.record_enqueue();
        debug!(id, "enqueued rpc call");
        Ok(())
    }

    /// Fetch the call descriptor exactly once
    pub fn pop(&self, id: &str) -> Result<RpcRequest> {
        let mut entries = self.entries.lock();
        let request = entries
            .get_mut(id)
            .and_then(|entry| entry.request.take())
            .ok_or_else(|| QueueError::UnknownId(id.to_string()))?;
        self.metrics.record_pop();
        Ok(request)
    }

    /// Forward the worker's JSON response to the original call and remove
    /// the entry. The payload is parsed strictly; a malformed payload
    /// leaves the entry intact so the worker gets the parse error back.
    /// A cancelled call fails with `CallCancelled` and is still removed,
    /// with nothing forwarded.
    pub fn send_response(&self, id: &str, raw: &str) -> Result<()> {
        let payload: RpcResponsePayload = serde_json::from_str(raw)?;

        // Removed regardless of the cancellation outcome below
        let mut entry = {
            let mut entries = self.entries.lock();
            entries
                .remove(id)
                .ok_or_else(|| QueueError::CallNotFound(id.to_string()))?
        };

        if entry.call.is_cancelled() {
            self.metrics.record_cancel();
            return Err(QueueError::CallCancelled(id.to_string()).into());
        }

        if let Some(ref metadata) = payload.metadata {
            entry.call.send_metadata(metadata)?;
        }
        entry.call.send_message(&payload.message)?;
        entry.call.end()?;
        self.metrics.record_resolve();
        debug!(id, "rpc response forwarded");
        Ok(())
    }

    /// Complete the original call with a failure status and remove the
    /// entry. A cancelled call is removed without forwarding anything.
    pub fn send_error(&self, id: &str, status: RpcStatus) -> Result<()> {
        let mut entry = {
            let mut entries = self.entries.lock();
            entries
                .remove(id)
                .ok_or_else(|| QueueError::CallNotFound(id.to_string()))?
        };

        if entry.call.is_cancelled() {
            self.metrics.record_cancel();
            return Err(QueueError::CallCancelled(id.to_string()).into());
        }

        warn!(id, code = status.code, message = %status.message, "rpc call failed");
        entry.call.fail(&status)?;
        self.metrics.record_reject();
        Ok(())
    }

    /// Outstanding entries
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn metrics(&self) -> super::QueueMetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct RecordedCall {
        metadata: Mutex<Option<HashMap<String, String>>>,
        messages: Mutex<Vec<serde_json::Value>>,
        ended: AtomicBool,
        failed: Mutex<Option<RpcStatus>>,
        cancelled: AtomicBool,
    }

    #[derive(Default)]
    struct RecordingCall {
        shared: Arc<RecordedCall>,
    }

    impl RpcCall for RecordingCall {
        fn is_cancelled(&self) -> bool {
            self.shared.cancelled.load(Ordering::SeqCst)
        }

        fn send_metadata(&mut self, metadata: &HashMap<String, String>) -> Result<()> {
            *self.shared.metadata.lock() = Some(metadata.clone());
            Ok(())
        }

        fn send_message(&mut self, message: &serde_json::Value) -> Result<()> {
            self.shared.messages.lock().push(message.clone());
            Ok(())
        }

        fn end(&mut self) -> Result<()> {
            self.shared.ended.store(true, Ordering::SeqCst);
            Ok(())
        }

        fn fail(&mut self, status: &RpcStatus) -> Result<()> {
            *self.shared.failed.lock() = Some(status.clone());
            Ok(())
        }
    }

    fn request() -> RpcRequest {
        RpcRequest {
            service: "search".into(),
            method: "Query".into(),
            payload: serde_json::json!({"q": "widgets"}),
        }
    }

    #[test]
    fn test_response_forwards_metadata_message_end() {
        let queue = RpcWorkQueue::new();
        let call = RecordingCall::default();
        let recorded = call.shared.clone();

        queue.enqueue("rpc-1", request(), Box::new(call)).unwrap();
        let popped = queue.pop("rpc-1").unwrap();
        assert_eq!(popped.method, "Query");

        queue
            .send_response(
                "rpc-1",
                r#"{"metadata":{"x-trace":"t1"},"message":{"hits":3}}"#,
            )
            .unwrap();

        assert_eq!(queue.size(), 0);
        assert_eq!(
            recorded.metadata.lock().as_ref().unwrap().get("x-trace"),
            Some(&"t1".to_string())
        );
        assert_eq!(
            recorded.messages.lock().as_slice(),
            &[serde_json::json!({"hits": 3})]
        );
        assert!(recorded.ended.load(Ordering::SeqCst));
    }

    #[test]
    fn test_cancelled_call_not_forwarded_but_freed() {
        let queue = RpcWorkQueue::new();
        let call = RecordingCall::default();
        let recorded = call.shared.clone();
        queue.enqueue("rpc-1", request(), Box::new(call)).unwrap();

        recorded.cancelled.store(true, Ordering::SeqCst);
        let err = queue
            .send_response("rpc-1", r#"{"message":{"hits":0}}"#)
            .unwrap_err();
        assert!(err.is_cancelled());

        // Cancellation was checked before forwarding
        assert!(recorded.messages.lock().is_empty());
        assert!(!recorded.ended.load(Ordering::SeqCst));
        // Entry was freed regardless
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn test_malformed_response_keeps_entry() {
        let queue = RpcWorkQueue::new();
        queue
            .enqueue("rpc-1", request(), Box::new(RecordingCall::default()))
            .unwrap();

        let err = queue.send_response("rpc-1", "not json").unwrap_err();
        assert!(matches!(err, DispatchError::Serialization(_)));
        assert_eq!(queue.size(), 1);
    }

    #[test]
    fn test_send_error_completes_with_status() {
        let queue = RpcWorkQueue::new();
        let call = RecordingCall::default();
        let recorded = call.shared.clone();
        queue.enqueue("rpc-1", request(), Box::new(call)).unwrap();

        queue
            .send_error(
                "rpc-1",
                RpcStatus {
                    code: 13,
                    message: "handler panicked".into(),
                    metadata: HashMap::new(),
                },
            )
            .unwrap();

        let failed = recorded.failed.lock().clone().unwrap();
        assert_eq!(failed.code, 13);
        assert_eq!(queue.size(), 0);
    }

    #[test]
    fn test_unknown_call_reported() {
        let queue = RpcWorkQueue::new();
        let err = queue
            .send_response("missing", r#"{"message":null}"#)
            .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Queue(QueueError::CallNotFound(_))
        ));
    }
}
