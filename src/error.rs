//! Error types for Dispatchline
//!
//! This module defines the main error type used throughout the dispatch core
//! and the structured domain errors for queue, body-codec, and trigger
//! failures. Everything here is a local, synchronous failure reported to the
//! immediate caller; nothing is fatal to the process and nothing is retried
//! by this crate.

use thiserror::Error;

/// Result type alias for Dispatchline operations
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Structured correlation-queue error domain
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// An entry with this correlation id is already outstanding.
    /// Programmer error upstream; must not corrupt queue state.
    #[error("Queue already has an item with id {0}")]
    DuplicateId(String),

    /// No payload is present for this id (never enqueued, or already
    /// popped). The message is part of the worker-facing contract.
    #[error("Queue has no item with id {0}")]
    UnknownId(String),

    /// A terminal call referenced an id with no live call entry.
    #[error("Queue has no call with id {0}")]
    CallNotFound(String),

    /// The original caller gave up before the terminal call arrived.
    /// The entry is freed regardless.
    #[error("Call with id {0} was cancelled by its caller")]
    CallCancelled(String),

    /// `respond`/`error` arrived for an id that was never popped.
    #[error("No pending request with id {0}")]
    NoPendingRequest(String),

    /// The worker called `write_head` twice on the same response.
    #[error("Headers already sent for id {0}")]
    HeadersAlreadySent(String),
}

/// Structured body-codec error domain
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BodyError {
    #[error("malformed JSON body: {0}")]
    MalformedJson(String),

    #[error("multipart body has no boundary parameter")]
    MissingBoundary,

    #[error("multipart stream ended inside {state}")]
    TruncatedMultipart { state: String },

    #[error("malformed multipart part header: {0}")]
    MalformedPartHeader(String),

    #[error("body of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },
}

/// Structured trigger/enqueuer error domain
#[derive(Debug, Error, Clone)]
pub enum TriggerError {
    /// A subscribe call failed to open its external handle. Surfaced to
    /// the subscriber; other subscriptions are unaffected.
    #[error("subscribe failed for target {target}: {reason}")]
    SubscribeFailed { target: String, reason: String },

    #[error("target {0} has no live registration")]
    NotSubscribed(String),

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("change capture: {0}")]
    Capture(String),
}

impl TriggerError {
    pub fn subscribe_failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SubscribeFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_expression(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidExpression {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

/// Main error type for Dispatchline
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Body error: {0}")]
    Body(#[from] BodyError),

    #[error("Trigger error: {0}")]
    Trigger(#[from] TriggerError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DispatchError {
    /// Create a queue error for a duplicate correlation id
    pub fn duplicate_id(id: impl Into<String>) -> Self {
        DispatchError::Queue(QueueError::DuplicateId(id.into()))
    }

    /// Create a queue error for an unknown correlation id
    pub fn unknown_id(id: impl Into<String>) -> Self {
        DispatchError::Queue(QueueError::UnknownId(id.into()))
    }

    /// Create a queue error for a missing call entry
    pub fn call_not_found(id: impl Into<String>) -> Self {
        DispatchError::Queue(QueueError::CallNotFound(id.into()))
    }

    /// Create a queue error for a cancelled call
    pub fn call_cancelled(id: impl Into<String>) -> Self {
        DispatchError::Queue(QueueError::CallCancelled(id.into()))
    }

    /// Returns true if this error indicates the caller cancelled the call
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DispatchError::Queue(QueueError::CallCancelled(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_id_message_is_verbatim() {
        let err = QueueError::UnknownId("evt-42".to_string());
        assert_eq!(err.to_string(), "Queue has no item with id evt-42");
    }

    #[test]
    fn test_queue_error_wraps_into_dispatch_error() {
        let err: DispatchError = QueueError::DuplicateId("x".into()).into();
        assert_eq!(
            err.to_string(),
            "Queue error: Queue already has an item with id x"
        );
    }

    #[test]
    fn test_is_cancelled() {
        assert!(DispatchError::call_cancelled("a").is_cancelled());
        assert!(!DispatchError::unknown_id("a").is_cancelled());
    }

    #[test]
    fn test_body_error_display() {
        let err = BodyError::TruncatedMultipart {
            state: "Payload".into(),
        };
        assert_eq!(err.to_string(), "multipart stream ended inside Payload");
    }

    #[test]
    fn test_trigger_error_display() {
        let err = TriggerError::subscribe_failed("fn-1", "stream refused");
        assert_eq!(
            err.to_string(),
            "subscribe failed for target fn-1: stream refused"
        );
    }
}
