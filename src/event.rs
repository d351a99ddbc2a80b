//! Target and event model
//!
//! A [`Target`] identifies one function-handler pair; an [`Event`] is the
//! minimal dispatch token (correlation id, kind, target) that wakes the
//! worker assigned to that target. The full payload stays behind in the
//! matching work queue until the worker pops it by id.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one function handler: a working directory plus a handler
/// name inside it.
///
/// Lifecycle operations (subscribe/unsubscribe, batch membership) compare
/// targets structurally by `cwd` + `handler`; the `id` is the worker-pool
/// slot key and does not participate in equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    /// Worker-pool slot id for this target
    pub id: String,
    /// Working directory of the function source
    pub cwd: String,
    /// Handler (exported entry point) name
    pub handler: String,
}

impl Target {
    pub fn new(id: impl Into<String>, cwd: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            cwd: cwd.into(),
            handler: handler.into(),
        }
    }
}

impl PartialEq for Target {
    fn eq(&self, other: &Self) -> bool {
        self.cwd == other.cwd && self.handler == other.handler
    }
}

impl Eq for Target {}

impl std::hash::Hash for Target {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.cwd.hash(state);
        self.handler.hash(state);
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.cwd, self.handler)
    }
}

/// The class of work an event carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    /// Inbound HTTP call with a streamed response
    Http,
    /// Captured database mutation
    Database,
    /// Cron tick
    Schedule,
    /// Process-ready batch dispatch
    System,
    /// Tool invocation on behalf of an agent
    AgentTool,
}

impl EventKind {
    /// Stable wire name, matching the serde representation
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Http => "HTTP",
            EventKind::Database => "DATABASE",
            EventKind::Schedule => "SCHEDULE",
            EventKind::System => "SYSTEM",
            EventKind::AgentTool => "AGENT_TOOL",
        }
    }
}

/// Minimal dispatch token: the worker learns that work with this id and
/// kind is ready for its target, then pops the payload by id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Correlation id, unique among outstanding entries of this kind
    pub id: String,
    /// What class of payload is waiting
    pub kind: EventKind,
    /// The function handler this work is for
    pub target: Target,
}

impl Event {
    /// Create an event with a fresh v4 correlation id
    pub fn new(kind: EventKind, target: Target) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            target,
        }
    }

    /// Create an event with a caller-supplied correlation id
    pub fn with_id(id: impl Into<String>, kind: EventKind, target: Target) -> Self {
        Self {
            id: id.into(),
            kind,
            target,
        }
    }
}
