//! Trigger enqueuers
//!
//! An enqueuer translates one class of external trigger into events plus
//! work-queue payloads: [`database`] watches change-capture streams,
//! [`schedule`] listens for cron ticks, and [`system`] batches
//! process-ready signals behind a debounce window.
//!
//! All enqueuers share the same lifecycle contract: `subscribe(target,
//! options)` registers interest and opens whatever external handle the
//! trigger needs; `unsubscribe(target)` tears down exactly that target's
//! registration, closes its handles, and invokes the worker-pool release
//! hook with the target's slot id. An enqueuer never produces work for a
//! target without a live registration.
//!
//! This module holds the seams to the external collaborators: the
//! change-capture source, the cron scheduler, and the worker pool.

pub mod database;
pub mod schedule;
pub mod system;

use crate::error::Result;
use crate::event::Event;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Worker pool seam: wakes the worker assigned to an event's target and
/// reclaims slots for unsubscribed targets. Spawning and pooling live
/// entirely behind this trait.
pub trait WorkerPool: Send + Sync {
    /// Signal that work with this event's id is ready for its target
    fn wake(&self, event: &Event);

    /// Reclaim the slot for a target that unsubscribed
    fn release(&self, target_id: &str);
}

/// Hook an enqueuer invokes with a target's slot id on unsubscribe.
/// Captured once at construction; may be a no-op when no pool exists.
pub type ReleaseHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Release hook that does nothing, for embedders without a worker pool
pub fn noop_release() -> ReleaseHook {
    Arc::new(|_| {})
}

/// Release hook backed by a worker pool's `release`
pub fn pool_release(pool: Arc<dyn WorkerPool>) -> ReleaseHook {
    Arc::new(move |target_id| pool.release(target_id))
}

/// The database mutation kinds this core dispatches on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    /// Parse a change-capture operation type string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "insert" => Some(Self::Insert),
            "update" | "replace" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

/// Filter scoping one change-capture handle to a collection and kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeFilter {
    pub collection: String,
    pub kind: ChangeKind,
}

/// One ordered notification from a change-capture stream
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeNotification {
    pub operation: ChangeKind,
    pub collection: String,
    /// Key of the changed document
    pub document_key: serde_json::Value,
    /// Full document, when the stream provides it
    pub full_document: Option<serde_json::Value>,
    /// Changed/removed fields, for updates
    pub update_description: Option<serde_json::Value>,
}

/// A live stream of trigger events plus the token that closes it.
///
/// The enqueuer moves the receiver into its forwarding task and keeps the
/// shutdown half in the registration, so `unsubscribe` can close exactly
/// this handle.
pub struct TriggerHandle<T> {
    events: mpsc::Receiver<T>,
    shutdown: oneshot::Sender<()>,
}

impl<T> TriggerHandle<T> {
    pub fn new(events: mpsc::Receiver<T>, shutdown: oneshot::Sender<()>) -> Self {
        Self { events, shutdown }
    }

    /// Split into the event stream and the closing token
    pub fn split(self) -> (mpsc::Receiver<T>, ShutdownToken) {
        (self.events, ShutdownToken(Some(self.shutdown)))
    }
}

/// Closes the external handle it belongs to, at most once
pub struct ShutdownToken(Option<oneshot::Sender<()>>);

impl ShutdownToken {
    pub fn close(&mut self) {
        if let Some(tx) = self.0.take() {
            // The source may already be gone; closing is best-effort
            let _ = tx.send(());
        }
    }
}

impl Drop for ShutdownToken {
    fn drop(&mut self) {
        self.close();
    }
}

/// Change-capture seam: yields one dedicated, ordered notification
/// stream per opened filter.
#[async_trait]
pub trait ChangeCaptureSource: Send + Sync {
    /// Open a dedicated handle for `filter`. Handles are never shared:
    /// two subscribers with the same filter get two handles.
    async fn open(&self, filter: &ChangeFilter) -> Result<TriggerHandle<ChangeNotification>>;

    /// Full scan of a collection, for triggers that require an initial
    /// pass over existing documents before live capture.
    async fn scan(&self, collection: &str) -> Result<Vec<serde_json::Value>>;
}

/// Cron seam: yields a tick stream per registered expression
#[async_trait]
pub trait CronScheduler: Send + Sync {
    async fn schedule(&self, expression: &str) -> Result<TriggerHandle<DateTime<Utc>>>;
}
