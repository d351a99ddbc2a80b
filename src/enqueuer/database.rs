//! Database change enqueuer
//!
//! Bridges change-capture streams to the dispatcher. Each subscribed
//! target gets its own dedicated capture handle, even when two targets
//! watch the same collection and mutation kind, so tearing one down can
//! never starve another. A forwarding task per registration turns
//! matching notifications into DATABASE events plus work-queue payloads.

use super::{
    ChangeCaptureSource, ChangeFilter, ChangeKind, ChangeNotification, ReleaseHook, ShutdownToken,
};
use crate::dispatch::{watch_completion, EventDispatcher};
use crate::error::{Result, TriggerError};
use crate::event::Target;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// What a target asks to watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTriggerOptions {
    pub collection: String,
    pub kind: ChangeKind,
    /// Feed every existing document through as an insert before live
    /// capture begins. Only meaningful for insert triggers.
    pub initial_scan: bool,
}

/// Payload stored in the database work queue for one captured change
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePayload {
    pub collection: String,
    pub document_key: serde_json::Value,
    /// Update description serialized as JSON text, `"{}"` when the
    /// stream carried none.
    pub update_description: String,
    pub kind: ChangeKind,
}

struct CaptureRegistration {
    target: Target,
    filter: ChangeFilter,
    shutdown: ShutdownToken,
    task: JoinHandle<()>,
}

/// Routes captured database changes into the dispatcher, one capture
/// handle per registered target.
pub struct DatabaseEnqueuer {
    source: Arc<dyn ChangeCaptureSource>,
    dispatcher: Arc<EventDispatcher>,
    registrations: Mutex<Vec<CaptureRegistration>>,
    release: ReleaseHook,
}

impl DatabaseEnqueuer {
    pub fn new(
        source: Arc<dyn ChangeCaptureSource>,
        dispatcher: Arc<EventDispatcher>,
        release: ReleaseHook,
    ) -> Self {
        Self {
            source,
            dispatcher,
            registrations: Mutex::new(Vec::new()),
            release,
        }
    }

    /// Open a dedicated capture handle for this target and start
    /// forwarding matching changes. When `initial_scan` is set, every
    /// existing document is dispatched as an insert first.
    pub async fn subscribe(&self, target: Target, options: DatabaseTriggerOptions) -> Result<()> {
        let filter = ChangeFilter {
            collection: options.collection.clone(),
            kind: options.kind,
        };
        let handle = self
            .source
            .open(&filter)
            .await
            .map_err(|e| TriggerError::subscribe_failed(&target.id, e.to_string()))?;

        if options.initial_scan && options.kind == ChangeKind::Insert {
            let documents = self.source.scan(&options.collection).await?;
            info!(
                target = %target,
                collection = %options.collection,
                documents = documents.len(),
                "dispatching initial scan"
            );
            for document in documents {
                let payload = ChangePayload {
                    collection: options.collection.clone(),
                    document_key: document
                        .get("_id")
                        .cloned()
                        .unwrap_or(serde_json::Value::Null),
                    update_description: "{}".to_string(),
                    kind: ChangeKind::Insert,
                };
                dispatch_change(&self.dispatcher, &target, payload);
            }
        }

        let (mut events, shutdown) = handle.split();
        let task = {
            let dispatcher = self.dispatcher.clone();
            let target = target.clone();
            let filter = filter.clone();
            tokio::spawn(async move {
                while let Some(change) = events.recv().await {
                    if change.collection != filter.collection || change.operation != filter.kind {
                        continue;
                    }
                    let payload = match change_payload(&change) {
                        Ok(payload) => payload,
                        Err(e) => {
                            warn!(target = %target, error = %e, "dropping unserializable change");
                            continue;
                        }
                    };
                    dispatch_change(&dispatcher, &target, payload);
                }
                debug!(target = %target, "capture stream closed");
            })
        };

        info!(target = %target, collection = %options.collection, kind = ?options.kind, "database trigger subscribed");
        self.registrations.lock().push(CaptureRegistration {
            target,
            filter,
            shutdown,
            task,
        });
        Ok(())
    }

    /// Close exactly this target's capture handle, stop its forwarding
    /// task, and release its worker slot. Other registrations on the
    /// same collection keep flowing.
    pub fn unsubscribe(&self, target: &Target) -> Result<()> {
        let mut registration = {
            let mut registrations = self.registrations.lock();
            let position = registrations
                .iter()
                .position(|r| r.target == *target)
                .ok_or_else(|| TriggerError::NotSubscribed(target.to_string()))?;
            registrations.remove(position)
        };
        registration.shutdown.close();
        registration.task.abort();
        info!(target = %target, collection = %registration.filter.collection, "database trigger unsubscribed");
        (self.release)(&target.id);
        Ok(())
    }

    /// Live registrations
    pub fn len(&self) -> usize {
        self.registrations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.lock().is_empty()
    }
}

fn change_payload(change: &ChangeNotification) -> Result<ChangePayload> {
    let update_description = match &change.update_description {
        Some(description) => serde_json::to_string(description)?,
        None => "{}".to_string(),
    };
    Ok(ChangePayload {
        collection: change.collection.clone(),
        document_key: change.document_key.clone(),
        update_description,
        kind: change.operation,
    })
}

fn dispatch_change(dispatcher: &EventDispatcher, target: &Target, payload: ChangePayload) {
    match dispatcher.enqueue_database(target.clone(), payload) {
        Ok((id, rx)) => watch_completion(id, rx),
        Err(e) => warn!(target = %target, error = %e, "failed to enqueue change"),
    }
}
