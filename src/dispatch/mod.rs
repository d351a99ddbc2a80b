//! Event dispatcher
//!
//! The central registry of the dispatch core. [`EventDispatcher`] owns
//! every work queue, mints correlation ids, wakes the worker assigned to
//! a target through the [`WorkerPool`] seam, and exposes the
//! worker-facing surface (`pop` / `respond` / `error` plus the HTTP
//! streaming and RPC forwarding calls) that the transport maps its
//! request/response channel onto.
//!
//! [`TriggerRouter`] fronts the three enqueuers with a single
//! subscribe/unsubscribe surface dispatching exhaustively over the
//! trigger options.

use crate::config::DispatchConfig;
use crate::enqueuer::database::{ChangePayload, DatabaseEnqueuer, DatabaseTriggerOptions};
use crate::enqueuer::schedule::{ScheduleEnqueuer, SchedulePayload};
use crate::enqueuer::system::{SystemEnqueuer, SystemPayload};
use crate::enqueuer::{ChangeCaptureSource, CronScheduler, ReleaseHook, WorkerPool};
use crate::error::{BodyError, DispatchError, Result};
use crate::event::{Event, EventKind, Target};
use crate::queue::http::{HttpRequest, HttpWorkQueue, ResponseStream};
use crate::queue::rpc::{RpcRequest, RpcStatus, RpcWorkQueue};
use crate::queue::tool::ToolWorkQueue;
use crate::queue::{QueueMetricsSnapshot, WorkQueue};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Awaitable continuation for an enqueued unit of work
pub type WorkReceiver<R> = oneshot::Receiver<Result<R>>;

/// Central registry owning all correlation queues
pub struct EventDispatcher {
    config: DispatchConfig,
    http: HttpWorkQueue,
    database: WorkQueue<ChangePayload, serde_json::Value>,
    schedule: WorkQueue<SchedulePayload, serde_json::Value>,
    system: WorkQueue<SystemPayload, serde_json::Value>,
    rpc: RpcWorkQueue,
    tool: ToolWorkQueue,
    pool: Arc<dyn WorkerPool>,
}

impl EventDispatcher {
    pub fn new(config: DispatchConfig, pool: Arc<dyn WorkerPool>) -> Self {
        Self {
            config,
            http: HttpWorkQueue::new(),
            database: WorkQueue::new(),
            schedule: WorkQueue::new(),
            system: WorkQueue::new(),
            rpc: RpcWorkQueue::new(),
            tool: ToolWorkQueue::new(),
            pool,
        }
    }

    // ---- trigger side: enqueue and wake ----

    /// Buffer an inbound HTTP call and wake the target's worker. The
    /// returned receiver completes when the worker ends the response.
    pub fn enqueue_http(
        &self,
        target: Target,
        request: HttpRequest,
        response: Box<dyn ResponseStream>,
    ) -> Result<(String, WorkReceiver<()>)> {
        if request.body.len() > self.config.max_body_bytes {
            return Err(BodyError::TooLarge {
                size: request.body.len(),
                max: self.config.max_body_bytes,
            }
            .into());
        }
        let event = Event::new(EventKind::Http, target);
        let rx = self.http.enqueue(&event.id, request, response)?;
        self.wake(&event);
        Ok((event.id, rx))
    }

    /// Enqueue a captured database change for the target
    pub fn enqueue_database(
        &self,
        target: Target,
        payload: ChangePayload,
    ) -> Result<(String, WorkReceiver<serde_json::Value>)> {
        let event = Event::new(EventKind::Database, target);
        let rx = self.database.enqueue(&event.id, payload)?;
        self.wake(&event);
        Ok((event.id, rx))
    }

    /// Enqueue a cron tick for the target
    pub fn enqueue_schedule(
        &self,
        target: Target,
        payload: SchedulePayload,
    ) -> Result<(String, WorkReceiver<serde_json::Value>)> {
        let event = Event::new(EventKind::Schedule, target);
        let rx = self.schedule.enqueue(&event.id, payload)?;
        self.wake(&event);
        Ok((event.id, rx))
    }

    /// Enqueue a ready-batch dispatch for the target
    pub fn enqueue_system(
        &self,
        target: Target,
        payload: SystemPayload,
    ) -> Result<(String, WorkReceiver<serde_json::Value>)> {
        let event = Event::new(EventKind::System, target);
        let rx = self.system.enqueue(&event.id, payload)?;
        self.wake(&event);
        Ok((event.id, rx))
    }

    /// Enqueue an inbound RPC call; the live call handle carries the
    /// continuation, so no receiver is returned.
    pub fn enqueue_rpc(
        &self,
        target: Target,
        request: RpcRequest,
        call: Box<dyn crate::queue::rpc::RpcCall>,
    ) -> Result<String> {
        let event = Event::new(EventKind::AgentTool, target);
        // RPC rides the agent-tool wake path but keeps its own queue
        self.rpc.enqueue(&event.id, request, call)?;
        self.wake(&event);
        Ok(event.id)
    }

    /// Enqueue a tool invocation for the target
    pub fn enqueue_tool(
        &self,
        target: Target,
        message: serde_json::Value,
    ) -> Result<(String, WorkReceiver<serde_json::Value>)> {
        let event = Event::new(EventKind::AgentTool, target);
        let rx = self.tool.enqueue(&event.id, message)?;
        self.wake(&event);
        Ok((event.id, rx))
    }

    fn wake(&self, event: &Event) {
        debug!(id = %event.id, kind = event.kind.as_str(), target = %event.target, "waking worker");
        self.pool.wake(event);
    }

    // ---- worker side: pop / respond / error over the transport ----

    /// Fetch the full payload for an event, serialized for the worker
    /// transport. Each payload is handed out once.
    pub fn pop(&self, kind: EventKind, id: &str) -> Result<serde_json::Value> {
        let value = match kind {
            EventKind::Http => serde_json::to_value(self.http.pop(id)?)?,
            EventKind::Database => serde_json::to_value(self.database.pop(id)?)?,
            EventKind::Schedule => serde_json::to_value(self.schedule.pop(id)?)?,
            EventKind::System => serde_json::to_value(self.system.pop(id)?)?,
            // RPC calls wake as AGENT_TOOL but keep their own table;
            // correlation ids are unique across both.
            EventKind::AgentTool => match self.tool.pop(id) {
                Ok(message) => message,
                Err(_) => serde_json::to_value(self.rpc.pop(id)?)?,
            },
        };
        Ok(value)
    }

    /// Complete an event with the worker's result. HTTP calls complete
    /// through [`end`](EventDispatcher::end) instead.
    pub fn respond(&self, kind: EventKind, id: &str, value: serde_json::Value) -> Result<()> {
        match kind {
            EventKind::Http => Err(DispatchError::Transport(
                "HTTP calls complete via end, not respond".to_string(),
            )),
            EventKind::Database => self.database.respond(id, value),
            EventKind::Schedule => self.schedule.respond(id, value),
            EventKind::System => self.system.respond(id, value),
            EventKind::AgentTool => self.tool.respond(id, value),
        }
    }

    /// Fail an event with the worker's error message
    pub fn error(&self, kind: EventKind, id: &str, message: &str) -> Result<()> {
        let err = DispatchError::Worker(message.to_string());
        match kind {
            EventKind::Http => self.http.error(id, err),
            EventKind::Database => self.database.error(id, err),
            EventKind::Schedule => self.schedule.error(id, err),
            EventKind::System => self.system.error(id, err),
            EventKind::AgentTool => self
                .tool
                .respond(id, serde_json::json!({ "error": message })),
        }
    }

    /// Forward response status and headers for an HTTP event
    pub fn write_head(
        &self,
        id: &str,
        status: u16,
        message: &str,
        headers: &[(String, String)],
    ) -> Result<()> {
        self.http.write_head(id, status, message, headers)
    }

    /// Forward one response chunk for an HTTP event
    pub fn write(&self, id: &str, chunk: &[u8]) -> Result<()> {
        self.http.write(id, chunk)
    }

    /// Forward the final chunk and close an HTTP event's response
    pub fn end(&self, id: &str, data: Option<&[u8]>) -> Result<()> {
        self.http.end(id, data)
    }

    /// Forward a worker's RPC response payload to the original call
    pub fn send_response(&self, id: &str, raw: &str) -> Result<()> {
        self.rpc.send_response(id, raw)
    }

    /// Fail an RPC call with a status built by the worker
    pub fn send_error(&self, id: &str, status: RpcStatus) -> Result<()> {
        self.rpc.send_error(id, status)
    }

    /// Outstanding entries for one event kind
    pub fn size(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::Http => self.http.size(),
            EventKind::Database => self.database.size(),
            EventKind::Schedule => self.schedule.size(),
            EventKind::System => self.system.size(),
            EventKind::AgentTool => self.tool.size() + self.rpc.size(),
        }
    }

    /// Snapshot of every queue's counters and sizes
    pub fn stats(&self) -> DispatcherStats {
        DispatcherStats {
            http: self.http.metrics(),
            database: self.database.metrics(),
            schedule: self.schedule.metrics(),
            system: self.system.metrics(),
            rpc: self.rpc.metrics(),
            tool: self.tool.metrics(),
            outstanding: [
                EventKind::Http,
                EventKind::Database,
                EventKind::Schedule,
                EventKind::System,
                EventKind::AgentTool,
            ]
            .iter()
            .map(|kind| (kind.as_str().to_string(), self.size(*kind)))
            .collect(),
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }
}

/// Point-in-time dispatcher metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherStats {
    pub http: QueueMetricsSnapshot,
    pub database: QueueMetricsSnapshot,
    pub schedule: QueueMetricsSnapshot,
    pub system: QueueMetricsSnapshot,
    pub rpc: QueueMetricsSnapshot,
    pub tool: QueueMetricsSnapshot,
    /// Outstanding entries per event kind
    pub outstanding: std::collections::HashMap<String, usize>,
}

/// What a target subscribes to, routed to the matching enqueuer
#[derive(Debug, Clone)]
pub enum TriggerOptions {
    Database(DatabaseTriggerOptions),
    System,
    Schedule { expression: String },
}

/// Which enqueuer to tear a registration down from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerClass {
    Database,
    System,
    Schedule,
}

/// One subscribe/unsubscribe front door over the three enqueuers
pub struct TriggerRouter {
    database: DatabaseEnqueuer,
    system: SystemEnqueuer,
    schedule: ScheduleEnqueuer,
}

impl TriggerRouter {
    pub fn new(
        dispatcher: Arc<EventDispatcher>,
        source: Arc<dyn ChangeCaptureSource>,
        scheduler: Arc<dyn CronScheduler>,
        release: ReleaseHook,
    ) -> Self {
        let window = dispatcher.config().debounce_window();
        let capacity = dispatcher.config().trigger_channel_capacity;
        Self {
            database: DatabaseEnqueuer::new(source, dispatcher.clone(), release.clone()),
            system: SystemEnqueuer::new(dispatcher.clone(), window, capacity, release.clone()),
            schedule: ScheduleEnqueuer::new(scheduler, dispatcher, release),
        }
    }

    /// Register a target against the trigger its options describe
    pub async fn subscribe(&self, target: Target, options: TriggerOptions) -> Result<()> {
        match options {
            TriggerOptions::Database(options) => self.database.subscribe(target, options).await,
            TriggerOptions::System => self.system.subscribe(target),
            TriggerOptions::Schedule { expression } => {
                self.schedule.subscribe(target, &expression).await
            }
        }
    }

    /// Tear down exactly this target's registration on one enqueuer
    pub fn unsubscribe(&self, target: &Target, class: TriggerClass) -> Result<()> {
        match class {
            TriggerClass::Database => self.database.unsubscribe(target),
            TriggerClass::System => self.system.unsubscribe(target),
            TriggerClass::Schedule => self.schedule.unsubscribe(target),
        }
    }

    pub fn database(&self) -> &DatabaseEnqueuer {
        &self.database
    }

    pub fn system(&self) -> &SystemEnqueuer {
        &self.system
    }

    pub fn schedule(&self) -> &ScheduleEnqueuer {
        &self.schedule
    }
}

/// Await a fire-and-forget continuation on a background task, logging
/// failures. Dropping the receiver would cancel the call instead.
pub(crate) fn watch_completion(id: String, rx: WorkReceiver<serde_json::Value>) {
    tokio::spawn(async move {
        match rx.await {
            Ok(Ok(_)) => debug!(id = %id, "event completed"),
            Ok(Err(e)) => warn!(id = %id, error = %e, "event failed"),
            Err(_) => debug!(id = %id, "event withdrawn before completion"),
        }
    });
}
