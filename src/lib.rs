//! # Dispatchline
//!
//! Dispatchline is the dispatch core of a function-as-a-service runtime:
//! the glue between external triggers (HTTP calls, database change
//! streams, cron schedules, process-ready signals, agent tool calls) and
//! sandboxed worker processes that cannot hold live network handles.
//!
//! ## How it works
//!
//! Every trigger becomes an [`Event`] (a correlation id, an [`EventKind`],
//! and the [`Target`] it is for) plus a payload parked in a per-kind work
//! queue. The worker pool is woken with just the event; the worker then
//! pops the payload by id over its transport, does its work, and drives
//! the outcome back through the same queue: a plain `respond`/`error` for
//! value-shaped kinds, streaming `write_head`/`write`/`end` calls for
//! HTTP, and a forwarded `metadata`/`message`/`end` sequence for RPC
//! pass-through. An entry stays in its queue until exactly one terminal
//! call lands for it, so the queue size always equals the number of calls
//! still owed an answer.
//!
//! ## Library usage
//!
//! ```no_run
//! use dispatchline::{DispatchConfig, Event, EventDispatcher, EventKind, Target, WorkerPool};
//! use std::sync::Arc;
//!
//! struct LoggingPool;
//!
//! impl WorkerPool for LoggingPool {
//!     fn wake(&self, event: &Event) {
//!         println!("work {} ready for {}", event.id, event.target);
//!     }
//!     fn release(&self, target_id: &str) {
//!         println!("slot {target_id} released");
//!     }
//! }
//!
//! let dispatcher = Arc::new(EventDispatcher::new(
//!     DispatchConfig::default(),
//!     Arc::new(LoggingPool),
//! ));
//!
//! // Transport side, on the worker's behalf:
//! // let payload = dispatcher.pop(EventKind::Database, &id)?;
//! // dispatcher.respond(EventKind::Database, &id, result)?;
//! ```
//!
//! ## Modules
//!
//! - [`dispatch`]: the [`EventDispatcher`] and the trigger router
//! - [`queue`]: correlation work queues (generic, HTTP, RPC, tool)
//! - [`enqueuer`]: database / schedule / system trigger enqueuers
//! - [`body`]: HTTP body codec (JSON, form-urlencoded, multipart)
//! - [`event`]: targets, events, and event kinds
//! - [`config`]: dispatch configuration
//! - [`error`]: error types and Result alias

#![cfg_attr(not(test), deny(clippy::unwrap_used))]

pub mod body;
pub mod config;
pub mod dispatch;
pub mod enqueuer;
pub mod error;
pub mod event;
pub mod queue;
pub mod telemetry;

pub use body::{parse_body, Body, Part};
pub use config::DispatchConfig;
pub use dispatch::{DispatcherStats, EventDispatcher, TriggerClass, TriggerOptions, TriggerRouter};
pub use enqueuer::{
    noop_release, pool_release, ChangeCaptureSource, ChangeFilter, ChangeKind, ChangeNotification,
    CronScheduler, ReleaseHook, TriggerHandle, WorkerPool,
};
pub use error::{BodyError, DispatchError, QueueError, Result, TriggerError};
pub use event::{Event, EventKind, Target};
pub use queue::http::{HeaderMap, HttpRequest, ResponseStream};
pub use queue::rpc::{RpcCall, RpcRequest, RpcStatus};
