//! Shared fakes for integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatchline::queue::http::{HeaderMap, HttpRequest, ResponseStream};
use dispatchline::{
    ChangeCaptureSource, ChangeFilter, ChangeNotification, CronScheduler, Event, Result, Target,
    TriggerHandle, WorkerPool,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

/// Worker pool that records every wake and release
#[derive(Default)]
pub struct RecordingPool {
    pub woken: Mutex<Vec<Event>>,
    pub released: Mutex<Vec<String>>,
}

impl WorkerPool for RecordingPool {
    fn wake(&self, event: &Event) {
        self.woken.lock().push(event.clone());
    }

    fn release(&self, target_id: &str) {
        self.released.lock().push(target_id.to_string());
    }
}

/// Change-capture source handing each `open` its own channel, so tests
/// can feed notifications per registration.
#[derive(Default)]
pub struct FakeSource {
    pub senders: Mutex<Vec<mpsc::Sender<ChangeNotification>>>,
    pub documents: Mutex<Vec<serde_json::Value>>,
}

#[async_trait]
impl ChangeCaptureSource for FakeSource {
    async fn open(&self, _filter: &ChangeFilter) -> Result<TriggerHandle<ChangeNotification>> {
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, _shutdown_rx) = oneshot::channel();
        self.senders.lock().push(tx);
        Ok(TriggerHandle::new(rx, shutdown_tx))
    }

    async fn scan(&self, _collection: &str) -> Result<Vec<serde_json::Value>> {
        Ok(self.documents.lock().clone())
    }
}

/// Cron scheduler handing each `schedule` its own tick channel
#[derive(Default)]
pub struct FakeScheduler {
    pub senders: Mutex<Vec<mpsc::Sender<DateTime<Utc>>>>,
}

#[async_trait]
impl CronScheduler for FakeScheduler {
    async fn schedule(&self, _expression: &str) -> Result<TriggerHandle<DateTime<Utc>>> {
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, _shutdown_rx) = oneshot::channel();
        self.senders.lock().push(tx);
        Ok(TriggerHandle::new(rx, shutdown_tx))
    }
}

/// Response stream capturing everything the queue forwards to it
#[derive(Default)]
pub struct RecordingStream {
    pub shared: Arc<RecordedResponse>,
}

#[derive(Default)]
pub struct RecordedResponse {
    pub head: Mutex<Option<(u16, String, HeaderMap)>>,
    pub chunks: Mutex<Vec<Vec<u8>>>,
    pub ended: AtomicBool,
    pub cancelled: AtomicBool,
}

impl ResponseStream for RecordingStream {
    fn write_head(&mut self, status: u16, message: &str, headers: &HeaderMap) -> Result<()> {
        *self.shared.head.lock() = Some((status, message.to_string(), headers.clone()));
        Ok(())
    }

    fn write(&mut self, chunk: &[u8]) -> Result<()> {
        self.shared.chunks.lock().push(chunk.to_vec());
        Ok(())
    }

    fn end(&mut self, data: Option<&[u8]>) -> Result<()> {
        if let Some(data) = data {
            self.shared.chunks.lock().push(data.to_vec());
        }
        self.shared.ended.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::SeqCst)
    }
}

pub fn target(name: &str) -> Target {
    Target::new(format!("slot-{name}"), format!("/tmp/{name}"), "default")
}

pub fn http_request(body: &[u8]) -> HttpRequest {
    HttpRequest {
        method: "POST".to_string(),
        url: "/fn/echo?x=1".to_string(),
        path: "/fn/echo".to_string(),
        headers: [("content-type".to_string(), "application/json".to_string())]
            .into_iter()
            .collect(),
        params: HashMap::new(),
        query: [("x".to_string(), "1".to_string())].into_iter().collect(),
        body: bytes::Bytes::copy_from_slice(body),
    }
}
