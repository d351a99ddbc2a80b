//! HTTP work queue
//!
//! Specializes the correlation table for the HTTP path in both
//! directions. Inbound, the host buffers the full request (method, url,
//! path, headers, params, query, raw body) and the worker fetches it once
//! via `pop`. Outbound, the entry owns the live response held by the
//! host: the worker drives it with `write_head` / `write` / `end` calls,
//! each a request/response round trip keyed by the correlation id, so the
//! worker can stream output without holding a network handle itself.

use super::QueueMetrics;
use crate::error::{DispatchError, QueueError, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Ordered multi-value header map with append semantics.
///
/// Names are case-insensitive and stored lowercased; appending a repeated
/// name extends its value list in arrival order instead of overwriting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HeaderMap {
    entries: Vec<(String, Vec<String>)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value under `name`, merging into the existing entry if
    /// the name (case-insensitively) repeats.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        let name = name.to_ascii_lowercase();
        if let Some((_, values)) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            values.push(value.into());
        } else {
            self.entries.push((name, vec![value.into()]));
        }
    }

    /// First value for `name`, if any
    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    /// All values for `name`, in append order
    pub fn get_all(&self, name: &str) -> &[String] {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(n, values)| (n.as_str(), values.as_slice()))
    }

    /// Number of distinct header names
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, String)> for HeaderMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut map = HeaderMap::new();
        for (name, value) in iter {
            map.append(&name, value);
        }
        map
    }
}

/// Buffered inbound request, offered to the worker exactly once
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub path: String,
    pub headers: HeaderMap,
    /// Path parameters extracted by the router upstream
    pub params: HashMap<String, String>,
    /// Decoded query-string parameters
    pub query: HashMap<String, String>,
    /// Raw body bytes; the worker runs these through the body codec
    pub body: Bytes,
}

/// The live response owned by the host for one inbound call.
///
/// The transport layer implements this over whatever connection object it
/// holds; the queue only forwards the worker's streaming calls to it.
pub trait ResponseStream: Send {
    /// Forward status line and headers. Called at most once per response.
    fn write_head(&mut self, status: u16, message: &str, headers: &HeaderMap) -> Result<()>;

    /// Forward one body chunk
    fn write(&mut self, chunk: &[u8]) -> Result<()>;

    /// Forward the final chunk (if any) and close the response
    fn end(&mut self, data: Option<&[u8]>) -> Result<()>;

    /// Whether the original caller has gone away (connection closed)
    fn is_cancelled(&self) -> bool;
}

struct HttpEntry {
    request: Option<HttpRequest>,
    response: Box<dyn ResponseStream>,
    headers_sent: bool,
    reply: oneshot::Sender<Result<()>>,
}

/// Correlation table for the HTTP path.
///
/// Unlike the generic queue, entries keep per-call protocol state (the
/// response stream and whether headers went out), so this is its own
/// table rather than a [`super::WorkQueue`] instantiation.
pub struct HttpWorkQueue {
    entries: Mutex<HashMap<String, HttpEntry>>,
    metrics: QueueMetrics,
}

impl Default for HttpWorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpWorkQueue {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            metrics: QueueMetrics::default(),
        }
    }

    /// Buffer an inbound request together with its live response. The
    /// returned continuation completes when the worker ends the response
    /// (or the entry fails).
    pub fn enqueue(
        &self,
        id: &str,
        request: HttpRequest,
        response: Box<dyn ResponseStream>,
    ) -> Result<oneshot::Receiver<Result<()>>> {
        let mut entries = self.entries.lock();
        if entries.contains_key(id) {
            return Err(QueueError::DuplicateId(id.to_string()).into());
        }
        let (tx, rx) = oneshot::channel();
        entries.insert(
            id.to_string(),
            HttpEntry {
                request: Some(request),
                response,
                headers_sent: false,
                reply: tx,
            },
        );
        self.metrics.record_enqueue();
        debug!(id, "enqueued http request");
        Ok(rx)
    }

    /// Fetch the buffered request exactly once
    pub fn pop(&self, id: &str) -> Result<HttpRequest> {
        let mut entries = self.entries.lock();
        let request = entries
            .get_mut(id)
            .and_then(|entry| entry.request.take())
            .ok_or_else(|| QueueError::UnknownId(id.to_string()))?;
        self.metrics.record_pop();
        Ok(request)
    }

    /// Forward status, message, and headers to the live response.
    /// Repeated header names are merged append-style before forwarding.
    /// A second `write_head` for the same id fails with
    /// `HeadersAlreadySent`; a cancelled caller fails the call with
    /// `CallCancelled` and frees the entry.
    ///
    /// The entry is taken out of the map while the transport write is in
    /// flight, so a slow stream never blocks other ids. The worker drives
    /// each id's calls sequentially, so nothing observes the gap.
    pub fn write_head(
        &self,
        id: &str,
        status: u16,
        message: &str,
        headers: &[(String, String)],
    ) -> Result<()> {
        let mut entry = self.take_for_forwarding(id)?;
        if entry.headers_sent {
            self.entries.lock().insert(id.to_string(), entry);
            return Err(QueueError::HeadersAlreadySent(id.to_string()).into());
        }
        let merged: HeaderMap = headers.iter().cloned().collect();
        let forwarded = entry.response.write_head(status, message, &merged);
        entry.headers_sent = true;
        self.entries.lock().insert(id.to_string(), entry);
        forwarded
    }

    /// Forward one body chunk to the live response. Forwarding happens
    /// outside the map lock, same as `write_head`.
    pub fn write(&self, id: &str, chunk: &[u8]) -> Result<()> {
        let mut entry = self.take_for_forwarding(id)?;
        let forwarded = entry.response.write(chunk);
        self.entries.lock().insert(id.to_string(), entry);
        forwarded
    }

    /// Forward the final chunk, close the response, resolve the
    /// continuation, and remove the entry. Exactly one `end` per id.
    pub fn end(&self, id: &str, data: Option<&[u8]>) -> Result<()> {
        let mut entry = {
            let mut entries = self.entries.lock();
            entries
                .remove(id)
                .ok_or_else(|| QueueError::CallNotFound(id.to_string()))?
        };
        if entry.response.is_cancelled() {
            self.metrics.record_cancel();
            return Err(QueueError::CallCancelled(id.to_string()).into());
        }
        entry.response.end(data)?;
        if entry.reply.send(Ok(())).is_err() {
            self.metrics.record_cancel();
            return Err(QueueError::CallCancelled(id.to_string()).into());
        }
        self.metrics.record_resolve();
        debug!(id, "http response ended");
        Ok(())
    }

    /// Reject the continuation (worker failed before completing the
    /// response) and remove the entry.
    pub fn error(&self, id: &str, err: DispatchError) -> Result<()> {
        let entry = {
            let mut entries = self.entries.lock();
            entries
                .remove(id)
                .ok_or_else(|| QueueError::CallNotFound(id.to_string()))?
        };
        if entry.reply.is_closed() {
            self.metrics.record_cancel();
            return Err(QueueError::CallCancelled(id.to_string()).into());
        }
        warn!(id, error = %err, "http call failed");
        entry
            .reply
            .send(Err(err))
            .map_err(|_| DispatchError::from(QueueError::CallCancelled(id.to_string())))?;
        self.metrics.record_reject();
        Ok(())
    }

    /// Outstanding entries (enqueued, not yet ended or failed)
    pub fn size(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn metrics(&self) -> super::QueueMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Remove the entry for a streaming call, failing with
    /// `CallCancelled` (entry stays removed) if the caller went away, so
    /// later calls see `CallNotFound` instead of a dead connection.
    fn take_for_forwarding(&self, id: &str) -> Result<HttpEntry> {
        let entry = {
            let mut entries = self.entries.lock();
            entries
                .remove(id)
                .ok_or_else(|| QueueError::CallNotFound(id.to_string()))?
        };
        if entry.response.is_cancelled() {
            self.metrics.record_cancel();
            return Err(QueueError::CallCancelled(id.to_string()).into());
        }
        Ok(entry)
    }
}
