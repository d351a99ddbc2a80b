//! System (process-ready) enqueuer
//!
//! Batches targets that signal readiness and dispatches one SYSTEM event
//! per target after a quiet period. Every subscribe inside the window
//! re-arms the timer, so a burst of processes coming up together lands in
//! a single batch instead of one dispatch per process.
//!
//! The debounce is a plain timer loop owned by a background task: idle
//! until the first readiness signal, then re-armed on each further signal
//! until the window elapses with none, at which point the ready set is
//! drained and dispatched.

use super::ReleaseHook;
use crate::dispatch::{watch_completion, EventDispatcher};
use crate::error::Result;
use crate::event::Target;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Payload stored in the system work queue for one batch member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPayload {
    /// When the batch containing this target was dispatched
    pub observed_at: DateTime<Utc>,
}

/// Debounced batcher of process-ready signals
pub struct SystemEnqueuer {
    ready: Arc<Mutex<Vec<Target>>>,
    kick: mpsc::Sender<()>,
    release: ReleaseHook,
    task: JoinHandle<()>,
}

impl SystemEnqueuer {
    pub fn new(
        dispatcher: Arc<EventDispatcher>,
        window: Duration,
        channel_capacity: usize,
        release: ReleaseHook,
    ) -> Self {
        let ready = Arc::new(Mutex::new(Vec::new()));
        let (kick, kick_rx) = mpsc::channel(channel_capacity);
        let task = tokio::spawn(debounce_loop(dispatcher, ready.clone(), window, kick_rx));
        Self {
            ready,
            kick,
            release,
            task,
        }
    }

    /// Mark a target ready and (re-)arm the dispatch window. Marking an
    /// already-ready target only re-arms the timer.
    pub fn subscribe(&self, target: Target) -> Result<()> {
        {
            let mut ready = self.ready.lock();
            if !ready.contains(&target) {
                info!(target = %target, "target ready, batching");
                ready.push(target);
            }
        }
        // A full channel already has a pending kick, which re-arms anyway
        let _ = self.kick.try_send(());
        Ok(())
    }

    /// Withdraw a target from the pending batch and release its worker
    /// slot. Withdrawing after the batch dispatched is a no-op apart from
    /// the release.
    pub fn unsubscribe(&self, target: &Target) -> Result<()> {
        {
            let mut ready = self.ready.lock();
            if let Some(position) = ready.iter().position(|t| t == target) {
                ready.remove(position);
                debug!(target = %target, "target withdrawn from batch");
            }
        }
        (self.release)(&target.id);
        Ok(())
    }

    /// Targets currently waiting for the window to elapse
    pub fn pending(&self) -> usize {
        self.ready.lock().len()
    }
}

impl Drop for SystemEnqueuer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn debounce_loop(
    dispatcher: Arc<EventDispatcher>,
    ready: Arc<Mutex<Vec<Target>>>,
    window: Duration,
    mut kick: mpsc::Receiver<()>,
) {
    loop {
        // Idle until the first readiness signal arrives
        if kick.recv().await.is_none() {
            return;
        }
        // Collecting: each further signal re-arms the window
        loop {
            tokio::select! {
                _ = tokio::time::sleep(window) => {
                    let batch: Vec<Target> = std::mem::take(&mut *ready.lock());
                    debug!(targets = batch.len(), "dispatching ready batch");
                    for target in batch {
                        let payload = SystemPayload {
                            observed_at: Utc::now(),
                        };
                        match dispatcher.enqueue_system(target.clone(), payload) {
                            Ok((id, rx)) => watch_completion(id, rx),
                            Err(e) => {
                                warn!(target = %target, error = %e, "failed to enqueue system event")
                            }
                        }
                    }
                    break;
                }
                more = kick.recv() => {
                    if more.is_none() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::enqueuer::{noop_release, WorkerPool};
    use crate::event::{Event, EventKind};

    #[derive(Default)]
    struct CountingPool {
        woken: Mutex<Vec<Event>>,
    }

    impl WorkerPool for CountingPool {
        fn wake(&self, event: &Event) {
            self.woken.lock().push(event.clone());
        }

        fn release(&self, _target_id: &str) {}
    }

    fn target(name: &str) -> Target {
        Target::new(format!("slot-{name}"), format!("/srv/{name}"), "default")
    }

    fn setup() -> (Arc<EventDispatcher>, Arc<CountingPool>) {
        let pool = Arc::new(CountingPool::default());
        let dispatcher = Arc::new(EventDispatcher::new(
            DispatchConfig::default(),
            pool.clone(),
        ));
        (dispatcher, pool)
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_subscriber_dispatches_after_window() {
        let (dispatcher, pool) = setup();
        let enqueuer =
            SystemEnqueuer::new(dispatcher.clone(), Duration::from_millis(1500), 64, noop_release());

        enqueuer.subscribe(target("a")).unwrap();
        tokio::time::sleep(Duration::from_millis(1400)).await;
        assert!(pool.woken.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        let woken = pool.woken.lock().clone();
        assert_eq!(woken.len(), 1);
        assert_eq!(woken[0].kind, EventKind::System);
        assert_eq!(enqueuer.pending(), 0);
        assert_eq!(dispatcher.size(EventKind::System), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_lands_in_one_batch() {
        let (dispatcher, pool) = setup();
        let enqueuer =
            SystemEnqueuer::new(dispatcher, Duration::from_millis(1500), 64, noop_release());

        enqueuer.subscribe(target("a")).unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        // Inside the window: re-arms, does not dispatch yet
        enqueuer.subscribe(target("b")).unwrap();
        tokio::time::sleep(Duration::from_millis(1000)).await;
        enqueuer.subscribe(target("c")).unwrap();
        assert!(pool.woken.lock().is_empty());

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(pool.woken.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_withdrawn_target_is_excluded_from_batch() {
        let (dispatcher, pool) = setup();
        let enqueuer =
            SystemEnqueuer::new(dispatcher, Duration::from_millis(1500), 64, noop_release());

        enqueuer.subscribe(target("a")).unwrap();
        enqueuer.subscribe(target("b")).unwrap();
        enqueuer.unsubscribe(&target("a")).unwrap();

        tokio::time::sleep(Duration::from_millis(1600)).await;
        let woken = pool.woken.lock().clone();
        assert_eq!(woken.len(), 1);
        assert_eq!(woken[0].target, target("b"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_ready_signal_dispatches_once() {
        let (dispatcher, pool) = setup();
        let enqueuer =
            SystemEnqueuer::new(dispatcher, Duration::from_millis(1500), 64, noop_release());

        enqueuer.subscribe(target("a")).unwrap();
        enqueuer.subscribe(target("a")).unwrap();
        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(pool.woken.lock().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_channel_capacity_of_one_still_batches() {
        let (dispatcher, pool) = setup();
        let enqueuer =
            SystemEnqueuer::new(dispatcher, Duration::from_millis(1500), 1, noop_release());

        // Back-to-back signals overflow a capacity-1 kick channel; the
        // dropped kicks are harmless because one is already pending.
        enqueuer.subscribe(target("a")).unwrap();
        enqueuer.subscribe(target("b")).unwrap();
        enqueuer.subscribe(target("c")).unwrap();

        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(pool.woken.lock().len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_windows_are_independent() {
        let (dispatcher, pool) = setup();
        let enqueuer =
            SystemEnqueuer::new(dispatcher, Duration::from_millis(1500), 64, noop_release());

        enqueuer.subscribe(target("a")).unwrap();
        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(pool.woken.lock().len(), 1);

        // A later signal starts a fresh window
        enqueuer.subscribe(target("b")).unwrap();
        tokio::time::sleep(Duration::from_millis(1600)).await;
        assert_eq!(pool.woken.lock().len(), 2);
    }
}
