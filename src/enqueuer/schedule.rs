//! Schedule (cron) enqueuer
//!
//! Registers each target's cron expression with the scheduler seam and
//! forwards every tick as a SCHEDULE event for that target. Expression
//! parsing and clock arithmetic live behind [`CronScheduler`]; this
//! module only owns registrations and forwarding.

use super::{CronScheduler, ReleaseHook, ShutdownToken};
use crate::dispatch::{watch_completion, EventDispatcher};
use crate::error::{Result, TriggerError};
use crate::event::Target;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Payload stored in the schedule work queue for one tick
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulePayload {
    /// The cron expression that produced this tick
    pub expression: String,
    pub fired_at: DateTime<Utc>,
}

struct ScheduleRegistration {
    target: Target,
    expression: String,
    shutdown: ShutdownToken,
    task: JoinHandle<()>,
}

/// Routes cron ticks into the dispatcher, one registration per target
pub struct ScheduleEnqueuer {
    scheduler: Arc<dyn CronScheduler>,
    dispatcher: Arc<EventDispatcher>,
    registrations: Mutex<Vec<ScheduleRegistration>>,
    release: ReleaseHook,
}

impl ScheduleEnqueuer {
    pub fn new(
        scheduler: Arc<dyn CronScheduler>,
        dispatcher: Arc<EventDispatcher>,
        release: ReleaseHook,
    ) -> Self {
        Self {
            scheduler,
            dispatcher,
            registrations: Mutex::new(Vec::new()),
            release,
        }
    }

    /// Register the expression for this target and start forwarding its
    /// ticks as SCHEDULE events.
    pub async fn subscribe(&self, target: Target, expression: &str) -> Result<()> {
        let handle = self
            .scheduler
            .schedule(expression)
            .await
            .map_err(|e| TriggerError::subscribe_failed(&target.id, e.to_string()))?;

        let (mut ticks, shutdown) = handle.split();
        let task = {
            let dispatcher = self.dispatcher.clone();
            let target = target.clone();
            let expression = expression.to_string();
            tokio::spawn(async move {
                while let Some(fired_at) = ticks.recv().await {
                    let payload = SchedulePayload {
                        expression: expression.clone(),
                        fired_at,
                    };
                    match dispatcher.enqueue_schedule(target.clone(), payload) {
                        Ok((id, rx)) => watch_completion(id, rx),
                        Err(e) => {
                            warn!(target = %target, error = %e, "failed to enqueue schedule tick")
                        }
                    }
                }
                debug!(target = %target, "tick stream closed");
            })
        };

        info!(target = %target, expression, "schedule trigger subscribed");
        self.registrations.lock().push(ScheduleRegistration {
            target,
            expression: expression.to_string(),
            shutdown,
            task,
        });
        Ok(())
    }

    /// Drop exactly this target's registration, stop its forwarding task,
    /// and release its worker slot.
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
        info!(target = %target, expression = %registration.expression, "schedule trigger unsubscribed");
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DispatchConfig;
    use crate::enqueuer::{noop_release, TriggerHandle, WorkerPool};
    use crate::event::{Event, EventKind};
    use async_trait::async_trait;
    use tokio::sync::{mpsc, oneshot};

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

    struct FakeScheduler {
        senders: Mutex<Vec<mpsc::Sender<DateTime<Utc>>>>,
    }

    #[async_trait]
    impl CronScheduler for FakeScheduler {
        async fn schedule(&self, expression: &str) -> Result<TriggerHandle<DateTime<Utc>>> {
            if expression.is_empty() {
                return Err(
                    TriggerError::invalid_expression(expression, "empty expression").into(),
                );
            }
            let (tx, rx) = mpsc::channel(8);
            let (shutdown_tx, _shutdown_rx) = oneshot::channel();
            self.senders.lock().push(tx);
            Ok(TriggerHandle::new(rx, shutdown_tx))
        }
    }

    fn target(name: &str) -> Target {
        Target::new(format!("slot-{name}"), format!("/srv/{name}"), "default")
    }

    fn setup() -> (
        Arc<EventDispatcher>,
        Arc<CountingPool>,
        Arc<FakeScheduler>,
        ScheduleEnqueuer,
    ) {
        let pool = Arc::new(CountingPool::default());
        let dispatcher = Arc::new(EventDispatcher::new(
            DispatchConfig::default(),
            pool.clone(),
        ));
        let scheduler = Arc::new(FakeScheduler {
            senders: Mutex::new(Vec::new()),
        });
        let enqueuer = ScheduleEnqueuer::new(scheduler.clone(), dispatcher.clone(), noop_release());
        (dispatcher, pool, scheduler, enqueuer)
    }

    #[tokio::test]
    async fn test_tick_becomes_schedule_event() {
        let (dispatcher, pool, scheduler, enqueuer) = setup();
        enqueuer
            .subscribe(target("a"), "*/5 * * * *")
            .await
            .unwrap();

        let tx = scheduler.senders.lock()[0].clone();
        tx.send(Utc::now()).await.unwrap();
        tokio::task::yield_now().await;

        let woken = pool.woken.lock().clone();
        assert_eq!(woken.len(), 1);
        assert_eq!(woken[0].kind, EventKind::Schedule);

        let payload = dispatcher.pop(EventKind::Schedule, &woken[0].id).unwrap();
        assert_eq!(payload["expression"], "*/5 * * * *");
    }

    #[tokio::test]
    async fn test_rejected_expression_surfaces_to_subscriber() {
        let (_dispatcher, _pool, _scheduler, enqueuer) = setup();
        let err = enqueuer.subscribe(target("a"), "").await.unwrap_err();
        assert!(err.to_string().contains("subscribe failed"));
        assert!(enqueuer.is_empty());
    }

    #[tokio::test]
    async fn test_unsubscribe_stops_forwarding() {
        let (_dispatcher, pool, scheduler, enqueuer) = setup();
        enqueuer.subscribe(target("a"), "0 * * * *").await.unwrap();
        let tx = scheduler.senders.lock()[0].clone();

        enqueuer.unsubscribe(&target("a")).unwrap();
        assert!(enqueuer.is_empty());

        // Ticks after teardown go nowhere
        let _ = tx.send(Utc::now()).await;
        tokio::task::yield_now().await;
        assert!(pool.woken.lock().is_empty());
    }
}
