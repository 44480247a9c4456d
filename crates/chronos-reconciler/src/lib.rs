//! The Reconciler (C6, "sysmon"): a single long-running loop with two
//! independent tickers — retention cleanup and DDQ healthcheck — plus a
//! one-shot startup cleanup+recover pass. `was_unhealthy` is local to the
//! loop; there is no shared mutable state with any other component (§4.6).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chronos_cache::Cache;
use chronos_queue::Producer;
use chronos_store::Store;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ReconcilerConfig {
    pub cleanup_interval: Duration,
    pub healthcheck_interval: Duration,
    pub recover_limit: u32,
}

pub struct Reconciler {
    config: ReconcilerConfig,
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    producer: Arc<dyn Producer>,
    running: Arc<AtomicBool>,
}

impl Reconciler {
    pub fn new(
        config: ReconcilerConfig,
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        producer: Arc<dyn Producer>,
    ) -> Self {
        Self {
            config,
            store,
            cache,
            producer,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Runs until [`Reconciler::stop`] is called. Intended to be spawned as
    /// its own task at boot, after one startup cleanup+recover pass.
    pub async fn run(&self) {
        info!("reconciler starting startup cleanup+recover pass");
        self.cleanup_tick().await;
        self.recover().await;

        let mut cleanup_ticker = tokio::time::interval(self.config.cleanup_interval);
        let mut health_ticker = tokio::time::interval(self.config.healthcheck_interval);
        // The startup pass above already covered the first tick of each.
        cleanup_ticker.reset();
        health_ticker.reset();

        let mut was_unhealthy = false;

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = cleanup_ticker.tick() => {
                    self.cleanup_tick().await;
                }
                _ = health_ticker.tick() => {
                    was_unhealthy = self.healthcheck_tick(was_unhealthy).await;
                }
            }
        }

        info!("reconciler loop exited");
    }

    async fn cleanup_tick(&self) {
        match self.store.cleanup().await {
            Ok(deleted) => {
                if deleted > 0 {
                    info!(deleted, "retention cleanup removed rows");
                }
            }
            Err(e) => error!(error = %e, "retention cleanup failed, loop continues"),
        }
    }

    /// Returns the new value of `was_unhealthy` for the next tick.
    async fn healthcheck_tick(&self, was_unhealthy: bool) -> bool {
        let healthy = self.producer.is_healthy().await;

        if !healthy {
            warn!("DDQ healthcheck failed, marking overdue pending notifications as late");
            match self.store.mark_lates().await {
                Ok(ids) => {
                    if !ids.is_empty() {
                        if let Err(e) = self.cache.mark_lates(&ids).await {
                            // Propagated and logged, not swallowed (§9 design note).
                            error!(error = %e, count = ids.len(), "cache mark_lates failed");
                        }
                    }
                }
                Err(e) => error!(error = %e, "store mark_lates failed"),
            }
            return true;
        }

        if was_unhealthy {
            info!("DDQ recovered from an outage, re-enqueuing pending/late notifications");
            self.recover().await;
        }
        false
    }

    /// Re-enqueues every `pending`/`late` row from the store. Safe to call
    /// repeatedly: per-id queues are idempotent under a duplicate declare
    /// (P4), so a flapping healthcheck never double-delivers.
    async fn recover(&self) {
        match self.store.recover(self.config.recover_limit).await {
            Ok(notifications) => {
                for notification in notifications {
                    if let Err(e) = self.producer.enqueue(&notification).await {
                        error!(id = %notification.id, error = %e, "recovery enqueue failed");
                    }
                }
            }
            Err(e) => error!(error = %e, "recover query failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chronos_cache::CacheError;
    use chronos_common::{Channel, Notification, Status};
    use chronos_store::{NotificationSummary, StoreError};
    use chronos_queue::QueueError;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct MockStore {
        statuses: Mutex<HashMap<Uuid, Status>>,
        recoverable: Mutex<Vec<Notification>>,
        cleanup_calls: Mutex<u32>,
    }

    #[async_trait]
    impl Store for MockStore {
        async fn create(&self, _n: &Notification) -> Result<(), StoreError> {
            Ok(())
        }
        async fn delete(&self, _id: Uuid) -> Result<(), StoreError> {
            Ok(())
        }
        async fn get_status(&self, id: Uuid) -> Result<Status, StoreError> {
            self.statuses.lock().unwrap().get(&id).copied().ok_or(StoreError::NotFound)
        }
        async fn set_status(&self, id: Uuid, status: Status) -> Result<(), StoreError> {
            self.statuses.lock().unwrap().insert(id, status);
            Ok(())
        }
        async fn get_all_statuses(&self) -> Result<Vec<NotificationSummary>, StoreError> {
            Ok(vec![])
        }
        async fn mark_lates(&self) -> Result<Vec<Uuid>, StoreError> {
            let mut statuses = self.statuses.lock().unwrap();
            let mut ids = vec![];
            for (id, status) in statuses.iter_mut() {
                if *status == Status::Pending {
                    *status = Status::Late;
                    ids.push(*id);
                }
            }
            Ok(ids)
        }
        async fn recover(&self, limit: u32) -> Result<Vec<Notification>, StoreError> {
            let recoverable = self.recoverable.lock().unwrap();
            Ok(recoverable.iter().take(limit as usize).cloned().collect())
        }
        async fn cleanup(&self) -> Result<u64, StoreError> {
            *self.cleanup_calls.lock().unwrap() += 1;
            Ok(0)
        }
        async fn is_healthy(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct MockCache {
        lates: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl Cache for MockCache {
        async fn get_status(&self, _id: Uuid) -> Result<Option<Status>, CacheError> {
            Ok(None)
        }
        async fn set_status(&self, _id: Uuid, _status: Status) -> Result<(), CacheError> {
            Ok(())
        }
        async fn mark_lates(&self, ids: &[Uuid]) -> Result<(), CacheError> {
            self.lates.lock().unwrap().extend_from_slice(ids);
            Ok(())
        }
        async fn is_healthy(&self) -> bool {
            true
        }
    }

    struct MockProducer {
        healthy: Mutex<bool>,
        enqueued: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl Producer for MockProducer {
        async fn enqueue(&self, notification: &Notification) -> Result<(), QueueError> {
            self.enqueued.lock().unwrap().push(notification.id);
            Ok(())
        }
        async fn is_healthy(&self) -> bool {
            *self.healthy.lock().unwrap()
        }
    }

    fn sample_notification(id: Uuid, status: Status) -> Notification {
        use chrono::Utc;
        Notification {
            id,
            channel: Channel::Stdout,
            subject: None,
            message: "hi".to_string(),
            status,
            send_at: Utc::now(),
            send_at_local: "now".to_string(),
            recipients: vec![],
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn healthcheck_marks_lates_when_unhealthy() {
        let id = Uuid::new_v4();
        let store = Arc::new(MockStore::default());
        store.statuses.lock().unwrap().insert(id, Status::Pending);
        let cache = Arc::new(MockCache::default());
        let producer = Arc::new(MockProducer { healthy: Mutex::new(false), enqueued: Mutex::new(vec![]) });

        let reconciler = Reconciler::new(
            ReconcilerConfig {
                cleanup_interval: Duration::from_secs(600),
                healthcheck_interval: Duration::from_secs(10),
                recover_limit: 100,
            },
            store.clone(),
            cache.clone(),
            producer.clone(),
        );

        let was_unhealthy = reconciler.healthcheck_tick(false).await;
        assert!(was_unhealthy);
        assert_eq!(store.statuses.lock().unwrap().get(&id), Some(&Status::Late));
        assert_eq!(cache.lates.lock().unwrap().as_slice(), &[id]);
    }

    #[tokio::test]
    async fn healthcheck_recovers_after_flap() {
        let id = Uuid::new_v4();
        let store = Arc::new(MockStore::default());
        store.recoverable.lock().unwrap().push(sample_notification(id, Status::Late));
        let cache = Arc::new(MockCache::default());
        let producer = Arc::new(MockProducer { healthy: Mutex::new(true), enqueued: Mutex::new(vec![]) });

        let reconciler = Reconciler::new(
            ReconcilerConfig {
                cleanup_interval: Duration::from_secs(600),
                healthcheck_interval: Duration::from_secs(10),
                recover_limit: 100,
            },
            store,
            cache,
            producer.clone(),
        );

        let was_unhealthy = reconciler.healthcheck_tick(true).await;
        assert!(!was_unhealthy);
        assert_eq!(producer.enqueued.lock().unwrap().as_slice(), &[id]);
    }

    #[tokio::test]
    async fn healthy_with_no_prior_outage_is_a_noop() {
        let store = Arc::new(MockStore::default());
        let cache = Arc::new(MockCache::default());
        let producer = Arc::new(MockProducer { healthy: Mutex::new(true), enqueued: Mutex::new(vec![]) });

        let reconciler = Reconciler::new(
            ReconcilerConfig {
                cleanup_interval: Duration::from_secs(600),
                healthcheck_interval: Duration::from_secs(10),
                recover_limit: 100,
            },
            store,
            cache,
            producer.clone(),
        );

        let was_unhealthy = reconciler.healthcheck_tick(false).await;
        assert!(!was_unhealthy);
        assert!(producer.enqueued.lock().unwrap().is_empty());
    }
}
