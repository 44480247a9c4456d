//! The Scheduler (C7): orchestrates the create/get/cancel/list operations
//! across validation, the durable store, the status cache, and the
//! delayed-delivery producer. Nothing below talks to a real database,
//! broker, or cache directly — it only knows the [`Store`], [`Cache`], and
//! [`Producer`] traits, so it can be exercised against in-memory doubles.

mod error;
pub mod validator;

pub use error::SchedulerError;
pub use validator::{CreateNotificationInput, NewNotification, ValidationError};

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, Utc};
use chronos_cache::Cache;
use chronos_common::{Notification, Status};
use chronos_queue::Producer;
use chronos_store::{NotificationSummary, Store, StoreError};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Enqueue failures inside this window of the due time fail the create
/// outright rather than leaving it for the reconciler, since there may not
/// be enough runway left for a later recovery pass to make the deadline.
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    pub urgent_window: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            urgent_window: Duration::from_secs(3600),
        }
    }
}

pub struct Scheduler {
    config: SchedulerConfig,
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    producer: Arc<dyn Producer>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        producer: Arc<dyn Producer>,
    ) -> Self {
        Self {
            config,
            store,
            cache,
            producer,
        }
    }

    pub async fn create_notification(
        &self,
        input: CreateNotificationInput<'_>,
    ) -> Result<Notification, SchedulerError> {
        let draft = validator::validate(input, Utc::now())?;

        let notification = Notification {
            id: Uuid::new_v4(),
            channel: draft.channel,
            subject: draft.subject,
            message: draft.message,
            status: Status::Pending,
            send_at: draft.send_at,
            send_at_local: draft.send_at.with_timezone(&Local).to_rfc3339(),
            recipients: draft.recipients,
            updated_at: Utc::now(),
        };

        self.store.create(&notification).await?;

        if let Err(e) = self.producer.enqueue(&notification).await {
            let remaining = notification.send_at - Utc::now();
            let urgent_window = chrono::Duration::from_std(self.config.urgent_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(3600));

            if remaining < urgent_window {
                warn!(
                    id = %notification.id,
                    error = %e,
                    "enqueue failed within the urgent window, rolling back create"
                );
                if let Err(delete_err) = self.store.delete(notification.id).await {
                    error!(id = %notification.id, error = %delete_err, "rollback delete failed");
                }
                return Err(SchedulerError::UrgentDeliveryFailed(e));
            }

            warn!(
                id = %notification.id,
                error = %e,
                "enqueue failed outside the urgent window, leaving for reconciler recovery"
            );
        }

        Ok(notification)
    }

    pub async fn get_status(&self, id: Uuid) -> Result<Status, SchedulerError> {
        if let Some(status) = self.cache.get_status(id).await.unwrap_or_else(|e| {
            warn!(id = %id, error = %e, "cache read failed, falling through to store");
            None
        }) {
            return Ok(status);
        }

        let status = match self.store.get_status(id).await {
            Ok(status) => status,
            Err(StoreError::NotFound) => return Err(SchedulerError::NotFound),
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self.cache.set_status(id, status).await {
            warn!(id = %id, error = %e, "write-through cache population failed");
        }

        Ok(status)
    }

    pub async fn get_all_statuses(&self) -> Result<Vec<NotificationSummary>, SchedulerError> {
        Ok(self.store.get_all_statuses().await?)
    }

    /// Cancels a pending or late notification. The cache is consulted first
    /// purely as a fast-reject optimization: once a notification reaches a
    /// terminal state it never leaves it, so a cache hit on a terminal
    /// status is trustworthy even if stale. Everything else falls through
    /// to the store's single conditional `UPDATE`, which is the only
    /// authoritative writer of a cancellation.
    pub async fn cancel_notification(&self, id: Uuid) -> Result<(), SchedulerError> {
        if let Ok(Some(status)) = self.cache.get_status(id).await {
            if status == Status::Canceled {
                return Err(SchedulerError::AlreadyCanceled);
            }
            if status.is_terminal() {
                return Err(SchedulerError::CannotCancel);
            }
        }

        match self.store.set_status(id, Status::Canceled).await {
            Ok(()) => {
                if let Err(e) = self.cache.set_status(id, Status::Canceled).await {
                    warn!(id = %id, error = %e, "write-through cache update failed after cancel");
                }
                info!(id = %id, "notification canceled");
                Ok(())
            }
            Err(StoreError::NotFound) => Err(SchedulerError::NotFound),
            Err(StoreError::CannotCancel) => {
                let actual = self.store.get_status(id).await?;
                if let Err(e) = self.cache.set_status(id, actual).await {
                    warn!(id = %id, error = %e, "write-through cache update failed after rejected cancel");
                }
                if actual == Status::Canceled {
                    Err(SchedulerError::AlreadyCanceled)
                } else {
                    Err(SchedulerError::CannotCancel)
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chronos_cache::CacheError;
    use chronos_common::Channel;
    use chronos_queue::QueueError;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MockStore {
        rows: Mutex<HashMap<Uuid, Notification>>,
        deletes: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl Store for MockStore {
        async fn create(&self, n: &Notification) -> Result<(), StoreError> {
            self.rows.lock().unwrap().insert(n.id, n.clone());
            Ok(())
        }
        async fn delete(&self, id: Uuid) -> Result<(), StoreError> {
            self.rows.lock().unwrap().remove(&id);
            self.deletes.lock().unwrap().push(id);
            Ok(())
        }
        async fn get_status(&self, id: Uuid) -> Result<Status, StoreError> {
            self.rows
                .lock()
                .unwrap()
                .get(&id)
                .map(|n| n.status)
                .ok_or(StoreError::NotFound)
        }
        async fn set_status(&self, id: Uuid, status: Status) -> Result<(), StoreError> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows.get_mut(&id).ok_or(StoreError::NotFound)?;
            if status == Status::Canceled && !row.status.is_cancelable() {
                return Err(StoreError::CannotCancel);
            }
            row.status = status;
            Ok(())
        }
        async fn get_all_statuses(&self) -> Result<Vec<NotificationSummary>, StoreError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .values()
                .map(|n| NotificationSummary {
                    id: n.id,
                    send_at: n.send_at,
                    status: n.status,
                })
                .collect())
        }
        async fn mark_lates(&self) -> Result<Vec<Uuid>, StoreError> {
            Ok(vec![])
        }
        async fn recover(&self, _limit: u32) -> Result<Vec<Notification>, StoreError> {
            Ok(vec![])
        }
        async fn cleanup(&self) -> Result<u64, StoreError> {
            Ok(0)
        }
        async fn is_healthy(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct MockCache {
        statuses: Mutex<HashMap<Uuid, Status>>,
    }

    #[async_trait]
    impl Cache for MockCache {
        async fn get_status(&self, id: Uuid) -> Result<Option<Status>, CacheError> {
            Ok(self.statuses.lock().unwrap().get(&id).copied())
        }
        async fn set_status(&self, id: Uuid, status: Status) -> Result<(), CacheError> {
            self.statuses.lock().unwrap().insert(id, status);
            Ok(())
        }
        async fn mark_lates(&self, _ids: &[Uuid]) -> Result<(), CacheError> {
            Ok(())
        }
        async fn is_healthy(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct MockProducer {
        fail: bool,
    }

    #[async_trait]
    impl Producer for MockProducer {
        async fn enqueue(&self, _notification: &Notification) -> Result<(), QueueError> {
            if self.fail {
                Err(QueueError::NotConnected)
            } else {
                Ok(())
            }
        }
        async fn is_healthy(&self) -> bool {
            !self.fail
        }
    }

    fn scheduler(store: Arc<MockStore>, cache: Arc<MockCache>, producer_fail: bool) -> Scheduler {
        Scheduler::new(
            SchedulerConfig::default(),
            store,
            cache,
            Arc::new(MockProducer { fail: producer_fail }),
        )
    }

    fn future_timestamp() -> String {
        (Utc::now() + chrono::Duration::days(1)).to_rfc3339()
    }

    #[tokio::test]
    async fn create_persists_and_enqueues() {
        let store = Arc::new(MockStore::default());
        let cache = Arc::new(MockCache::default());
        let scheduler = scheduler(store.clone(), cache, false);

        let send_at = future_timestamp();
        let empty = vec![];
        let input = CreateNotificationInput {
            channel: "stdout",
            subject: None,
            message: "hi",
            send_at: &send_at,
            recipients: &empty,
        };

        let notification = scheduler.create_notification(input).await.unwrap();
        assert_eq!(notification.status, Status::Pending);
        assert_eq!(notification.channel, Channel::Stdout);
        assert!(store.rows.lock().unwrap().contains_key(&notification.id));
    }

    #[tokio::test]
    async fn create_rejects_invalid_input_without_touching_store() {
        let store = Arc::new(MockStore::default());
        let cache = Arc::new(MockCache::default());
        let scheduler = scheduler(store.clone(), cache, false);

        let empty = vec![];
        let input = CreateNotificationInput {
            channel: "",
            subject: None,
            message: "hi",
            send_at: "",
            recipients: &empty,
        };

        let result = scheduler.create_notification(input).await;
        assert!(matches!(result, Err(SchedulerError::Validation(ValidationError::MissingChannel))));
        assert!(store.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_rolls_back_on_urgent_enqueue_failure() {
        let store = Arc::new(MockStore::default());
        let cache = Arc::new(MockCache::default());
        let scheduler = scheduler(store.clone(), cache, true);

        // Due in 10 seconds: well inside the default 1h urgent window.
        let send_at = (Utc::now() + chrono::Duration::seconds(10)).to_rfc3339();
        let empty = vec![];
        let input = CreateNotificationInput {
            channel: "stdout",
            subject: None,
            message: "hi",
            send_at: &send_at,
            recipients: &empty,
        };

        let result = scheduler.create_notification(input).await;
        assert!(matches!(result, Err(SchedulerError::UrgentDeliveryFailed(_))));
        assert!(store.rows.lock().unwrap().is_empty());
        assert_eq!(store.deletes.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn create_keeps_row_on_non_urgent_enqueue_failure() {
        let store = Arc::new(MockStore::default());
        let cache = Arc::new(MockCache::default());
        let scheduler = scheduler(store.clone(), cache, true);

        let send_at = future_timestamp(); // 1 day out, outside the urgent window
        let empty = vec![];
        let input = CreateNotificationInput {
            channel: "stdout",
            subject: None,
            message: "hi",
            send_at: &send_at,
            recipients: &empty,
        };

        let notification = scheduler.create_notification(input).await.unwrap();
        assert!(store.rows.lock().unwrap().contains_key(&notification.id));
        assert!(store.deletes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn get_status_populates_cache_on_miss() {
        let store = Arc::new(MockStore::default());
        let cache = Arc::new(MockCache::default());
        let scheduler = scheduler(store.clone(), cache.clone(), false);

        let send_at = future_timestamp();
        let empty = vec![];
        let notification = scheduler
            .create_notification(CreateNotificationInput {
                channel: "stdout",
                subject: None,
                message: "hi",
                send_at: &send_at,
                recipients: &empty,
            })
            .await
            .unwrap();

        assert!(cache.statuses.lock().unwrap().get(&notification.id).is_none());
        let status = scheduler.get_status(notification.id).await.unwrap();
        assert_eq!(status, Status::Pending);
        assert_eq!(
            cache.statuses.lock().unwrap().get(&notification.id),
            Some(&Status::Pending)
        );
    }

    #[tokio::test]
    async fn get_status_missing_notification_is_not_found() {
        let store = Arc::new(MockStore::default());
        let cache = Arc::new(MockCache::default());
        let scheduler = scheduler(store, cache, false);

        let result = scheduler.get_status(Uuid::new_v4()).await;
        assert!(matches!(result, Err(SchedulerError::NotFound)));
    }

    #[tokio::test]
    async fn cancel_pending_succeeds_and_write_throughs_cache() {
        let store = Arc::new(MockStore::default());
        let cache = Arc::new(MockCache::default());
        let scheduler = scheduler(store.clone(), cache.clone(), false);

        let send_at = future_timestamp();
        let empty = vec![];
        let notification = scheduler
            .create_notification(CreateNotificationInput {
                channel: "stdout",
                subject: None,
                message: "hi",
                send_at: &send_at,
                recipients: &empty,
            })
            .await
            .unwrap();

        scheduler.cancel_notification(notification.id).await.unwrap();
        assert_eq!(store.rows.lock().unwrap()[&notification.id].status, Status::Canceled);
        assert_eq!(
            cache.statuses.lock().unwrap().get(&notification.id),
            Some(&Status::Canceled)
        );
    }

    #[tokio::test]
    async fn cancel_already_sent_is_rejected_via_cache_fast_path() {
        let store = Arc::new(MockStore::default());
        let cache = Arc::new(MockCache::default());
        let scheduler = scheduler(store.clone(), cache.clone(), false);

        let id = Uuid::new_v4();
        store.rows.lock().unwrap().insert(
            id,
            Notification {
                id,
                channel: Channel::Stdout,
                subject: None,
                message: "hi".to_string(),
                status: Status::Sent,
                send_at: Utc::now(),
                send_at_local: "now".to_string(),
                recipients: vec![],
                updated_at: Utc::now(),
            },
        );
        cache.statuses.lock().unwrap().insert(id, Status::Sent);

        let result = scheduler.cancel_notification(id).await;
        assert!(matches!(result, Err(SchedulerError::CannotCancel)));
    }

    #[tokio::test]
    async fn cancel_already_canceled_reports_already_canceled_on_cache_miss() {
        let store = Arc::new(MockStore::default());
        let cache = Arc::new(MockCache::default());
        let scheduler = scheduler(store.clone(), cache.clone(), false);

        let id = Uuid::new_v4();
        store.rows.lock().unwrap().insert(
            id,
            Notification {
                id,
                channel: Channel::Stdout,
                subject: None,
                message: "hi".to_string(),
                status: Status::Canceled,
                send_at: Utc::now(),
                send_at_local: "now".to_string(),
                recipients: vec![],
                updated_at: Utc::now(),
            },
        );
        // Cache is empty: forces the fall-through to the store's
        // conditional update and the three-way error handling path.
        let result = scheduler.cancel_notification(id).await;
        assert!(matches!(result, Err(SchedulerError::AlreadyCanceled)));
        assert_eq!(
            cache.statuses.lock().unwrap().get(&id),
            Some(&Status::Canceled)
        );
    }
}
