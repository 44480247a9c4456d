//! The consumer pool (C5): a configured number of workers reading the main
//! queue, invoking the `Notifier`, and applying the status rewrites that
//! carry a notification to its terminal state (§4.5).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use chronos_cache::Cache;
use chronos_common::{Notification, Notifier, RetryPolicy, Status};
use chronos_store::Store;
use futures::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions, BasicRejectOptions,
};
use lapin::types::FieldTable;
use lapin::{Connection, ConnectionProperties};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A message arrives past its due time and the notifier still fails: the
/// grace window past which a failed delivery is recorded as a timing
/// failure rather than a plain delivery failure (§3).
const GRACE_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub amqp_url: String,
    pub main_queue_name: String,
    pub workers: u32,
    pub prefetch: u16,
    pub auto_ack: bool,
}

pub struct ConsumerPool {
    config: ConsumerConfig,
    retry: RetryPolicy,
    store: Arc<dyn Store>,
    cache: Arc<dyn Cache>,
    notifier: Arc<dyn Notifier>,
    running: Arc<AtomicBool>,
}

enum Outcome {
    Success,
    Failure,
}

impl ConsumerPool {
    pub fn new(
        config: ConsumerConfig,
        retry: RetryPolicy,
        store: Arc<dyn Store>,
        cache: Arc<dyn Cache>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            retry,
            store,
            cache,
            notifier,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Spawn the configured number of worker tasks, each with its own AMQP
    /// channel and consumer. Returns once every worker has connected.
    pub async fn spawn(self: Arc<Self>) -> Result<(), crate::QueueError> {
        for worker_id in 0..self.config.workers {
            let pool = self.clone();
            tokio::spawn(async move {
                if let Err(e) = pool.run_worker(worker_id).await {
                    error!(worker_id, error = %e, "consumer worker exited with error");
                }
            });
        }
        Ok(())
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    async fn run_worker(&self, worker_id: u32) -> Result<(), crate::QueueError> {
        let connection = Connection::connect(
            &self.config.amqp_url,
            ConnectionProperties::default()
                .with_connection_name(format!("notify-consumer-{worker_id}").into()),
        )
        .await?;
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(self.config.prefetch, BasicQosOptions::default())
            .await?;

        let mut consumer = channel
            .basic_consume(
                &self.config.main_queue_name,
                &format!("notify-consumer-{worker_id}"),
                BasicConsumeOptions {
                    no_ack: self.config.auto_ack,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(worker_id, queue = %self.config.main_queue_name, "consumer worker started");

        while self.running.load(Ordering::SeqCst) {
            let delivery = match tokio::time::timeout(Duration::from_millis(500), consumer.next())
                .await
            {
                Ok(Some(Ok(delivery))) => delivery,
                Ok(Some(Err(e))) => {
                    warn!(worker_id, error = %e, "error receiving AMQP delivery");
                    continue;
                }
                Ok(None) => {
                    warn!(worker_id, "consumer stream ended");
                    break;
                }
                Err(_) => continue, // timeout; loop back and re-check `running`
            };

            let delivery_tag = delivery.delivery_tag;

            let notification: Notification = match serde_json::from_slice(&delivery.data) {
                Ok(n) => n,
                Err(e) => {
                    error!(worker_id, error = %e, "failed to decode queued notification, rejecting");
                    if !self.config.auto_ack {
                        let _ = channel
                            .basic_reject(delivery_tag, BasicRejectOptions { requeue: false })
                            .await;
                    }
                    continue;
                }
            };

            self.process(&channel, delivery_tag, notification).await;
        }

        Ok(())
    }

    async fn process(&self, channel: &lapin::Channel, delivery_tag: u64, notification: Notification) {
        let id = notification.id;

        let current_status = match self.store.get_status(id).await {
            Ok(status) => status,
            Err(e) => {
                warn!(id = %id, error = %e, "notification not found at delivery time, rejecting");
                if !self.config.auto_ack {
                    let _ = channel
                        .basic_reject(delivery_tag, BasicRejectOptions { requeue: false })
                        .await;
                }
                return;
            }
        };

        if current_status == Status::Canceled {
            debug!(id = %id, "dropping delivery for canceled notification");
            if !self.config.auto_ack {
                let _ = channel.basic_ack(delivery_tag, BasicAckOptions::default()).await;
            }
            return;
        }

        match self.notifier.deliver(&notification).await {
            Ok(()) => {
                self.apply_status(id, notification.send_at, Outcome::Success).await;
                if !self.config.auto_ack {
                    let _ = channel.basic_ack(delivery_tag, BasicAckOptions::default()).await;
                }
            }
            Err(e) => {
                error!(id = %id, error = %e, "notifier delivery failed");
                if current_status != Status::Failed {
                    self.apply_status(id, notification.send_at, Outcome::Failure).await;
                } else {
                    debug!(id = %id, "already failed, not rewriting terminal status again");
                }
                if !self.config.auto_ack {
                    let _ = channel
                        .basic_nack(delivery_tag, BasicNackOptions { requeue: false, ..Default::default() })
                        .await;
                }
            }
        }
    }

    /// The two deterministic rewrites of §4.5: success always lands on
    /// `sent` regardless of how late the delivery was (pending|late → sent
    /// per the transition table, §3) — a determination made mid-flight from
    /// timing never overwrites an actual successful delivery. Failure lands
    /// on `failed` unless the grace window has already passed, in which
    /// case it is recorded as a timing failure instead.
    async fn apply_status(&self, id: Uuid, send_at: chrono::DateTime<Utc>, outcome: Outcome) {
        let new_status = match outcome {
            Outcome::Success => Status::Sent,
            Outcome::Failure => {
                if Utc::now() - send_at > ChronoDuration::seconds(GRACE_WINDOW_SECS) {
                    Status::FailedToSendInTime
                } else {
                    Status::Failed
                }
            }
        };

        // Cache and store are written independently under the shared retry
        // policy; either failing is logged but never blocks the other
        // (cache is a non-authoritative accelerator, §4.2/4.7).
        if let Err(e) = self
            .retry
            .run(|| async { self.cache.set_status(id, new_status).await })
            .await
        {
            warn!(id = %id, status = %new_status, error = %e, "failed to write status to cache");
        }

        if let Err(e) = self
            .retry
            .run(|| async { self.store.set_status(id, new_status).await })
            .await
        {
            error!(id = %id, status = %new_status, error = %e, "failed to write status to store");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grace_window_matches_design() {
        assert_eq!(GRACE_WINDOW_SECS, 60);
    }
}
