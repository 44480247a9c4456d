//! AMQP-backed delayed-delivery queue producer.
//!
//! Topology (§6): one durable direct exchange and one durable main queue
//! bound to itself by its own name, declared once at connect time. Every
//! `enqueue` then declares a throwaway, auto-deleting per-id queue with
//! `x-message-ttl` set to the remaining delay and a dead-letter binding back
//! to the main exchange/queue. When the TTL expires the broker moves the
//! message to the main queue on its own; the Producer never has to track
//! pending timers itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use chronos_common::{Notification, RetryPolicy};
use lapin::options::{
    BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::{AMQPValue, FieldTable, LongString};
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::{Producer, QueueError};

#[derive(Debug, Clone)]
pub struct QueueTopology {
    pub amqp_url: String,
    pub exchange_name: String,
    pub main_queue_name: String,
    /// Extra grace period added on top of a per-id queue's own TTL before
    /// the auto-created queue itself expires, so `x-expires` never races
    /// the dead-letter delivery it is supposed to perform.
    pub message_queue_ttl_grace: Duration,
}

impl Default for QueueTopology {
    fn default() -> Self {
        Self {
            amqp_url: "amqp://127.0.0.1:5672/%2f".to_string(),
            exchange_name: "notify.main".to_string(),
            main_queue_name: "notify.main".to_string(),
            message_queue_ttl_grace: Duration::from_secs(60),
        }
    }
}

pub struct AmqpProducer {
    topology: QueueTopology,
    retry: RetryPolicy,
    connection: RwLock<Option<Connection>>,
    channel: RwLock<Option<Channel>>,
    healthy: AtomicBool,
}

impl AmqpProducer {
    pub async fn connect(topology: QueueTopology, retry: RetryPolicy) -> Result<Self, QueueError> {
        let producer = Self {
            topology,
            retry,
            connection: RwLock::new(None),
            channel: RwLock::new(None),
            healthy: AtomicBool::new(false),
        };
        producer.reconnect().await?;
        Ok(producer)
    }

    async fn reconnect(&self) -> Result<(), QueueError> {
        info!(url = %self.topology.amqp_url, "connecting to AMQP broker");

        let connection = Connection::connect(
            &self.topology.amqp_url,
            ConnectionProperties::default().with_connection_name("notify-producer".into()),
        )
        .await?;

        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                &self.topology.exchange_name,
                ExchangeKind::Direct,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_declare(
                &self.topology.main_queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        channel
            .queue_bind(
                &self.topology.main_queue_name,
                &self.topology.exchange_name,
                &self.topology.main_queue_name,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        *self.connection.write().await = Some(connection);
        *self.channel.write().await = Some(channel);
        self.healthy.store(true, Ordering::SeqCst);

        info!(
            exchange = %self.topology.exchange_name,
            main_queue = %self.topology.main_queue_name,
            "DDQ topology declared"
        );
        Ok(())
    }

    fn per_id_queue_name(&self, notification: &Notification) -> String {
        format!("notify.delay.{}", notification.id)
    }

    async fn declare_and_publish(&self, notification: &Notification) -> Result<(), lapin::Error> {
        let guard = self.channel.read().await;
        let channel = guard.as_ref().ok_or(lapin::Error::InvalidChannelState(
            lapin::ChannelState::Closed,
        ))?;

        let remaining = notification.send_at - Utc::now();
        let ttl_ms = remaining.num_milliseconds().max(0);
        let expires_ms = ttl_ms + self.topology.message_queue_ttl_grace.as_millis() as i64;
        let queue_name = self.per_id_queue_name(notification);

        // 365-day-out submissions are ~31.5B ms, well past u32::MAX
        // (~49.7 days); these broker args are a 64-bit `long` on the wire,
        // so use LongLongInt rather than truncating to LongUInt.
        let mut args = FieldTable::default();
        args.insert("x-message-ttl".into(), AMQPValue::LongLongInt(ttl_ms));
        args.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(LongString::from(self.topology.exchange_name.as_str())),
        );
        args.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(LongString::from(self.topology.main_queue_name.as_str())),
        );
        args.insert(
            "x-expires".into(),
            AMQPValue::LongLongInt(expires_ms),
        );

        channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions {
                    durable: true,
                    auto_delete: true,
                    ..Default::default()
                },
                args,
            )
            .await?;

        let body = serde_json::to_vec(notification)
            .expect("Notification serialization is infallible for well-formed structs");

        channel
            .basic_publish(
                "",
                &queue_name,
                BasicPublishOptions::default(),
                &body,
                BasicProperties::default()
                    .with_content_type("application/json".into())
                    .with_message_id(notification.id.to_string().into()),
            )
            .await?
            .await?;

        Ok(())
    }
}

#[async_trait::async_trait]
impl Producer for AmqpProducer {
    async fn enqueue(&self, notification: &Notification) -> Result<(), QueueError> {
        let result = self
            .retry
            .run(|| async { self.declare_and_publish(notification).await })
            .await;

        match result {
            Ok(()) => {
                debug!(id = %notification.id, "notification enqueued into DDQ");
                Ok(())
            }
            Err(e) => {
                let err = QueueError::from(e);
                if err.is_precondition_failed() {
                    // Same id already scheduled under a prior declare; the
                    // design treats this as success so recovery re-enqueues
                    // are idempotent (P4).
                    debug!(id = %notification.id, "DDQ precondition-failed treated as already-scheduled");
                    return Ok(());
                }
                warn!(id = %notification.id, error = %err, "DDQ enqueue failed, attempting reconnect");
                self.healthy.store(false, Ordering::SeqCst);
                let _ = self.reconnect().await;
                Err(err)
            }
        }
    }

    async fn is_healthy(&self) -> bool {
        if !self.healthy.load(Ordering::SeqCst) {
            return false;
        }
        let guard = self.connection.read().await;
        match guard.as_ref() {
            Some(conn) => conn.status().connected(),
            None => false,
        }
    }
}
