//! The delayed-delivery queue (C3/C4) and consumer pool (C5): a broker-backed
//! scheduling substrate that holds a notification until its due time, then
//! dead-letters it to a single consumable main queue.
//!
//! The per-message-TTL + dead-letter pattern turns timing into a stateless
//! broker-driven problem: the service itself holds almost no in-memory timer
//! state. See [`producer::AmqpProducer`] for the topology this relies on.

mod error;
pub mod consumer;
pub mod producer;

pub use error::QueueError;
pub use consumer::{ConsumerConfig, ConsumerPool};
pub use producer::{AmqpProducer, QueueTopology};

use async_trait::async_trait;
use chronos_common::Notification;

/// The Producer's capability (C4), abstracted so the Scheduler and
/// Reconciler can be exercised against a test double without a live broker.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Publish `notification` into its own throwaway per-id queue with a
    /// TTL equal to its remaining delay. A precondition-failed response
    /// from a duplicate declare (recovery re-enqueue after a flap) is
    /// success, not an error — see [`QueueError::is_precondition_failed`].
    async fn enqueue(&self, notification: &Notification) -> Result<(), QueueError>;

    /// Whether the broker connection is currently usable. Consulted by the
    /// Reconciler's healthcheck tick (4.6).
    async fn is_healthy(&self) -> bool;
}
