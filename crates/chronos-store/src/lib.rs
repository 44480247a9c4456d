//! The durable store (C1): two relational tables — `notifications` and
//! its child `recipients` — holding the canonical status for every
//! submission, plus the recovery and retention queries the Reconciler
//! depends on.

mod error;
pub mod postgres;

pub use error::StoreError;
pub use postgres::PostgresStore;

use async_trait::async_trait;
use chronos_common::{Notification, Status};
use uuid::Uuid;

/// A row in the operator-facing status table: just enough to render
/// `GET /` without pulling full notification bodies.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationSummary {
    pub id: Uuid,
    pub send_at: chrono::DateTime<chrono::Utc>,
    pub status: Status,
}

/// The durable store's contract, abstracted behind a trait so the
/// Scheduler, Consumer Pool and Reconciler can be exercised against an
/// in-memory test double without a live Postgres connection.
#[async_trait]
pub trait Store: Send + Sync {
    async fn create(&self, notification: &Notification) -> Result<(), StoreError>;

    async fn delete(&self, id: Uuid) -> Result<(), StoreError>;

    async fn get_status(&self, id: Uuid) -> Result<Status, StoreError>;

    /// Unconditional for any `new_status` except `Status::Canceled`, which
    /// is conditional on the current status being `pending` or `late`
    /// (enforced in the SQL itself — one round trip, no read-then-write
    /// race). Zero rows affected maps to `CannotCancel` in the
    /// conditional case, `NotFound` otherwise.
    async fn set_status(&self, id: Uuid, new_status: Status) -> Result<(), StoreError>;

    async fn get_all_statuses(&self) -> Result<Vec<NotificationSummary>, StoreError>;

    /// `pending` rows whose `send_at` has passed are flipped to `late`;
    /// returns the ids that were actually updated.
    async fn mark_lates(&self) -> Result<Vec<Uuid>, StoreError>;

    /// Up to `limit` rows in `pending` or `late`, ordered by `send_at`
    /// ascending, for the Reconciler to re-enqueue.
    async fn recover(&self, limit: u32) -> Result<Vec<Notification>, StoreError>;

    /// Retention-based purge; returns the number of rows deleted.
    async fn cleanup(&self) -> Result<u64, StoreError>;

    /// Whether the backing connection pool currently answers a trivial
    /// query. Consulted only by the HTTP readiness probe.
    async fn is_healthy(&self) -> bool;
}
