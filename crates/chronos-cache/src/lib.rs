//! The status cache (C2): a non-authoritative `id -> status` accelerator
//! with a uniform entry TTL. Losing the cache never changes correctness —
//! every read falls through to the durable store on a miss.

mod error;
pub mod redis_cache;

pub use error::CacheError;
pub use redis_cache::RedisCache;

use async_trait::async_trait;
use chronos_common::Status;
use uuid::Uuid;

#[async_trait]
pub trait Cache: Send + Sync {
    /// Returns the cached status if present, refreshing its TTL so hot
    /// entries stay resident. Returns `None` on a miss; the caller is
    /// responsible for falling through to the store and writing back.
    async fn get_status(&self, id: Uuid) -> Result<Option<Status>, CacheError>;

    async fn set_status(&self, id: Uuid, status: Status) -> Result<(), CacheError>;

    /// Writes `late` for each id in turn. Stops at the first error rather
    /// than attempting every id — the Reconciler decides whether to keep
    /// going after a partial failure.
    async fn mark_lates(&self, ids: &[Uuid]) -> Result<(), CacheError>;

    /// Whether the backing connection currently answers PING. Used only
    /// by the HTTP readiness probe.
    async fn is_healthy(&self) -> bool;
}
