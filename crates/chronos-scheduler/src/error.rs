use chronos_cache::CacheError;
use chronos_queue::QueueError;
use chronos_store::StoreError;
use thiserror::Error;

use crate::validator::ValidationError;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("notification not found")]
    NotFound,

    #[error("notification is already canceled")]
    AlreadyCanceled,

    #[error("notification cannot be canceled in its current state")]
    CannotCancel,

    #[error("notification could not be queued for urgent delivery: {0}")]
    UrgentDeliveryFailed(QueueError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}
