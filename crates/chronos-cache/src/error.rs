#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cached value was not a recognized status")]
    Corrupt(String),

    #[error("cache error: {0}")]
    Redis(#[from] redis::RedisError),
}
