//! Cache backend errors.
//!
//! These never reach read callers: [`ReadThroughCache`](crate::ReadThroughCache)
//! turns every one of them into a miss and a breaker failure.

/// Errors raised by a [`CacheStore`](crate::CacheStore).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// No connection could be taken from the Redis pool.
    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),

    /// A Redis command failed.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A cached value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The backend is not usable for another reason.
    #[error("Cache backend unavailable: {0}")]
    Unavailable(String),
}

impl CacheError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }
}
