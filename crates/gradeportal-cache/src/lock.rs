//! Short-lived single-owner lock on top of the cache store.

use std::sync::Arc;
use std::time::Duration;

use crate::error::CacheError;
use crate::store::CacheStore;

const LOCK_PREFIX: &str = "lock:";

/// A lock on one cache key, owned by whoever holds the random token.
///
/// The lock expires on its own after `ttl`, so a crashed holder never blocks
/// a key for longer than that. Release only deletes the lock while it still
/// carries this holder's token.
pub struct DistributedLock {
    store: Arc<dyn CacheStore>,
    key: String,
    token: String,
    ttl: Duration,
}

impl DistributedLock {
    pub fn new(store: Arc<dyn CacheStore>, cache_key: &str, ttl: Duration) -> Self {
        Self {
            store,
            key: format!("{LOCK_PREFIX}{cache_key}"),
            token: uuid::Uuid::new_v4().to_string(),
            ttl,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Single SET NX attempt. Returns `true` if this holder now owns the lock.
    pub async fn try_lock(&self) -> Result<bool, CacheError> {
        let acquired = self
            .store
            .set_if_absent(&self.key, &self.token, self.ttl)
            .await?;
        tracing::trace!(key = %self.key, acquired, "lock attempt");
        Ok(acquired)
    }

    /// Best-effort release. Errors are logged and swallowed.
    ///
    /// Returns `true` if the lock was held by this token and is now gone.
    pub async fn unlock(&self) -> bool {
        match self.store.compare_and_delete(&self.key, &self.token).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!(key = %self.key, "lock already expired or taken over");
                false
            }
            Err(e) => {
                tracing::warn!(key = %self.key, error = %e, "failed to release lock");
                false
            }
        }
    }
}
