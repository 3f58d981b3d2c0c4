//! Key-value store backends: local (DashMap) and shared (Redis).
//!
//! ## Cache Modes
//!
//! - **Local**: single-instance mode, entries live in a process-local DashMap
//! - **Redis**: multi-instance mode, entries live in Redis and are shared by every node
//!
//! If Redis is disabled or unreachable at startup, [`create_cache_store`] falls back
//! to local mode.

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use deadpool_redis::Pool;
use redis::AsyncCommands;
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use crate::config::RedisSettings;
use crate::error::CacheError;

/// Deletes `KEYS[1]` only while it still holds `ARGV[1]`.
const COMPARE_AND_DELETE_SCRIPT: &str = r#"
if redis.call('get', KEYS[1]) == ARGV[1] then
    return redis.call('del', KEYS[1])
else
    return 0
end
"#;

static COMPARE_AND_DELETE: LazyLock<redis::Script> =
    LazyLock::new(|| redis::Script::new(COMPARE_AND_DELETE_SCRIPT));

/// Minimal key-value operations the cache layer needs from its backend.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Stores `value` under `key`, expiring after `ttl`.
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Stores `value` only if `key` is absent (SET NX PX). Returns `true` if stored.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration)
    -> Result<bool, CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Atomically deletes `key` if it currently holds `expected`. Returns `true` if deleted.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, CacheError>;

    /// Remaining time to live, or `None` if the key is absent or never expires.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError>;

    /// Round-trips to the backend.
    async fn ping(&self) -> Result<(), CacheError>;

    /// `"local"` or `"redis"`.
    fn mode(&self) -> &'static str;
}

/// A locally cached entry with TTL support.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub cached_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            cached_at: Instant::now(),
            ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.cached_at.elapsed() >= self.ttl
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.ttl.checked_sub(self.cached_at.elapsed()).filter(|d| !d.is_zero())
    }
}

/// Process-local store. Expired entries are dropped lazily on access.
#[derive(Clone, Default)]
pub struct LocalStore {
    entries: Arc<DashMap<String, CachedEntry>>,
}

impl LocalStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for LocalStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired() {
                return Ok(Some(entry.data.as_ref().clone()));
            }
            drop(entry);
            self.entries.remove_if(key, |_, e| e.is_expired());
        }
        Ok(None)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .insert(key.to_string(), CachedEntry::new(value, ttl));
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let entry = CachedEntry::new(value.as_bytes().to_vec(), ttl);
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_expired() {
                    occupied.insert(entry);
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(true)
            }
        }
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        Ok(self
            .entries
            .remove_if(key, |_, entry| {
                !entry.is_expired() && entry.data.as_slice() == expected.as_bytes()
            })
            .is_some())
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        Ok(self.entries.get(key).and_then(|entry| entry.remaining()))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        Ok(())
    }

    fn mode(&self) -> &'static str {
        "local"
    }
}

/// Redis-backed store shared across instances.
#[derive(Clone)]
pub struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    async fn connection(&self) -> Result<deadpool_redis::Connection, CacheError> {
        Ok(self.pool.get().await?)
    }
}

fn as_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut conn = self.connection().await?;
        Ok(conn.get::<_, Option<Vec<u8>>>(key).await?)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.pset_ex::<_, _, ()>(key, value, as_millis(ttl)).await?;
        Ok(())
    }

    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("PX")
            .arg(as_millis(ttl))
            .query_async(&mut conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        let deleted: i64 = COMPARE_AND_DELETE
            .key(key)
            .arg(expected)
            .invoke_async(&mut conn)
            .await?;
        Ok(deleted == 1)
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
        let mut conn = self.connection().await?;
        // -2: missing, -1: no expiry
        let millis: i64 = conn.pttl(key).await?;
        Ok(u64::try_from(millis).ok().map(Duration::from_millis))
    }

    async fn ping(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    fn mode(&self) -> &'static str {
        "redis"
    }
}

/// Build the cache store from settings, falling back to the local store
/// when Redis is disabled or unreachable.
pub async fn create_cache_store(settings: &RedisSettings) -> Arc<dyn CacheStore> {
    if !settings.enabled {
        tracing::info!("Redis disabled, using local cache only");
        return Arc::new(LocalStore::new());
    }

    tracing::info!(url = %settings.url, "Connecting to Redis");

    let mut redis_config = deadpool_redis::Config::from_url(&settings.url);
    if let Some(ref mut pool_config) = redis_config.pool {
        pool_config.max_size = settings.pool_size;
        pool_config.timeouts.wait = Some(Duration::from_millis(settings.timeout_ms));
        pool_config.timeouts.create = Some(Duration::from_millis(settings.timeout_ms));
        pool_config.timeouts.recycle = Some(Duration::from_millis(settings.timeout_ms));
    }

    let pool = match redis_config.create_pool(Some(deadpool_redis::Runtime::Tokio1)) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to create Redis pool. Falling back to local cache."
            );
            return Arc::new(LocalStore::new());
        }
    };

    let store = RedisStore::new(pool);
    match store.ping().await {
        Ok(()) => {
            tracing::info!("Connected to Redis");
            Arc::new(store)
        }
        Err(e) => {
            tracing::warn!(
                error = %e,
                "Failed to connect to Redis. Falling back to local cache."
            );
            Arc::new(LocalStore::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_local_set_get_delete() {
        let store = LocalStore::new();
        store
            .set("summary:1:2024-1", b"{}".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(
            store.get("summary:1:2024-1").await.unwrap(),
            Some(b"{}".to_vec())
        );

        store.delete("summary:1:2024-1").await.unwrap();
        assert_eq!(store.get("summary:1:2024-1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_local_entries_expire() {
        let store = LocalStore::new();
        store
            .set("k", b"v".to_vec(), Duration::from_millis(20))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_local_set_if_absent() {
        let store = LocalStore::new();
        let ttl = Duration::from_secs(10);
        assert!(store.set_if_absent("lock:k", "a", ttl).await.unwrap());
        assert!(!store.set_if_absent("lock:k", "b", ttl).await.unwrap());

        // An expired holder does not block a new one.
        store
            .set_if_absent("lock:short", "a", Duration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(store.set_if_absent("lock:short", "b", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_local_compare_and_delete() {
        let store = LocalStore::new();
        store
            .set_if_absent("lock:k", "owner", Duration::from_secs(10))
            .await
            .unwrap();

        assert!(!store.compare_and_delete("lock:k", "intruder").await.unwrap());
        assert!(store.get("lock:k").await.unwrap().is_some());

        assert!(store.compare_and_delete("lock:k", "owner").await.unwrap());
        assert!(store.get("lock:k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_ttl() {
        let store = LocalStore::new();
        assert_eq!(store.ttl("missing").await.unwrap(), None);

        store
            .set("k", b"v".to_vec(), Duration::from_secs(100))
            .await
            .unwrap();
        let remaining = store.ttl("k").await.unwrap().unwrap();
        assert!(remaining <= Duration::from_secs(100));
        assert!(remaining > Duration::from_secs(99));
        assert_eq!(store.mode(), "local");
    }

    #[tokio::test]
    async fn test_disabled_redis_falls_back_to_local() {
        let settings = RedisSettings {
            enabled: false,
            ..RedisSettings::default()
        };
        let store = create_cache_store(&settings).await;
        assert_eq!(store.mode(), "local");
    }
}
