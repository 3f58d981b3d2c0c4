//! Read-through cache with single-flight loading and breaker bypass.
//!
//! ## Lookup Order
//!
//! ```text
//! get_or_load → breaker open?  → loader (no cache traffic)
//!             → cache hit?     → value
//!             → lock acquired? → re-check, loader, put, unlock
//!             → lock busy      → re-poll with exponential backoff, then loader
//! ```
//!
//! Backend errors never reach the caller: they count as a miss and a breaker failure.

use rand::Rng;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::breaker::CircuitBreaker;
use crate::config::LoadPolicy;
use crate::lock::DistributedLock;
use crate::metrics;
use crate::store::CacheStore;

/// The business-identifier part of a cache key.
pub trait CacheKey: Send + Sync {
    fn cache_key(&self) -> String;
}

pub struct ReadThroughCache<K, V> {
    name: &'static str,
    prefix: String,
    store: Arc<dyn CacheStore>,
    breaker: Arc<CircuitBreaker>,
    policy: LoadPolicy,
    _marker: PhantomData<fn(&K) -> V>,
}

impl<K, V> ReadThroughCache<K, V>
where
    K: CacheKey,
    V: Serialize + DeserializeOwned + Send,
{
    /// Creates a cache whose keys are `{namespace}{name}:{business key}`.
    pub fn new(
        name: &'static str,
        namespace: &str,
        store: Arc<dyn CacheStore>,
        breaker: Arc<CircuitBreaker>,
        policy: LoadPolicy,
    ) -> Self {
        Self {
            name,
            prefix: format!("{namespace}{name}:"),
            store,
            breaker,
            policy,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn policy(&self) -> &LoadPolicy {
        &self.policy
    }

    /// Full backend key for `key`.
    pub fn key(&self, key: &K) -> String {
        format!("{}{}", self.prefix, key.cache_key())
    }

    /// TTL for a new entry, uniform in `[base_ttl, base_ttl + ttl_jitter]`.
    pub fn effective_ttl(&self) -> Duration {
        self.policy
            .base_ttl
            .saturating_add(random_up_to(self.policy.ttl_jitter))
    }

    /// Sleep before re-poll `attempt` (0-based): `backoff_base * 2^attempt` plus jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.policy
            .backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
            .saturating_add(random_up_to(self.policy.backoff_jitter))
    }

    /// Cached value for `key`, or `None` on miss, open breaker, corrupt entry or backend error.
    pub async fn get(&self, key: &K) -> Option<V> {
        if self.breaker.is_open() {
            metrics::record_cache_miss(self.name);
            return None;
        }

        let cache_key = self.key(key);
        match self.store.get(&cache_key).await {
            Ok(Some(bytes)) => {
                self.breaker.record_success();
                match serde_json::from_slice::<V>(&bytes) {
                    Ok(value) => {
                        tracing::debug!(cache = self.name, key = %cache_key, "cache hit");
                        metrics::record_cache_hit(self.name);
                        Some(value)
                    }
                    Err(e) => {
                        tracing::warn!(
                            cache = self.name,
                            key = %cache_key,
                            error = %e,
                            "corrupt cache entry, evicting"
                        );
                        self.evict_key(&cache_key).await;
                        metrics::record_cache_miss(self.name);
                        None
                    }
                }
            }
            Ok(None) => {
                self.breaker.record_success();
                tracing::debug!(cache = self.name, key = %cache_key, "cache miss");
                metrics::record_cache_miss(self.name);
                None
            }
            Err(e) => {
                self.breaker.record_failure();
                metrics::record_backend_error(self.name);
                metrics::record_cache_miss(self.name);
                tracing::warn!(
                    cache = self.name,
                    key = %cache_key,
                    error = %e,
                    "cache read failed, falling back to source"
                );
                None
            }
        }
    }

    /// Cached value for `key`, loading and caching it on a miss.
    ///
    /// Concurrent misses on one key are funnelled through a [`DistributedLock`]
    /// so that only the lock holder calls `loader`; the others re-poll the cache
    /// and load themselves only after `retry_attempts` unsuccessful polls.
    ///
    /// # Errors
    ///
    /// Returns the loader's error unchanged. Nothing is cached in that case.
    pub async fn get_or_load<F, Fut, E>(&self, key: &K, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        if self.breaker.is_open() {
            tracing::debug!(cache = self.name, "circuit open, loading from source");
            metrics::record_loader_call(self.name);
            return loader().await;
        }

        if let Some(value) = self.get(key).await {
            return Ok(value);
        }

        let cache_key = self.key(key);
        let lock = DistributedLock::new(self.store.clone(), &cache_key, self.policy.lock_ttl);

        match lock.try_lock().await {
            Ok(true) => {
                let result = match self.get(key).await {
                    Some(value) => Ok(value),
                    None => self.load_and_put(key, loader).await,
                };
                lock.unlock().await;
                result
            }
            Ok(false) => {
                for attempt in 0..self.policy.retry_attempts {
                    tokio::time::sleep(self.backoff(attempt)).await;
                    if let Some(value) = self.get(key).await {
                        return Ok(value);
                    }
                }
                tracing::debug!(
                    cache = self.name,
                    key = %cache_key,
                    attempts = self.policy.retry_attempts,
                    "lock still held after retries, loading from source"
                );
                self.load_and_put(key, loader).await
            }
            Err(e) => {
                self.breaker.record_failure();
                metrics::record_backend_error(self.name);
                tracing::warn!(
                    cache = self.name,
                    key = %cache_key,
                    error = %e,
                    "lock acquisition failed, loading from source"
                );
                self.load_and_put(key, loader).await
            }
        }
    }

    async fn load_and_put<F, Fut, E>(&self, key: &K, loader: F) -> Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V, E>>,
    {
        metrics::record_loader_call(self.name);
        let value = loader().await?;
        self.put(key, &value).await;
        Ok(value)
    }

    /// Writes `value` with a jittered TTL. Failures are logged, never returned.
    pub async fn put(&self, key: &K, value: &V) {
        if self.breaker.is_open() {
            return;
        }

        let cache_key = self.key(key);
        let bytes = match serde_json::to_vec(value) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(cache = self.name, key = %cache_key, error = %e, "failed to serialize cache value");
                return;
            }
        };

        let ttl = self.effective_ttl();
        match self.store.set(&cache_key, bytes, ttl).await {
            Ok(()) => {
                self.breaker.record_success();
                tracing::debug!(cache = self.name, key = %cache_key, ttl_secs = ttl.as_secs(), "cached");
            }
            Err(e) => {
                self.breaker.record_failure();
                metrics::record_backend_error(self.name);
                tracing::warn!(cache = self.name, key = %cache_key, error = %e, "cache write failed");
            }
        }
    }

    /// Deletes the entry for `key`. Failures are logged, never returned.
    pub async fn evict(&self, key: &K) {
        let cache_key = self.key(key);
        self.evict_key(&cache_key).await;
    }

    async fn evict_key(&self, cache_key: &str) {
        match self.store.delete(cache_key).await {
            Ok(()) => {
                self.breaker.record_success();
                tracing::debug!(cache = self.name, key = %cache_key, "evicted");
            }
            Err(e) => {
                self.breaker.record_failure();
                metrics::record_backend_error(self.name);
                tracing::warn!(cache = self.name, key = %cache_key, error = %e, "cache eviction failed");
            }
        }
    }

    /// Remaining TTL of the entry for `key`, if any.
    pub async fn remaining_ttl(&self, key: &K) -> Option<Duration> {
        self.store.ttl(&self.key(key)).await.ok().flatten()
    }
}

fn random_up_to(max: Duration) -> Duration {
    let max_ms = u64::try_from(max.as_millis()).unwrap_or(u64::MAX);
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CacheError;
    use crate::store::LocalStore;
    use async_trait::async_trait;
    use proptest::prelude::*;
    use serde::Deserialize;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Grade {
        letter: String,
    }

    struct StudentKey(i64);

    impl CacheKey for StudentKey {
        fn cache_key(&self) -> String {
            self.0.to_string()
        }
    }

    /// Wraps a local store and fails every call while `down` is set.
    #[derive(Default)]
    struct FlakyStore {
        inner: LocalStore,
        down: AtomicBool,
        calls: AtomicUsize,
    }

    impl FlakyStore {
        fn check(&self) -> Result<(), CacheError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.down.load(Ordering::SeqCst) {
                Err(CacheError::unavailable("connection refused"))
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl CacheStore for FlakyStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
            self.check()?;
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
            self.check()?;
            self.inner.set(key, value, ttl).await
        }
        async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, CacheError> {
            self.check()?;
            self.inner.set_if_absent(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            self.check()?;
            self.inner.delete(key).await
        }
        async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, CacheError> {
            self.check()?;
            self.inner.compare_and_delete(key, expected).await
        }
        async fn ttl(&self, key: &str) -> Result<Option<Duration>, CacheError> {
            self.check()?;
            self.inner.ttl(key).await
        }
        async fn ping(&self) -> Result<(), CacheError> {
            self.check()
        }
        fn mode(&self) -> &'static str {
            "flaky"
        }
    }

    fn cache_on(store: Arc<dyn CacheStore>, threshold: u32) -> ReadThroughCache<StudentKey, Grade> {
        ReadThroughCache::new(
            "summary",
            "",
            store,
            Arc::new(CircuitBreaker::new("summary", threshold, Duration::from_secs(60))),
            LoadPolicy::default(),
        )
    }

    fn grade(letter: &str) -> Grade {
        Grade {
            letter: letter.to_string(),
        }
    }

    #[test]
    fn test_key_layout() {
        let store: Arc<dyn CacheStore> = Arc::new(LocalStore::new());
        let plain = cache_on(store.clone(), 5);
        assert_eq!(plain.key(&StudentKey(7)), "summary:7");

        let namespaced: ReadThroughCache<StudentKey, Grade> = ReadThroughCache::new(
            "summary",
            "v1:",
            store,
            Arc::new(CircuitBreaker::new("summary", 5, Duration::from_secs(60))),
            LoadPolicy::default(),
        );
        assert_eq!(namespaced.key(&StudentKey(7)), "v1:summary:7");
    }

    #[tokio::test]
    async fn test_put_get_evict() {
        let cache = cache_on(Arc::new(LocalStore::new()), 5);
        assert_eq!(cache.get(&StudentKey(1)).await, None);

        cache.put(&StudentKey(1), &grade("A+")).await;
        assert_eq!(cache.get(&StudentKey(1)).await, Some(grade("A+")));

        cache.evict(&StudentKey(1)).await;
        assert_eq!(cache.get(&StudentKey(1)).await, None);
    }

    #[tokio::test]
    async fn test_put_uses_jittered_ttl() {
        let cache = cache_on(Arc::new(LocalStore::new()), 5);
        cache.put(&StudentKey(1), &grade("B")).await;

        let remaining = cache.remaining_ttl(&StudentKey(1)).await.unwrap();
        let policy = cache.policy();
        assert!(remaining <= policy.base_ttl + policy.ttl_jitter);
        assert!(remaining > policy.base_ttl - Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_evicted() {
        let store = Arc::new(LocalStore::new());
        store
            .set("summary:3", b"not json".to_vec(), Duration::from_secs(60))
            .await
            .unwrap();

        let cache = cache_on(store.clone(), 5);
        assert_eq!(cache.get(&StudentKey(3)).await, None);
        assert_eq!(store.get("summary:3").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_loader_result_is_cached() {
        let cache = cache_on(Arc::new(LocalStore::new()), 5);
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value = cache
                .get_or_load(&StudentKey(1), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(grade("A0"))
                })
                .await
                .unwrap();
            assert_eq!(value, grade("A0"));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_loader_error_propagates_and_is_not_cached() {
        let store = Arc::new(LocalStore::new());
        let cache = cache_on(store.clone(), 5);

        let result = cache
            .get_or_load(&StudentKey(1), || async { Err::<Grade, _>("db down".to_string()) })
            .await;
        assert_eq!(result, Err("db down".to_string()));
        assert_eq!(cache.get(&StudentKey(1)).await, None);
        // The lock was released as well.
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_backend_errors_degrade_to_loader_and_open_breaker() {
        let store = Arc::new(FlakyStore::default());
        store.down.store(true, Ordering::SeqCst);
        let cache = cache_on(store.clone(), 2);

        let first = cache
            .get_or_load(&StudentKey(1), || async { Ok::<_, String>(grade("C")) })
            .await;
        assert_eq!(first, Ok(grade("C")));
        assert!(cache.breaker().is_open());

        // While open, the backend is not touched at all.
        let calls_before = store.calls.load(Ordering::SeqCst);
        let second = cache
            .get_or_load(&StudentKey(1), || async { Ok::<_, String>(grade("C")) })
            .await;
        assert_eq!(second, Ok(grade("C")));
        assert_eq!(cache.get(&StudentKey(1)).await, None);
        assert_eq!(store.calls.load(Ordering::SeqCst), calls_before);
    }

    #[tokio::test]
    async fn test_breaker_recovers_after_cooldown() {
        let store = Arc::new(FlakyStore::default());
        let cache: ReadThroughCache<StudentKey, Grade> = ReadThroughCache::new(
            "summary",
            "",
            store.clone(),
            Arc::new(CircuitBreaker::new("summary", 1, Duration::from_millis(30))),
            LoadPolicy::default(),
        );

        store.down.store(true, Ordering::SeqCst);
        assert_eq!(cache.get(&StudentKey(1)).await, None);
        assert!(cache.breaker().is_open());

        store.down.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;

        cache.put(&StudentKey(1), &grade("A")).await;
        assert_eq!(cache.get(&StudentKey(1)).await, Some(grade("A")));
        assert!(!cache.breaker().is_open());
    }

    #[tokio::test]
    async fn test_failed_evictions_open_breaker() {
        let store = Arc::new(FlakyStore::default());
        store.down.store(true, Ordering::SeqCst);
        let cache = cache_on(store.clone(), 2);

        cache.evict(&StudentKey(1)).await;
        assert_eq!(cache.breaker().failure_count(), 1);
        assert!(!cache.breaker().is_open());

        cache.evict(&StudentKey(1)).await;
        assert!(cache.breaker().is_open());
    }

    #[tokio::test]
    async fn test_successful_eviction_clears_failures() {
        let store = Arc::new(FlakyStore::default());
        let cache = cache_on(store.clone(), 3);

        store.down.store(true, Ordering::SeqCst);
        cache.evict(&StudentKey(1)).await;
        assert_eq!(cache.breaker().failure_count(), 1);

        store.down.store(false, Ordering::SeqCst);
        cache.evict(&StudentKey(1)).await;
        assert_eq!(cache.breaker().failure_count(), 0);
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let cache: ReadThroughCache<StudentKey, Grade> = ReadThroughCache::new(
            "summary",
            "",
            Arc::new(LocalStore::new()),
            Arc::new(CircuitBreaker::new("summary", 1, Duration::from_secs(1))),
            LoadPolicy {
                base_ttl: Duration::MAX,
                ttl_jitter: Duration::from_secs(300),
                backoff_base: Duration::MAX,
                backoff_jitter: Duration::from_millis(10),
                ..LoadPolicy::default()
            },
        );
        assert_eq!(cache.effective_ttl(), Duration::MAX);
        assert_eq!(cache.backoff(3), Duration::MAX);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_misses_are_single_flight() {
        let cache = Arc::new(cache_on(Arc::new(LocalStore::new()), 5));
        let calls = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let cache = cache.clone();
                let calls = calls.clone();
                tokio::spawn(async move {
                    cache
                        .get_or_load(&StudentKey(42), || async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, String>(grade("A+"))
                        })
                        .await
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), Ok(grade("A+")));
        }

        let bound = cache.policy().retry_attempts as usize + 1;
        let loads = calls.load(Ordering::SeqCst);
        assert!(loads >= 1);
        assert!(loads <= bound, "loader called {loads} times, bound is {bound}");
    }

    #[test]
    fn test_backoff_doubles() {
        let cache = cache_on(Arc::new(LocalStore::new()), 5);
        let policy = *cache.policy();
        for attempt in 0..4 {
            let base = policy.backoff_base * 2u32.pow(attempt);
            let delay = cache.backoff(attempt);
            assert!(delay >= base);
            assert!(delay <= base + policy.backoff_jitter);
        }
    }

    proptest! {
        #[test]
        fn prop_effective_ttl_within_bounds(base_secs in 1u64..100_000, jitter_secs in 0u64..10_000) {
            let policy = LoadPolicy {
                base_ttl: Duration::from_secs(base_secs),
                ttl_jitter: Duration::from_secs(jitter_secs),
                ..LoadPolicy::default()
            };
            let cache: ReadThroughCache<StudentKey, Grade> = ReadThroughCache::new(
                "summary",
                "",
                Arc::new(LocalStore::new()),
                Arc::new(CircuitBreaker::new("summary", 5, Duration::from_secs(60))),
                policy,
            );
            let ttl = cache.effective_ttl();
            prop_assert!(ttl >= policy.base_ttl);
            prop_assert!(ttl <= policy.base_ttl + policy.ttl_jitter);
        }

        #[test]
        fn prop_backoff_within_bounds(base_ms in 0u64..1_000, jitter_ms in 0u64..500, attempt in 0u32..8) {
            let policy = LoadPolicy {
                backoff_base: Duration::from_millis(base_ms),
                backoff_jitter: Duration::from_millis(jitter_ms),
                ..LoadPolicy::default()
            };
            let cache: ReadThroughCache<StudentKey, Grade> = ReadThroughCache::new(
                "list",
                "",
                Arc::new(LocalStore::new()),
                Arc::new(CircuitBreaker::new("list", 5, Duration::from_secs(60))),
                policy,
            );
            let floor = policy.backoff_base * 2u32.pow(attempt);
            let delay = cache.backoff(attempt);
            prop_assert!(delay >= floor);
            prop_assert!(delay <= floor + policy.backoff_jitter);
        }
    }
}
