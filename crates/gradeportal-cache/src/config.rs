//! Cache and Redis settings.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Redis connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisSettings {
    /// Enable Redis (gracefully degrades to the local store without it)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Pool wait/create/recycle timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    2000
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
        }
    }
}

/// TTL of one cache type: `base_ttl_secs` plus a uniform jitter in `[0, jitter_secs]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlSettings {
    #[serde(default = "default_base_ttl_secs")]
    pub base_ttl_secs: u64,

    #[serde(default = "default_jitter_secs")]
    pub jitter_secs: u64,
}

fn default_base_ttl_secs() -> u64 {
    3600
}

fn default_jitter_secs() -> u64 {
    300
}

impl Default for TtlSettings {
    fn default() -> Self {
        Self {
            base_ttl_secs: default_base_ttl_secs(),
            jitter_secs: default_jitter_secs(),
        }
    }
}

impl TtlSettings {
    pub fn base(&self) -> Duration {
        Duration::from_secs(self.base_ttl_secs)
    }

    pub fn jitter(&self) -> Duration {
        Duration::from_secs(self.jitter_secs)
    }
}

/// Read-through cache settings shared by the grade caches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Prefix prepended to every cache key (e.g. "v1:"). Empty by default.
    #[serde(default)]
    pub key_namespace: String,

    #[serde(default)]
    pub summary: TtlSettings,

    #[serde(default)]
    pub list: TtlSettings,

    #[serde(default)]
    pub release_policy: TtlSettings,

    /// Lifetime of a load lock; must exceed the expected loader latency
    #[serde(default = "default_lock_ttl_ms")]
    pub lock_ttl_ms: u64,

    /// How many times a caller that lost the lock re-polls the cache before loading itself
    #[serde(default = "default_lock_retry_attempts")]
    pub lock_retry_attempts: u32,

    #[serde(default = "default_lock_backoff_base_ms")]
    pub lock_backoff_base_ms: u64,

    #[serde(default = "default_lock_backoff_jitter_ms")]
    pub lock_backoff_jitter_ms: u64,

    /// Consecutive backend failures before the breaker opens
    #[serde(default = "default_breaker_failure_threshold")]
    pub breaker_failure_threshold: u32,

    /// Time after the last failure before an open breaker lets a probe through
    #[serde(default = "default_breaker_cooldown_ms")]
    pub breaker_cooldown_ms: u64,
}

fn default_lock_ttl_ms() -> u64 {
    10_000
}

fn default_lock_retry_attempts() -> u32 {
    3
}

fn default_lock_backoff_base_ms() -> u64 {
    20
}

fn default_lock_backoff_jitter_ms() -> u64 {
    10
}

fn default_breaker_failure_threshold() -> u32 {
    5
}

fn default_breaker_cooldown_ms() -> u64 {
    30_000
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            key_namespace: String::new(),
            summary: TtlSettings::default(),
            list: TtlSettings::default(),
            release_policy: TtlSettings::default(),
            lock_ttl_ms: default_lock_ttl_ms(),
            lock_retry_attempts: default_lock_retry_attempts(),
            lock_backoff_base_ms: default_lock_backoff_base_ms(),
            lock_backoff_jitter_ms: default_lock_backoff_jitter_ms(),
            breaker_failure_threshold: default_breaker_failure_threshold(),
            breaker_cooldown_ms: default_breaker_cooldown_ms(),
        }
    }
}

impl CacheSettings {
    /// Load policy for a cache type using the given TTL settings.
    pub fn load_policy(&self, ttl: TtlSettings) -> LoadPolicy {
        LoadPolicy {
            base_ttl: ttl.base(),
            ttl_jitter: ttl.jitter(),
            lock_ttl: Duration::from_millis(self.lock_ttl_ms),
            retry_attempts: self.lock_retry_attempts,
            backoff_base: Duration::from_millis(self.lock_backoff_base_ms),
            backoff_jitter: Duration::from_millis(self.lock_backoff_jitter_ms),
        }
    }

    pub fn breaker_cooldown(&self) -> Duration {
        Duration::from_millis(self.breaker_cooldown_ms)
    }
}

/// Resolved timing parameters of one [`ReadThroughCache`](crate::ReadThroughCache).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadPolicy {
    pub base_ttl: Duration,
    pub ttl_jitter: Duration,
    pub lock_ttl: Duration,
    pub retry_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_jitter: Duration,
}

impl Default for LoadPolicy {
    fn default() -> Self {
        CacheSettings::default().load_policy(TtlSettings::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = CacheSettings::default();
        assert_eq!(settings.key_namespace, "");
        assert_eq!(settings.summary.base_ttl_secs, 3600);
        assert_eq!(settings.summary.jitter_secs, 300);
        assert_eq!(settings.lock_retry_attempts, 3);
        assert_eq!(settings.breaker_failure_threshold, 5);

        let policy = LoadPolicy::default();
        assert_eq!(policy.base_ttl, Duration::from_secs(3600));
        assert_eq!(policy.lock_ttl, Duration::from_secs(10));
        assert_eq!(policy.backoff_base, Duration::from_millis(20));
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let settings: CacheSettings =
            serde_json::from_str(r#"{"key_namespace":"v1:","summary":{"base_ttl_secs":60}}"#)
                .unwrap();
        assert_eq!(settings.key_namespace, "v1:");
        assert_eq!(settings.summary.base_ttl_secs, 60);
        assert_eq!(settings.summary.jitter_secs, 300);
        assert_eq!(settings.list, TtlSettings::default());
    }
}
