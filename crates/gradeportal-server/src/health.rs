//! Health report: cache store reachability, breaker states and outbox backlog.

use gradeportal_cache::{CacheStore, GradeCaches};
use gradeportal_storage::{OutboxStats, OutboxStorage};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Up,
    /// Serving, but reads bypass the cache.
    Degraded,
    /// The database cannot be reached.
    Down,
}

#[derive(Debug, Clone, Serialize)]
pub struct BreakerHealth {
    pub cache: String,
    pub state: String,
    pub failures: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    /// `local` or `redis`
    pub store_mode: &'static str,
    pub store_reachable: bool,
    pub storage_backend: &'static str,
    pub breakers: Vec<BreakerHealth>,
    pub outbox: Option<OutboxStats>,
}

pub async fn check(
    store: &dyn CacheStore,
    caches: &GradeCaches,
    outbox: &dyn OutboxStorage,
    storage_backend: &'static str,
) -> HealthReport {
    let store_reachable = match store.ping().await {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(mode = store.mode(), error = %e, "Cache store ping failed");
            false
        }
    };

    let breakers: Vec<BreakerHealth> = caches
        .breakers()
        .into_iter()
        .map(|breaker| BreakerHealth {
            cache: breaker.name().to_string(),
            state: breaker.state().to_string(),
            failures: breaker.failure_count(),
        })
        .collect();

    let outbox = match outbox.stats().await {
        Ok(stats) => Some(stats),
        Err(e) => {
            tracing::warn!(error = %e, "Outbox stats unavailable");
            None
        }
    };

    let status = if outbox.is_none() {
        HealthStatus::Down
    } else if !store_reachable || breakers.iter().any(|b| b.state != "closed") {
        HealthStatus::Degraded
    } else {
        HealthStatus::Up
    };

    HealthReport {
        status,
        store_mode: store.mode(),
        store_reachable,
        storage_backend,
        breakers,
        outbox,
    }
}
