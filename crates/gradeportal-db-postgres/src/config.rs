//! Connection settings for the grade database.

use serde::{Deserialize, Serialize};

/// Primary and optional replica connection, shared pool sizing.
///
/// Missing fields fall back to [`PostgresConfig::default`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PostgresConfig {
    /// Primary: release policy reads and every transaction.
    pub url: String,
    /// Summary and grade list reads. Falls back to the primary pool.
    pub replica_url: Option<String>,
    /// Maximum connections per pool.
    pub pool_size: u32,
    /// Defaults to a quarter of `pool_size`, at least one.
    pub min_connections: Option<u32>,
    /// Also bounds how long a request waits for a free connection.
    pub connect_timeout_ms: u64,
    pub idle_timeout_ms: Option<u64>,
    pub max_lifetime_secs: Option<u64>,
    /// Apply the embedded schema migrations on startup.
    pub run_migrations: bool,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/gradeportal".into(),
            replica_url: None,
            pool_size: 10,
            min_connections: None,
            connect_timeout_ms: 5000,
            idle_timeout_ms: Some(300_000),
            max_lifetime_secs: None,
            run_migrations: true,
        }
    }
}

impl PostgresConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_replica_url(mut self, url: impl Into<String>) -> Self {
        self.replica_url = Some(url.into());
        self
    }

    #[must_use]
    pub fn with_pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }
}
