//! Primary and replica pool construction.

use std::time::Duration;

use sqlx_core::pool::PoolOptions;
use sqlx_postgres::{PgPool, Postgres};
use tracing::{debug, info, instrument};

use crate::config::PostgresConfig;
use crate::error::{PostgresError, Result};

/// Recycle connections after half an hour unless configured otherwise.
const DEFAULT_MAX_LIFETIME_SECS: u64 = 1800;

/// Opens a pool to `url` sized by `config`. The replica pool reuses the
/// primary's sizing.
///
/// # Errors
///
/// Fails on a zero `pool_size` or when the first connection cannot be made.
#[instrument(skip(config, url), fields(url = %mask_password(url)))]
pub async fn create_pool(url: &str, config: &PostgresConfig) -> Result<PgPool> {
    if config.pool_size == 0 {
        return Err(PostgresError::config("pool_size must be at least 1"));
    }

    let min_connections = config
        .min_connections
        .unwrap_or(config.pool_size / 4)
        .clamp(1, config.pool_size);
    let max_lifetime =
        Duration::from_secs(config.max_lifetime_secs.unwrap_or(DEFAULT_MAX_LIFETIME_SECS));

    info!(
        pool_size = config.pool_size,
        min_connections,
        connect_timeout_ms = config.connect_timeout_ms,
        "Opening grade database pool"
    );

    let mut options = PoolOptions::<Postgres>::new()
        .max_connections(config.pool_size)
        .min_connections(min_connections)
        .acquire_timeout(Duration::from_millis(config.connect_timeout_ms))
        .max_lifetime(max_lifetime)
        .test_before_acquire(false);
    if let Some(idle_ms) = config.idle_timeout_ms {
        options = options.idle_timeout(Duration::from_millis(idle_ms));
    }

    Ok(options.connect(url).await?)
}

/// One `SELECT 1` round trip, run on each pool at startup.
#[instrument(skip(pool))]
pub async fn test_connection(pool: &PgPool) -> Result<()> {
    sqlx_core::query::query("SELECT 1").execute(pool).await?;
    debug!("grade database reachable");
    Ok(())
}

/// Hides the password of a connection URL in log fields.
pub(crate) fn mask_password(url: &str) -> String {
    let scheme_end = url.find("://").map_or(0, |p| p + 3);
    if let Some(at) = url.find('@')
        && let Some(colon) = url[..at].rfind(':')
        && colon > scheme_end
    {
        return format!("{}:****{}", &url[..colon], &url[at..]);
    }
    url.to_string()
}
