//! Prometheus exporter for the cache and outbox counters.

use metrics::{Unit, describe_counter};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::MetricsConfig;

static INSTALLED: AtomicBool = AtomicBool::new(false);

/// Installs the Prometheus recorder with an HTTP scrape listener on
/// `metrics.listen_addr`. Must run inside a tokio runtime.
///
/// Returns `true` if the exporter was installed by this call.
pub fn init_metrics(config: &MetricsConfig) -> bool {
    if !config.enabled {
        tracing::debug!("Metrics exporter disabled");
        return false;
    }
    if INSTALLED.swap(true, Ordering::SeqCst) {
        tracing::debug!("Prometheus metrics already initialized");
        return false;
    }

    let addr: SocketAddr = match config.listen_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(listen_addr = %config.listen_addr, error = %e, "Invalid metrics listen address");
            return false;
        }
    };

    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            describe_metrics();
            tracing::info!(%addr, "Prometheus metrics exporter listening");
            true
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to install Prometheus recorder");
            false
        }
    }
}

fn describe_metrics() {
    use gradeportal_cache::metrics::names as cache;

    describe_counter!(cache::CACHE_HITS_TOTAL, Unit::Count, "Cache reads served from the store");
    describe_counter!(cache::CACHE_MISSES_TOTAL, Unit::Count, "Cache reads that found nothing usable");
    describe_counter!(cache::CACHE_LOADER_CALLS_TOTAL, Unit::Count, "Loader invocations against the database");
    describe_counter!(
        cache::CACHE_BACKEND_ERRORS_TOTAL,
        Unit::Count,
        "Cache backend errors, including lock failures"
    );
    describe_counter!(
        gradeportal_outbox::metrics::names::OUTBOX_RECORDS_TOTAL,
        Unit::Count,
        "Outbox records by processing outcome"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_exporter_is_not_installed() {
        assert!(!init_metrics(&MetricsConfig::default()));
    }
}
