//! Cache metrics, labelled by cache name.

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    pub const CACHE_HITS_TOTAL: &str = "cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "cache_misses_total";
    pub const CACHE_LOADER_CALLS_TOTAL: &str = "cache_loader_calls_total";
    pub const CACHE_BACKEND_ERRORS_TOTAL: &str = "cache_backend_errors_total";
}

pub fn record_cache_hit(cache: &'static str) {
    counter!(names::CACHE_HITS_TOTAL, "cache" => cache).increment(1);
}

pub fn record_cache_miss(cache: &'static str) {
    counter!(names::CACHE_MISSES_TOTAL, "cache" => cache).increment(1);
}

pub fn record_loader_call(cache: &'static str) {
    counter!(names::CACHE_LOADER_CALLS_TOTAL, "cache" => cache).increment(1);
}

pub fn record_backend_error(cache: &'static str) {
    counter!(names::CACHE_BACKEND_ERRORS_TOTAL, "cache" => cache).increment(1);
}
