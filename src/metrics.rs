// src/metrics.rs

#[cfg(feature = "observability")]
pub use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};

// NOTE: When observability feature is disabled, provide stub implementations
#[cfg(not(feature = "observability"))]
pub enum Unit {}

// Macros for metrics when observability is disabled
#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! counter {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
    ($name:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! gauge {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! histogram {
    ($name:expr, $value:expr $(, $label:expr => $label_value:expr)* $(,)?) => {};
}

// Macros for describe_* functions when observability is disabled
#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_counter {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_gauge {
    ($name:expr, $desc:expr) => {};
}

#[cfg(not(feature = "observability"))]
#[macro_export]
macro_rules! describe_histogram {
    ($name:expr, $unit:expr, $desc:expr) => {};
    ($name:expr, $desc:expr) => {};
}

// Re-export macros for use in this module when observability is disabled
#[cfg(not(feature = "observability"))]
use crate::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

/// Initializes the descriptions for all the metrics in the application.
/// This should be called once at startup.
pub fn describe_metrics() {
    describe_counter!(
        "cache_hits_total",
        Unit::Count,
        "Lookups served from a fresh cache entry, labeled by cache."
    );
    describe_counter!(
        "cache_miss_total",
        Unit::Count,
        "Lookups that started a backing load (absent or expired entry), labeled by cache."
    );
    describe_counter!(
        "cache_coalesced_total",
        Unit::Count,
        "Lookups that joined a load already in flight for the same key, labeled by cache."
    );
    describe_counter!(
        "cache_load_failures_total",
        Unit::Count,
        "Backing loads that failed (never cached), labeled by cache and error kind."
    );
    describe_histogram!(
        "cache_load_duration_ms",
        "Backing load latency in milliseconds, labeled by cache."
    );
    describe_gauge!(
        "cache_size_gauge",
        "Entries currently held by the cache (ready and loading), labeled by cache."
    );
    describe_histogram!(
        "product_lookup_ms",
        "End-to-end product lookup latency in milliseconds, labeled by path (cached, uncached)."
    );
}

// --- Helper functions to update metrics ---

pub fn increment_cache_hit(cache_name: &str) {
    counter!("cache_hits_total", 1, "cache" => cache_name.to_string());
}

pub fn increment_cache_miss(cache_name: &str) {
    counter!("cache_miss_total", 1, "cache" => cache_name.to_string());
}

pub fn increment_cache_coalesced(cache_name: &str) {
    counter!("cache_coalesced_total", 1, "cache" => cache_name.to_string());
}

pub fn increment_cache_load_failure(cache_name: &str, kind: &'static str) {
    counter!("cache_load_failures_total", 1, "cache" => cache_name.to_string(), "kind" => kind);
}

pub fn record_cache_load_duration(cache_name: &str, duration: std::time::Duration) {
    histogram!(
        "cache_load_duration_ms",
        duration.as_secs_f64() * 1000.0,
        "cache" => cache_name.to_string()
    );
}

pub fn set_cache_size(cache_name: &str, size: f64) {
    gauge!("cache_size_gauge", size, "cache" => cache_name.to_string());
}

pub fn record_product_lookup(path: &'static str, duration: std::time::Duration) {
    histogram!("product_lookup_ms", duration.as_secs_f64() * 1000.0, "path" => path);
}
