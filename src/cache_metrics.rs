// Cache observers - hit/miss accounting injected into ReadThroughCache
// Each cache gets its own observer instance; nothing here is process-global.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::error::CacheError;
use crate::metrics;

/// Hooks invoked by [`ReadThroughCache`](crate::cache::ReadThroughCache).
///
/// Calls happen on the request path (hit/miss/coalesced) or on the load task
/// (success/failure), never while a mapping lock is held by the caller of the
/// hook, so implementations may do moderate work but should not block.
pub trait CacheObserver: Send + Sync {
    /// A fresh entry was returned without touching the loader.
    fn on_hit(&self, cache: &str, key: &str);

    /// The entry was absent or expired and a new load was started.
    fn on_miss(&self, cache: &str, key: &str);

    /// The caller joined a load already in flight for the same key.
    fn on_coalesced(&self, _cache: &str, _key: &str) {}

    fn on_load_success(&self, _cache: &str, _key: &str, _elapsed: Duration) {}

    fn on_load_failure(&self, _cache: &str, _key: &str, _error: &CacheError) {}
}

/// Observer that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl CacheObserver for NoopObserver {
    fn on_hit(&self, _cache: &str, _key: &str) {}
    fn on_miss(&self, _cache: &str, _key: &str) {}
}

/// In-process counters, readable through [`CounterObserver::snapshot`].
#[derive(Debug, Default)]
pub struct CounterObserver {
    hits: AtomicU64,
    misses: AtomicU64,
    coalesced: AtomicU64,
    load_successes: AtomicU64,
    load_failures: AtomicU64,
    load_time_micros: AtomicU64,
}

impl CounterObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let coalesced = self.coalesced.load(Ordering::Relaxed);
        let load_successes = self.load_successes.load(Ordering::Relaxed);
        let load_failures = self.load_failures.load(Ordering::Relaxed);
        let lookups = hits + misses + coalesced;
        let loads = load_successes + load_failures;

        CacheMetricsSnapshot {
            hits,
            misses,
            coalesced,
            load_successes,
            load_failures,
            hit_rate: if lookups > 0 { hits as f64 / lookups as f64 } else { 0.0 },
            avg_load_time: if loads > 0 {
                Duration::from_micros(self.load_time_micros.load(Ordering::Relaxed) / loads)
            } else {
                Duration::ZERO
            },
        }
    }

    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.coalesced.store(0, Ordering::Relaxed);
        self.load_successes.store(0, Ordering::Relaxed);
        self.load_failures.store(0, Ordering::Relaxed);
        self.load_time_micros.store(0, Ordering::Relaxed);
    }
}

impl CacheObserver for CounterObserver {
    fn on_hit(&self, _cache: &str, _key: &str) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn on_miss(&self, _cache: &str, _key: &str) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn on_coalesced(&self, _cache: &str, _key: &str) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    fn on_load_success(&self, _cache: &str, _key: &str, elapsed: Duration) {
        self.load_successes.fetch_add(1, Ordering::Relaxed);
        self.load_time_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    fn on_load_failure(&self, _cache: &str, _key: &str, _error: &CacheError) {
        self.load_failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of a [`CounterObserver`].
#[derive(Debug, Clone, PartialEq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub coalesced: u64,
    pub load_successes: u64,
    pub load_failures: u64,
    /// hits / (hits + misses + coalesced)
    pub hit_rate: f64,
    pub avg_load_time: Duration,
}

impl CacheMetricsSnapshot {
    /// Number of times the backing loader actually ran.
    pub fn loader_calls(&self) -> u64 {
        self.load_successes + self.load_failures
    }
}

/// Forwards every hook to the `metrics` facade (Prometheus exporter in the
/// benchmark binary). No-op when the `observability` feature is off.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusObserver;

impl CacheObserver for PrometheusObserver {
    fn on_hit(&self, cache: &str, _key: &str) {
        metrics::increment_cache_hit(cache);
    }

    fn on_miss(&self, cache: &str, _key: &str) {
        metrics::increment_cache_miss(cache);
    }

    fn on_coalesced(&self, cache: &str, _key: &str) {
        metrics::increment_cache_coalesced(cache);
    }

    fn on_load_success(&self, cache: &str, _key: &str, elapsed: Duration) {
        metrics::record_cache_load_duration(cache, elapsed);
    }

    fn on_load_failure(&self, cache: &str, _key: &str, error: &CacheError) {
        let kind = match error {
            CacheError::InvalidConfiguration(_) => "invalid_configuration",
            CacheError::LoaderFailure { .. } => "loader_failure",
            CacheError::ReentrantLoadDetected { .. } => "reentrant_load",
        };
        metrics::increment_cache_load_failure(cache, kind);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_snapshot_hit_rate() {
        let observer = CounterObserver::new();
        observer.on_miss("c", "a");
        observer.on_load_success("c", "a", Duration::from_millis(40));
        observer.on_hit("c", "a");
        observer.on_hit("c", "a");
        observer.on_coalesced("c", "a");

        let snapshot = observer.snapshot();
        assert_eq!(snapshot.hits, 2);
        assert_eq!(snapshot.misses, 1);
        assert_eq!(snapshot.coalesced, 1);
        assert_eq!(snapshot.loader_calls(), 1);
        assert!((snapshot.hit_rate - 0.5).abs() < f64::EPSILON);
        assert_eq!(snapshot.avg_load_time, Duration::from_millis(40));
    }

    #[test]
    fn test_counter_reset() {
        let observer = CounterObserver::new();
        observer.on_hit("c", "a");
        observer.on_load_failure("c", "a", &CacheError::InvalidConfiguration("x".into()));
        observer.reset();

        let snapshot = observer.snapshot();
        assert_eq!(snapshot.hits, 0);
        assert_eq!(snapshot.loader_calls(), 0);
        assert_eq!(snapshot.hit_rate, 0.0);
    }
}
