//! # Read-Through Cache
//!
//! An in-process read-through cache with request coalescing (single-flight),
//! plus the product lookup service it was built for: the same repository read
//! exposed through a cached and an uncached path so the two can be compared.
//!
//! ## Overview
//!
//! - **Single-flight**: concurrent misses for one key trigger exactly one
//!   backing load; every caller in that window gets the same result.
//! - **TTL**: values are served until `loaded_at + ttl`, then reloaded.
//! - **No negative caching**: loader failures reach every waiter and leave
//!   the key absent, so the next call retries.
//! - **Injected metrics**: hit/miss accounting goes through a
//!   [`CacheObserver`](cache_metrics::CacheObserver) handed to the cache.
//!
//! ## Example
//!
//! ```no_run
//! use read_through_cache::cache::{CacheConfig, ReadThroughCache};
//! use std::time::Duration;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let cache: ReadThroughCache<String> =
//!     ReadThroughCache::new(CacheConfig::new("greetings", Duration::from_secs(5)))?;
//!
//! let value = cache
//!     .get("p1", |key| async move { anyhow::Ok(format!("hello {}", key)) })
//!     .await?;
//! assert_eq!(value.as_str(), "hello p1");
//! # Ok(())
//! # }
//! ```

// Core
/// Read-through cache with per-key request coalescing
pub mod cache;
/// Cache observers (hit/miss accounting)
pub mod cache_metrics;
/// Error types
pub mod error;

// Product lookup domain
/// Product entity, DTO and repositories
pub mod products;
/// Cached and uncached product services
pub mod product_service;
/// Simulated backing-store latency
pub mod latency;

// Infrastructure
/// PostgreSQL product repository
pub mod database;
/// Metrics and observability
pub mod metrics;

// Settings & Configuration
/// Configuration management
pub mod settings;

// Re-exports for convenience
pub use cache::{CacheConfig, ReadThroughCache};
pub use cache_metrics::{CacheObserver, CounterObserver, NoopObserver, PrometheusObserver};
pub use error::{CacheError, ProductError};
pub use product_service::{ProductCacheService, ProductService};
pub use settings::Settings;
