use crate::cache_metrics::{CacheObserver, NoopObserver};
use crate::error::CacheError;
use crate::metrics;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

type LoadOutcome<V> = Result<Arc<V>, CacheError>;
type Flight<V> = Shared<BoxFuture<'static, LoadOutcome<V>>>;
type Fetch<V> = BoxFuture<'static, anyhow::Result<V>>;

static NEXT_CACHE_ID: AtomicU64 = AtomicU64::new(1);

tokio::task_local! {
    /// (cache id, key) pairs being loaded by the current load task and its ancestors.
    static LOAD_CHAIN: Vec<(u64, String)>;
}

fn is_reentrant(cache_id: u64, key: &str) -> bool {
    LOAD_CHAIN
        .try_with(|chain| chain.iter().any(|(id, k)| *id == cache_id && k == key))
        .unwrap_or(false)
}

fn extend_load_chain(cache_id: u64, key: &str) -> Vec<(u64, String)> {
    let mut chain = LOAD_CHAIN.try_with(|chain| chain.clone()).unwrap_or_default();
    chain.push((cache_id, key.to_string()));
    chain
}

/// Construction parameters for a [`ReadThroughCache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Label used in logs and metrics
    pub name: String,
    /// Default time-to-live for entries loaded through `get`
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            ttl: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl CacheConfig {
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
        }
    }
}

enum Slot<V> {
    /// `expires_at` is `None` when `loaded_at + ttl` is past the clock's range.
    Ready { value: Arc<V>, expires_at: Option<Instant> },
    Loading { flight: Flight<V>, generation: u64 },
}

enum Lookup<V> {
    Hit(Arc<V>),
    Join(Flight<V>),
    Load,
}

struct Inner<V> {
    id: u64,
    name: String,
    ttl: Duration,
    slots: DashMap<String, Slot<V>>,
    observer: Arc<dyn CacheObserver>,
    generations: AtomicU64,
}

/// In-memory read-through cache with per-key request coalescing.
///
/// On a miss the supplied loader runs exactly once per key, in its own tokio
/// task, and every caller that asks for the same key while it runs awaits that
/// single result. Successful values are kept for the TTL; failures are handed
/// to all waiters and never cached.
///
/// ## Concurrency
///
/// - Only slot metadata lives under the map's shard locks; loaders run outside
///   them, so a slow key never blocks lookups of other keys.
/// - A started load always runs to completion, even if every caller that was
///   waiting on it is dropped.
/// - Values are published as `Arc<V>` and replaced, never mutated in place.
///
/// ## Re-entrancy
///
/// A loader for key `K` must not call `get(K)` on the same cache (directly or
/// through a chain of loads). That call is answered with
/// [`CacheError::ReentrantLoadDetected`] instead of deadlocking. Detection
/// follows the load chain through task-locals; work the loader hands to a
/// separately spawned task is not tracked.
///
/// The chain only covers loads this task started. If A's loader joins a load
/// of B that another caller started, B's chain is just `[B]`, and B's loader
/// asking for A joins A's flight and waits forever. Loaders that can form such
/// cycles need a timeout of their own.
pub struct ReadThroughCache<V> {
    inner: Arc<Inner<V>>,
}

impl<V> Clone for ReadThroughCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> fmt::Debug for ReadThroughCache<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("name", &self.inner.name)
            .field("ttl", &self.inner.ttl)
            .field("entries", &self.inner.slots.len())
            .finish()
    }
}

impl<V> ReadThroughCache<V>
where
    V: Send + Sync + 'static,
{
    /// Create a cache without metrics.
    ///
    /// Fails with `InvalidConfiguration` when `config.ttl` is zero.
    pub fn new(config: CacheConfig) -> Result<Self, CacheError> {
        Self::with_observer(config, Arc::new(NoopObserver))
    }

    /// Create a cache reporting hits/misses/loads to `observer`.
    pub fn with_observer(
        config: CacheConfig,
        observer: Arc<dyn CacheObserver>,
    ) -> Result<Self, CacheError> {
        validate_ttl(config.ttl)?;
        Ok(Self {
            inner: Arc::new(Inner {
                id: NEXT_CACHE_ID.fetch_add(1, Ordering::Relaxed),
                name: config.name,
                ttl: config.ttl,
                slots: DashMap::new(),
                observer,
                generations: AtomicU64::new(0),
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Get `key`, loading it with `loader` and the cache's TTL on a miss.
    pub async fn get<F, Fut>(&self, key: &str, loader: F) -> Result<Arc<V>, CacheError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        self.get_with_ttl(key, self.inner.ttl, loader).await
    }

    /// Get `key`, loading it with `loader` on a miss and keeping the result for `ttl`.
    ///
    /// `loader` is only called when this caller starts the load; callers that
    /// join an in-flight load drop their loader unused. The closure is invoked
    /// after the key's `Loading` marker is in place and the map lock has been
    /// released, so it may call back into the cache; the future it returns is
    /// polled on a separate task.
    pub async fn get_with_ttl<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        loader: F,
    ) -> Result<Arc<V>, CacheError>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = anyhow::Result<V>> + Send + 'static,
    {
        validate_key(key)?;
        validate_ttl(ttl)?;
        if is_reentrant(self.inner.id, key) {
            warn!(cache = %self.inner.name, key, "re-entrant load rejected");
            return Err(CacheError::ReentrantLoadDetected {
                key: key.to_string(),
            });
        }

        let (flight, pending) = {
            let entry = self.inner.slots.entry(key.to_string());
            let lookup = match &entry {
                Entry::Occupied(occupied) => match occupied.get() {
                    Slot::Ready { value, expires_at } if is_fresh(*expires_at, Instant::now()) => {
                        Lookup::Hit(Arc::clone(value))
                    }
                    Slot::Loading { flight, .. } => Lookup::Join(flight.clone()),
                    Slot::Ready { .. } => Lookup::Load,
                },
                Entry::Vacant(_) => Lookup::Load,
            };

            match lookup {
                Lookup::Hit(value) => {
                    drop(entry);
                    self.inner.observer.on_hit(&self.inner.name, key);
                    return Ok(value);
                }
                Lookup::Join(flight) => {
                    drop(entry);
                    self.inner.observer.on_coalesced(&self.inner.name, key);
                    (flight, None)
                }
                Lookup::Load => {
                    let (flight, generation, sender) = self.start_load(key, ttl);
                    let slot = Slot::Loading {
                        flight: flight.clone(),
                        generation,
                    };
                    match entry {
                        Entry::Occupied(mut occupied) => {
                            debug!(cache = %self.inner.name, key, "entry expired, reloading");
                            occupied.insert(slot);
                        }
                        Entry::Vacant(vacant) => {
                            vacant.insert(slot);
                        }
                    }
                    (flight, Some(sender))
                }
            }
        };

        if let Some(sender) = pending {
            self.inner.observer.on_miss(&self.inner.name, key);
            let chain = extend_load_chain(self.inner.id, key);
            let fetch = LOAD_CHAIN.scope(chain, loader(key.to_string())).boxed();
            // The receiver is gone only if the load task was aborted; the flight reports that.
            let _ = sender.send(fetch);
        }

        flight.await
    }

    /// Spawn the load task for `key`. The task waits for the loader's future
    /// on the returned sender, so the loader can be invoked after the slot
    /// lock is released.
    fn start_load(
        &self,
        key: &str,
        ttl: Duration,
    ) -> (Flight<V>, u64, oneshot::Sender<Fetch<V>>) {
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel::<Fetch<V>>();

        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = match receiver.await {
                Ok(fetch) => match AssertUnwindSafe(fetch).catch_unwind().await {
                    Ok(Ok(value)) => Ok(Arc::new(value)),
                    Ok(Err(e)) => Err(CacheError::loader_failure(&owned_key, e)),
                    Err(_) => Err(CacheError::loader_failure(
                        &owned_key,
                        anyhow::anyhow!("loader panicked"),
                    )),
                },
                // The loader closure panicked before returning a future.
                Err(_) => Err(CacheError::loader_failure(
                    &owned_key,
                    anyhow::anyhow!("loader panicked before starting"),
                )),
            };
            inner.complete(&owned_key, generation, ttl, &outcome, started.elapsed());
            outcome
        });

        let inner = Arc::clone(&self.inner);
        let owned_key = key.to_string();
        let flight = async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(join_error) => {
                    // Only reachable when the runtime cancels the load task.
                    inner.discard(&owned_key, generation);
                    Err(CacheError::loader_failure(
                        &owned_key,
                        anyhow::anyhow!("load task did not complete: {}", join_error),
                    ))
                }
            }
        }
        .boxed()
        .shared();

        (flight, generation, sender)
    }

    /// Remove any entry or in-flight marker for `key`.
    ///
    /// A load already running for `key` still answers its current waiters but
    /// will not publish its value; the next `get` starts a fresh load.
    pub fn invalidate(&self, key: &str) {
        if self.inner.slots.remove(key).is_some() {
            debug!(cache = %self.inner.name, key, "entry invalidated");
        }
    }

    /// Drop every entry and in-flight marker.
    pub fn invalidate_all(&self) {
        let before = self.inner.slots.len();
        self.inner.slots.clear();
        debug!(cache = %self.inner.name, removed = before, "cache cleared");
        metrics::set_cache_size(&self.inner.name, 0.0);
    }

    /// Remove expired ready entries. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut removed = 0;
        self.inner.slots.retain(|_, slot| match slot {
            Slot::Ready { expires_at, .. } if !is_fresh(*expires_at, now) => {
                removed += 1;
                false
            }
            _ => true,
        });
        if removed > 0 {
            debug!(cache = %self.inner.name, removed, "purged expired entries");
        }
        metrics::set_cache_size(&self.inner.name, self.inner.slots.len() as f64);
        removed
    }

    /// Entries held, ready (fresh or expired) and loading.
    pub fn len(&self) -> usize {
        self.inner.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.slots.is_empty()
    }

    /// Number of keys with a load in flight.
    pub fn in_flight(&self) -> usize {
        self.inner
            .slots
            .iter()
            .filter(|slot| matches!(slot.value(), Slot::Loading { .. }))
            .count()
    }

    /// Whether `key` currently has a fresh value, without touching observers.
    pub fn contains_fresh(&self, key: &str) -> bool {
        match self.inner.slots.get(key) {
            Some(slot) => match slot.value() {
                Slot::Ready { expires_at, .. } => is_fresh(*expires_at, Instant::now()),
                Slot::Loading { .. } => false,
            },
            None => false,
        }
    }
}

impl<V> Inner<V> {
    fn owns_flight(slot: &Slot<V>, generation: u64) -> bool {
        matches!(slot, Slot::Loading { generation: g, .. } if *g == generation)
    }

    /// Publish or discard the outcome of load `generation` for `key`.
    ///
    /// The slot is only touched while it still holds this load's marker; an
    /// invalidation (or a newer load) in the meantime wins.
    fn complete(
        &self,
        key: &str,
        generation: u64,
        ttl: Duration,
        outcome: &LoadOutcome<V>,
        elapsed: Duration,
    ) {
        match outcome {
            Ok(value) => {
                let mut published = false;
                if let Some(mut slot) = self.slots.get_mut(key) {
                    if Self::owns_flight(&slot, generation) {
                        *slot = Slot::Ready {
                            value: Arc::clone(value),
                            expires_at: Instant::now().checked_add(ttl),
                        };
                        published = true;
                    }
                }
                if published {
                    debug!(cache = %self.name, key, elapsed_ms = elapsed.as_millis() as u64, "value loaded and cached");
                } else {
                    debug!(cache = %self.name, key, "value loaded after invalidation, not cached");
                }
                self.observer.on_load_success(&self.name, key, elapsed);
                metrics::set_cache_size(&self.name, self.slots.len() as f64);
            }
            Err(error) => {
                self.discard(key, generation);
                warn!(cache = %self.name, key, error = %error, "load failed");
                self.observer.on_load_failure(&self.name, key, error);
            }
        }
    }

    fn discard(&self, key: &str, generation: u64) {
        self.slots
            .remove_if(key, |_, slot| Self::owns_flight(slot, generation));
    }
}

fn is_fresh(expires_at: Option<Instant>, now: Instant) -> bool {
    expires_at.map_or(true, |at| now < at)
}

fn validate_key(key: &str) -> Result<(), CacheError> {
    if key.is_empty() {
        return Err(CacheError::InvalidConfiguration(
            "cache key must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_ttl(ttl: Duration) -> Result<(), CacheError> {
    if ttl.is_zero() {
        return Err(CacheError::InvalidConfiguration(
            "ttl must be greater than zero".to_string(),
        ));
    }
    Ok(())
}
