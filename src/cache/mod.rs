//! Bounded, TTL-expiring in-process result cache.
//!
//! [`ResultCache`] holds serializable values behind a single mutex so that
//! lookups, admissions, eviction and the background sweep never interleave
//! mid-operation. Both the entry count and the estimated memory (serialized
//! JSON length) are enforced on every [`ResultCache::set`]: eviction runs
//! before the new entry is admitted, never afterwards.
//!
//! A parallel key → ETag map supports conditional revalidation. An entry
//! that expires while an ETag is tracked for it is kept as stale (a `get`
//! still misses) so that a `304 Not Modified` can revive it through
//! [`ResultCache::revalidate`].

mod entry;
mod key;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

use entry::{CacheEntry, select_victim};
pub use entry::EvictionPolicy;
pub use key::cache_key;

/// Default maximum number of entries.
pub const DEFAULT_MAX_ENTRIES: usize = 100;

/// Default memory budget (50 MiB).
pub const DEFAULT_MAX_MEMORY: usize = 50 * 1024 * 1024;

/// Default time-to-live (5 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default background sweep interval (60 seconds).
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Limits and timings for a [`ResultCache`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    pub max_entries: usize,
    /// Memory budget in bytes, measured as serialized JSON length.
    pub max_memory: usize,
    pub default_ttl: Duration,
    pub sweep_interval: Duration,
    pub eviction: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_memory: DEFAULT_MAX_MEMORY,
            default_ttl: DEFAULT_TTL,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            eviction: EvictionPolicy::Lru,
        }
    }
}

/// Point-in-time counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub entries: usize,
    pub memory_used: usize,
    pub max_entries: usize,
    pub max_memory: usize,
    /// `hits / (hits + misses)`, 0 when unused.
    pub hit_rate: f64,
}

#[derive(Debug)]
struct Inner<V> {
    entries: HashMap<String, CacheEntry<V>>,
    etags: HashMap<String, String>,
    memory_used: usize,
    clock: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    expirations: u64,
}

impl<V> Inner<V> {
    fn next_tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn remove(&mut self, key: &str) -> Option<CacheEntry<V>> {
        let removed = self.entries.remove(key)?;
        self.memory_used = self.memory_used.saturating_sub(removed.size_bytes);
        self.etags.remove(key);
        Some(removed)
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.remove(key);
        }
        self.expirations += expired.len() as u64;
        expired.len()
    }

    fn fits(&self, size_bytes: usize, max_entries: usize, max_memory: usize) -> bool {
        self.entries.len() < max_entries && self.memory_used + size_bytes <= max_memory
    }
}

/// Bounded key/value cache with TTL, pluggable eviction and ETag tracking.
#[derive(Debug)]
pub struct ResultCache<V> {
    config: CacheConfig,
    inner: Mutex<Inner<V>>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<V> ResultCache<V>
where
    V: Clone + Serialize + Send + 'static,
{
    /// Creates an empty cache. `max_entries` is raised to at least 1.
    #[must_use]
    pub fn new(mut config: CacheConfig) -> Self {
        config.max_entries = config.max_entries.max(1);
        Self {
            config,
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                etags: HashMap::new(),
                memory_used: 0,
                clock: 0,
                hits: 0,
                misses: 0,
                evictions: 0,
                expirations: 0,
            }),
            sweeper: Mutex::new(None),
        }
    }

    /// Creates a shared cache and starts its background sweep when a Tokio
    /// runtime is available.
    #[must_use]
    pub fn shared(config: CacheConfig) -> Arc<Self> {
        let cache = Arc::new(Self::new(config));
        cache.start_sweeper();
        cache
    }

    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner<V>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a fresh value; an expired entry is a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = Instant::now();
        let mut guard = self.lock();
        let inner = &mut *guard;
        let tick = inner.next_tick();

        match inner.entries.get_mut(key) {
            None => {
                inner.misses += 1;
                return None;
            }
            Some(entry) if !entry.is_expired(now) => {
                entry.touch(tick);
                inner.hits += 1;
                return Some(entry.value.clone());
            }
            Some(_) => {}
        }

        inner.misses += 1;
        if !inner.etags.contains_key(key) {
            inner.remove(key);
            inner.expirations += 1;
            trace!(key, "expired entry removed on access");
        }
        None
    }

    /// Stores `value` for `ttl` (or the default TTL).
    ///
    /// Returns `false` when the value alone exceeds the memory budget and was
    /// not admitted.
    pub fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> bool {
        let size_bytes = estimate_size(&value);
        if size_bytes > self.config.max_memory {
            debug!(
                key,
                size_bytes,
                max_memory = self.config.max_memory,
                "value larger than cache budget, not cached"
            );
            return false;
        }

        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let mut inner = self.lock();

        // Replacing keeps the ETag only when the caller sets it again.
        inner.remove(key);

        if !inner.fits(size_bytes, self.config.max_entries, self.config.max_memory) {
            inner.purge_expired(now);
        }
        while !inner.fits(size_bytes, self.config.max_entries, self.config.max_memory) {
            let Some(victim) = select_victim(&inner.entries, self.config.eviction) else {
                break;
            };
            inner.remove(&victim);
            inner.evictions += 1;
            debug!(victim = %victim, policy = %self.config.eviction, "evicted cache entry");
        }

        let tick = inner.next_tick();
        inner.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                size_bytes,
                expires_at: now + ttl,
                last_accessed: tick,
                inserted: tick,
                hit_count: 0,
            },
        );
        inner.memory_used += size_bytes;
        true
    }

    /// Removes `key` and its ETag.
    pub fn delete(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Drops every entry and ETag. Counters are kept.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.etags.clear();
        inner.memory_used = 0;
    }

    /// Records the ETag of the response that produced `key`'s value.
    pub fn set_etag(&self, key: &str, etag: impl Into<String>) {
        let mut inner = self.lock();
        if inner.entries.contains_key(key) {
            inner.etags.insert(key.to_string(), etag.into());
        }
    }

    /// ETag for `key`, if the entry (fresh or stale) is still held.
    pub fn etag(&self, key: &str) -> Option<String> {
        self.lock().etags.get(key).cloned()
    }

    /// Refreshes a held entry after a `304 Not Modified` and returns it.
    pub fn revalidate(&self, key: &str, ttl: Option<Duration>) -> Option<V> {
        let now = Instant::now();
        let ttl = ttl.unwrap_or(self.config.default_ttl);
        let mut inner = self.lock();
        let tick = inner.next_tick();
        let value = inner.entries.get_mut(key).map(|entry| {
            entry.expires_at = now + ttl;
            entry.touch(tick);
            entry.value.clone()
        });
        if value.is_some() {
            inner.hits += 1;
        }
        value
    }

    /// Removes every expired entry, returning how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let removed = self.lock().purge_expired(Instant::now());
        if removed > 0 {
            debug!(removed, "swept expired cache entries");
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn memory_used(&self) -> usize {
        self.lock().memory_used
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.lock();
        let lookups = inner.hits + inner.misses;
        #[allow(clippy::cast_precision_loss)]
        let hit_rate = if lookups == 0 {
            0.0
        } else {
            inner.hits as f64 / lookups as f64
        };
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            expirations: inner.expirations,
            entries: inner.entries.len(),
            memory_used: inner.memory_used,
            max_entries: self.config.max_entries,
            max_memory: self.config.max_memory,
            hit_rate,
        }
    }

    /// Starts the periodic expiry sweep. No-op outside a Tokio runtime or
    /// when already running.
    pub fn start_sweeper(self: &Arc<Self>) {
        if tokio::runtime::Handle::try_current().is_err() {
            debug!("no Tokio runtime, cache sweep disabled");
            return;
        }
        let mut slot = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval.max(Duration::from_millis(1));
        *slot = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                cache.purge_expired();
            }
        }));
    }

    /// Stops the background sweep.
    pub fn stop_sweeper(&self) {
        if let Some(handle) = self
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

impl<V> Drop for ResultCache<V> {
    fn drop(&mut self) {
        if let Some(handle) = self
            .sweeper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

fn estimate_size<V: Serialize>(value: &V) -> usize {
    serde_json::to_vec(value).map_or(std::mem::size_of::<V>(), |bytes| bytes.len())
}
