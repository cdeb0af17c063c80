//! Bounded LRU cache with TTL and generation-tagged invalidation

use crate::cache::{
    config::{ttl_with_jitter, CacheSpec},
    entry::CacheEntry,
    types::CacheStats,
};
use lru::LruCache;
use parking_lot::Mutex;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::time::Duration;
use tracing::{debug, info};

/// Fixed-capacity key/value cache with strict least-recently-used eviction.
///
/// - Thread-safe: one exclusive lock guards the recency order and the key
///   index together, held only for the bookkeeping itself
/// - Optional per-entry TTL; expired entries are dropped lazily on read
/// - [`bump_generation`](Self::bump_generation) turns every existing entry
///   into a miss without walking the map
/// - Read-through fills use [`epoch`](Self::epoch) and
///   [`set_if_epoch`](Self::set_if_epoch) so a value loaded before an
///   invalidation is never stored after it
/// - Never fails: a full cache evicts rather than rejects
pub struct BoundedCache<K, V> {
    name: &'static str,
    default_ttl: Option<Duration>,
    ttl_jitter: f64,
    inner: Mutex<Inner<K, V>>,
}

struct Inner<K, V> {
    entries: LruCache<K, CacheEntry<V>>,
    generation: u64,
    /// Advanced by every removal, purge and generation bump
    epoch: u64,
    stats: CacheStats,
}

impl<K: Hash + Eq, V> Inner<K, V> {
    fn insert(&mut self, key: K, value: V, ttl: Option<Duration>) {
        let entry = CacheEntry::new(value, self.generation, ttl);

        let evicts = !self.entries.contains(&key) && self.entries.len() == self.entries.cap().get();
        self.entries.push(key, entry);
        if evicts {
            self.stats.evictions_capacity += 1;
        }
    }
}

enum Lookup {
    Missing,
    Expired,
    Stale,
    Live,
}

impl<K, V> BoundedCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache holding at most `capacity` entries without expiry.
    ///
    /// A capacity of zero is raised to one.
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        debug!("Initializing cache {} with capacity {}", name, capacity);

        Self {
            name,
            default_ttl: None,
            ttl_jitter: 0.0,
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                generation: 0,
                epoch: 0,
                stats: CacheStats::default(),
            }),
        }
    }

    /// Create a cache from a policy entry
    pub fn from_spec(name: &'static str, spec: &CacheSpec, ttl_jitter: f64) -> Self {
        let mut cache = Self::new(name, spec.capacity);
        cache.default_ttl = spec.ttl;
        cache.ttl_jitter = ttl_jitter;
        cache
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().entries.cap().get()
    }

    /// Look up `key`, promoting it to most-recently-used on a hit
    pub fn get(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        let generation = inner.generation;

        let lookup = match inner.entries.peek(key) {
            None => Lookup::Missing,
            Some(entry) if entry.is_expired() => Lookup::Expired,
            Some(entry) if entry.is_stale(generation) => Lookup::Stale,
            Some(_) => Lookup::Live,
        };

        match lookup {
            Lookup::Live => {
                inner.stats.hits += 1;
                inner.entries.get(key).map(|entry| entry.value.clone())
            }
            Lookup::Missing => {
                inner.stats.misses += 1;
                None
            }
            Lookup::Expired => {
                inner.entries.pop(key);
                inner.stats.misses += 1;
                inner.stats.evictions_ttl += 1;
                None
            }
            Lookup::Stale => {
                inner.entries.pop(key);
                inner.stats.misses += 1;
                inner.stats.invalidations += 1;
                None
            }
        }
    }

    /// Check for a live entry without touching recency or counters
    pub fn contains(&self, key: &K) -> bool {
        let inner = self.inner.lock();
        inner
            .entries
            .peek(key)
            .map(|entry| !entry.is_expired() && !entry.is_stale(inner.generation))
            .unwrap_or(false)
    }

    fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl
            .map(|ttl| ttl_with_jitter(ttl, self.ttl_jitter))
    }

    /// Insert with the cache's default TTL
    pub fn set(&self, key: K, value: V) {
        let ttl = self.default_ttl();
        self.inner.lock().insert(key, value, ttl);
    }

    /// Insert with an explicit TTL
    pub fn set_with_ttl(&self, key: K, value: V, ttl: Duration) {
        self.inner.lock().insert(key, value, Some(ttl));
    }

    /// Current invalidation epoch; read it before loading a value to fill
    /// the cache with
    pub fn epoch(&self) -> u64 {
        self.inner.lock().epoch
    }

    /// Insert with the default TTL unless anything was invalidated since
    /// `epoch` was read. Returns whether the value was stored.
    pub fn set_if_epoch(&self, key: K, value: V, epoch: u64) -> bool {
        let ttl = self.default_ttl();
        let mut inner = self.inner.lock();
        if inner.epoch != epoch {
            debug!("Skipping fill of cache {}: invalidated while loading", self.name);
            return false;
        }
        inner.insert(key, value, ttl);
        true
    }

    /// Remove `key`, returning its value if it was present
    pub fn remove(&self, key: &K) -> Option<V> {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        let removed = inner.entries.pop(key).map(|entry| entry.value);
        if removed.is_some() {
            inner.stats.invalidations += 1;
        }
        removed
    }

    /// Remove every entry matching `predicate`
    pub fn remove_where<F>(&self, predicate: F) -> Vec<K>
    where
        F: Fn(&K, &V) -> bool,
    {
        let mut inner = self.inner.lock();
        inner.epoch += 1;
        let doomed: Vec<K> = inner
            .entries
            .iter()
            .filter(|(key, entry)| predicate(key, &entry.value))
            .map(|(key, _)| key.clone())
            .collect();

        for key in &doomed {
            inner.entries.pop(key);
        }
        inner.stats.invalidations += doomed.len() as u64;

        doomed
    }

    /// Drop every entry
    pub fn purge(&self) {
        let mut inner = self.inner.lock();
        let count = inner.entries.len();
        inner.entries.clear();
        inner.epoch += 1;
        inner.stats.invalidations += count as u64;

        info!("Purged {} entries from cache {}", count, self.name);
    }

    /// Start a new generation; every existing entry becomes a miss.
    ///
    /// Stale entries keep their slots until read or evicted.
    pub fn bump_generation(&self) -> u64 {
        let mut inner = self.inner.lock();
        inner.generation += 1;
        inner.epoch += 1;
        debug!("Cache {} advanced to generation {}", self.name, inner.generation);
        inner.generation
    }

    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Number of occupied slots, including entries not yet lazily evicted
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys ordered from most to least recently used
    pub fn keys(&self) -> Vec<K> {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(key, _)| key.clone())
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            entries: inner.entries.len(),
            ..inner.stats.clone()
        }
    }
}
