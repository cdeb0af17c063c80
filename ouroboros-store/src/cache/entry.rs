//! Cache entry with generation stamp and optional expiry

use std::time::{Duration, Instant};

/// A cached value plus the bookkeeping needed to decide whether it is live
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,

    /// Cache generation current when the entry was inserted
    pub generation: u64,

    pub expires_at: Option<Instant>,
}

impl<V> CacheEntry<V> {
    pub fn new(value: V, generation: u64, ttl: Option<Duration>) -> Self {
        Self {
            value,
            generation,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|deadline| Instant::now() >= deadline)
            .unwrap_or(false)
    }

    /// Inserted before the cache's current generation
    pub fn is_stale(&self, current_generation: u64) -> bool {
        self.generation < current_generation
    }
}
