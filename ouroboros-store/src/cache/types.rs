//! Core type definitions for the cache system

use serde::{Deserialize, Serialize};
use std::fmt;

/// Counters kept by every [`BoundedCache`](super::BoundedCache)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of cache hits
    pub hits: u64,

    /// Total number of cache misses
    pub misses: u64,

    /// Number of entries currently in cache
    pub entries: usize,

    /// Entries evicted to stay within capacity
    pub evictions_capacity: u64,

    /// Entries dropped because their TTL elapsed
    pub evictions_ttl: u64,

    /// Entries dropped by explicit removal, predicate or generation bump
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate cache hit rate as a percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }

    /// Calculate total evictions
    pub fn total_evictions(&self) -> u64 {
        self.evictions_capacity + self.evictions_ttl
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CacheStats {{ hits: {}, misses: {}, hit_rate: {:.2}%, entries: {}, evictions: {}, invalidations: {} }}",
            self.hits,
            self.misses,
            self.hit_rate(),
            self.entries,
            self.total_evictions(),
            self.invalidations
        )
    }
}

/// Identifies one cache instance across processes.
///
/// Invalidation events carry this name so a peer can apply them to its own
/// local copy of the same cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheName {
    /// Single posts keyed by post id
    Posts,

    /// Channel post listings keyed by channel and page window
    PostListings,

    /// Last post update time keyed by channel
    LastPostTime,

    /// Channels keyed by channel id
    Channels,
}

impl CacheName {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheName::Posts => "posts",
            CacheName::PostListings => "post_listings",
            CacheName::LastPostTime => "last_post_time",
            CacheName::Channels => "channels",
        }
    }
}

impl fmt::Display for CacheName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_hit_rate() {
        let stats = CacheStats {
            hits: 80,
            misses: 20,
            ..Default::default()
        };
        assert_eq!(stats.hit_rate(), 80.0);
    }

    #[test]
    fn test_cache_stats_zero_requests() {
        let stats = CacheStats::default();
        assert_eq!(stats.hit_rate(), 0.0);
        assert_eq!(stats.total_evictions(), 0);
    }

    #[test]
    fn test_cache_stats_display() {
        let stats = CacheStats {
            hits: 100,
            misses: 50,
            entries: 75,
            evictions_capacity: 10,
            evictions_ttl: 5,
            invalidations: 3,
        };

        let display = format!("{}", stats);
        assert!(display.contains("hits: 100"));
        assert!(display.contains("evictions: 15"));
    }

    #[test]
    fn test_cache_name_serde() {
        let json = serde_json::to_string(&CacheName::PostListings).unwrap();
        assert_eq!(json, "\"post_listings\"");
        assert_eq!(CacheName::LastPostTime.to_string(), "last_post_time");
    }
}
