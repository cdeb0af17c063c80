//! # Bounded caching layer
//!
//! In-memory caches used by the cache-capable suppliers in front of the SQL
//! backing store.
//!
//! ## Features
//!
//! - **LRU Eviction**: fixed capacity, strict least-recently-used order
//! - **TTL Expiration**: optional per-entry lifetime with jitter
//! - **Generations**: invalidate a whole cache in O(1) without clearing it
//! - **Invalidation Events**: serialisable events for cluster-wide fan-out
//!
//! ## Example
//!
//! ```rust
//! use ouroboros_store::cache::BoundedCache;
//!
//! let cache = BoundedCache::new("example", 2);
//! cache.set("a", 1);
//! cache.set("b", 2);
//! cache.get(&"a");
//! cache.set("c", 3);
//!
//! // "b" was least recently used
//! assert_eq!(cache.keys(), vec!["c", "a"]);
//! ```

pub mod config;
pub mod entry;
pub mod invalidation;
pub mod store;
pub mod types;

pub use config::{CachePolicy, CachePolicyBuilder, CacheSpec};
pub use entry::CacheEntry;
pub use invalidation::{InvalidationEvent, InvalidationScope, InvalidationSink, NoopInvalidationSink};
pub use store::BoundedCache;
pub use types::{CacheName, CacheStats};
