//! Cache policy for the cache-capable supplier layers

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capacity and lifetime of one bounded cache
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheSpec {
    /// Maximum number of entries
    pub capacity: usize,

    /// Time-to-live of each entry; `None` keeps entries until evicted
    pub ttl: Option<Duration>,
}

impl CacheSpec {
    pub const fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self { capacity, ttl }
    }
}

/// Policy handed to [`LayeredStore::open`](crate::store::LayeredStore::open).
///
/// Default sizes follow the production post store: 1000 channel listings
/// and 25000 last-post-time entries, both held for 15 minutes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePolicy {
    /// When false, no cache layer is inserted into the chains
    pub enabled: bool,

    /// Single posts by id
    pub posts: CacheSpec,

    /// Channel post listings
    pub post_listings: CacheSpec,

    /// Last post update time per channel
    pub last_post_time: CacheSpec,

    /// Channels by id
    pub channels: CacheSpec,

    /// TTL jitter factor (0.0 - 1.0) to spread expiry of entries written together
    pub ttl_jitter: f64,
}

impl Default for CachePolicy {
    fn default() -> Self {
        let fifteen_minutes = Some(Duration::from_secs(900));
        Self {
            enabled: true,
            posts: CacheSpec::new(5_000, fifteen_minutes),
            post_listings: CacheSpec::new(1_000, fifteen_minutes),
            last_post_time: CacheSpec::new(25_000, fifteen_minutes),
            channels: CacheSpec::new(25_000, fifteen_minutes),
            ttl_jitter: 0.1,
        }
    }
}

impl CachePolicy {
    /// Create a new builder for the cache policy
    pub fn builder() -> CachePolicyBuilder {
        CachePolicyBuilder::default()
    }

    /// A policy with no cache layers; every call reaches the backing store
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Small caches for memory-constrained deployments and tests
    pub fn small() -> Self {
        let five_minutes = Some(Duration::from_secs(300));
        Self {
            posts: CacheSpec::new(256, five_minutes),
            post_listings: CacheSpec::new(64, five_minutes),
            last_post_time: CacheSpec::new(256, five_minutes),
            channels: CacheSpec::new(256, five_minutes),
            ..Default::default()
        }
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<(), String> {
        for (name, spec) in [
            ("posts", &self.posts),
            ("post_listings", &self.post_listings),
            ("last_post_time", &self.last_post_time),
            ("channels", &self.channels),
        ] {
            if spec.capacity == 0 {
                return Err(format!("{} capacity must be greater than 0", name));
            }
            if spec.ttl == Some(Duration::ZERO) {
                return Err(format!("{} ttl must be greater than 0", name));
            }
        }

        if !(0.0..=1.0).contains(&self.ttl_jitter) {
            return Err("ttl_jitter must be between 0.0 and 1.0".to_string());
        }

        Ok(())
    }
}

/// Apply `jitter` to `ttl`, never returning less than one millisecond
pub fn ttl_with_jitter(ttl: Duration, jitter: f64) -> Duration {
    if jitter == 0.0 {
        return ttl;
    }

    let base_secs = ttl.as_secs_f64();
    let jitter_range = base_secs * jitter;
    let offset = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;

    Duration::from_secs_f64((base_secs + offset).max(0.001))
}

/// Builder for the cache policy
#[derive(Debug, Default)]
pub struct CachePolicyBuilder {
    enabled: Option<bool>,
    posts: Option<CacheSpec>,
    post_listings: Option<CacheSpec>,
    last_post_time: Option<CacheSpec>,
    channels: Option<CacheSpec>,
    ttl_jitter: Option<f64>,
}

impl CachePolicyBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn posts(mut self, spec: CacheSpec) -> Self {
        self.posts = Some(spec);
        self
    }

    pub fn post_listings(mut self, spec: CacheSpec) -> Self {
        self.post_listings = Some(spec);
        self
    }

    pub fn last_post_time(mut self, spec: CacheSpec) -> Self {
        self.last_post_time = Some(spec);
        self
    }

    pub fn channels(mut self, spec: CacheSpec) -> Self {
        self.channels = Some(spec);
        self
    }

    pub fn ttl_jitter(mut self, jitter: f64) -> Self {
        self.ttl_jitter = Some(jitter);
        self
    }

    pub fn build(self) -> CachePolicy {
        let defaults = CachePolicy::default();

        CachePolicy {
            enabled: self.enabled.unwrap_or(defaults.enabled),
            posts: self.posts.unwrap_or(defaults.posts),
            post_listings: self.post_listings.unwrap_or(defaults.post_listings),
            last_post_time: self.last_post_time.unwrap_or(defaults.last_post_time),
            channels: self.channels.unwrap_or(defaults.channels),
            ttl_jitter: self.ttl_jitter.unwrap_or(defaults.ttl_jitter),
        }
    }
}
