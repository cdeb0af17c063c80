//! Cache invalidation events
//!
//! A successful write emits an [`InvalidationEvent`] after it has cleared the
//! local cache. The event goes to an [`InvalidationSink`]; shipping it to peer
//! processes is the sink's job. Peers hand received events to
//! [`LayeredStore::apply_invalidation`](crate::store::LayeredStore::apply_invalidation),
//! which clears the same entries from their local caches.

use crate::cache::types::CacheName;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which entries of a cache an event covers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "key", rename_all = "snake_case")]
pub enum InvalidationScope {
    /// Every entry in the cache
    All,

    /// Entries belonging to this key.
    ///
    /// For keyed caches this is the exact key; for channel listings it is the
    /// channel id and covers every page window of that channel.
    Key(String),

    /// Posts of the thread rooted at this id, root included
    Thread(String),

    /// Entries belonging to this channel
    Channel(String),
}

/// Entity-scoped signal that matching cache entries are stale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvalidationEvent {
    /// Cache the event applies to
    pub cache: CacheName,

    /// Entries covered
    pub scope: InvalidationScope,

    /// When the invalidation occurred
    pub timestamp: DateTime<Utc>,

    /// Additional context
    pub context: Option<String>,
}

impl InvalidationEvent {
    pub fn new(cache: CacheName, scope: InvalidationScope) -> Self {
        Self {
            cache,
            scope,
            timestamp: Utc::now(),
            context: None,
        }
    }

    /// Invalidate a single key
    pub fn key(cache: CacheName, key: impl Into<String>) -> Self {
        Self::new(cache, InvalidationScope::Key(key.into()))
    }

    /// Invalidate an entire cache
    pub fn all(cache: CacheName) -> Self {
        Self::new(cache, InvalidationScope::All)
    }

    /// Add context to the event
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    /// Serialize for a cluster transport
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Deserialize an event received from a peer
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

/// Receives invalidation events for delivery to peer processes
pub trait InvalidationSink: Send + Sync {
    fn publish(&self, event: &InvalidationEvent);
}

/// Sink for single-process deployments
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopInvalidationSink;

impl InvalidationSink for NoopInvalidationSink {
    fn publish(&self, _event: &InvalidationEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_constructors() {
        let event = InvalidationEvent::key(CacheName::Posts, "post1").with_context("update");
        assert_eq!(event.cache, CacheName::Posts);
        assert_eq!(event.scope, InvalidationScope::Key("post1".to_string()));
        assert_eq!(event.context.as_deref(), Some("update"));

        let event = InvalidationEvent::all(CacheName::Channels);
        assert_eq!(event.scope, InvalidationScope::All);
    }

    #[test]
    fn test_event_wire_format() {
        let event = InvalidationEvent::key(CacheName::PostListings, "chan1");
        let json = event.to_json().unwrap();

        assert!(json.contains("\"cache\":\"post_listings\""));
        assert!(json.contains("\"kind\":\"key\""));

        let decoded = InvalidationEvent::from_json(&json).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_scoped_event_wire_format() {
        let event = InvalidationEvent::new(CacheName::Posts, InvalidationScope::Thread("root1".to_string()));
        let json = event.to_json().unwrap();
        assert!(json.contains("\"kind\":\"thread\""));
        assert!(json.contains("\"key\":\"root1\""));
        assert_eq!(InvalidationEvent::from_json(&json).unwrap(), event);
    }
}
