//! Observability callbacks
//!
//! Every method has an empty default, so an implementation only overrides
//! what it records. Hooks run inline on the worker that triggered them and
//! must not block.

use crate::cache::CacheName;
use crate::connection::ConnectionRole;

pub trait StoreHooks: Send + Sync {
    fn on_cache_hit(&self, _cache: CacheName) {}

    fn on_cache_miss(&self, _cache: CacheName) {}

    /// A read was routed to `role`
    fn on_replica_selected(&self, _role: ConnectionRole) {}

    /// A ping or read against `role` failed and will be retried
    fn on_connection_retry(&self, _role: ConnectionRole, _attempt: u32, _error: &str) {}

    /// `role` failed for good; the caller either falls back or gives up
    fn on_connection_failure(&self, _role: ConnectionRole, _error: &str) {}
}

/// Hooks that record nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopHooks;

impl StoreHooks for NoopHooks {}
