//! Cache-capable suppliers placed ahead of the backing store
//!
//! A layer answers from memory when it can and forwards everything else.
//! Writes are always forwarded first; only a successful write invalidates,
//! and each invalidation is also published to the configured
//! [`InvalidationSink`](crate::cache::InvalidationSink).

pub mod channel_cache;
pub mod post_cache;

pub use channel_cache::ChannelCacheSupplier;
pub use post_cache::{ListingKey, PostCacheSupplier};
