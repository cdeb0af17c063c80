//! # Layered store facade
//!
//! [`LayeredStore`] wires cache layers in front of a backing store and hands
//! out the entity stores. It holds no entity logic of its own.
//!
//! ```no_run
//! use ouroboros_store::{CachePolicy, LayeredStore, Post, SqlSettings, StoreOptions};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = SqlSettings::builder()
//!         .data_source("sqlite://store.db?mode=rwc")
//!         .build();
//!     let store = LayeredStore::open_sql(&settings, CachePolicy::default(), StoreOptions::default()).await?;
//!
//!     let channel_id = ouroboros_store::new_id();
//!     let user_id = ouroboros_store::new_id();
//!     let saved = store.posts().save(Post::new(channel_id, user_id, "hello")).await?;
//!     let again = store.posts().get_single(&saved.id).await?;
//!     assert_eq!(saved, again);
//!
//!     store.close().await;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod post;

pub use channel::ChannelStore;
pub use post::PostStore;

use crate::cache::{CacheName, CachePolicy, CacheStats, InvalidationEvent, InvalidationSink, NoopInvalidationSink};
use crate::config::SqlSettings;
use crate::error::BootstrapError;
use crate::hooks::{NoopHooks, StoreHooks};
use crate::layers::{ChannelCacheSupplier, PostCacheSupplier};
use crate::request::{ChannelRequest, PostRequest};
use crate::sql::SqlSupplier;
use crate::supplier::{Chain, Dispatcher, Supplier};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

/// Terminal supplier of both chains
#[async_trait]
pub trait BackingStore: Supplier<PostRequest> + Supplier<ChannelRequest> + 'static {
    /// Release every connection. Called once, after the caches are purged.
    async fn close(&self);
}

/// Injected collaborators and dispatch limits
#[derive(Clone)]
pub struct StoreOptions {
    pub hooks: Arc<dyn StoreHooks>,
    pub sink: Arc<dyn InvalidationSink>,
    /// Calls allowed to run at once; further calls wait for a slot
    pub max_workers: usize,
    /// Deadline of a call. [`LayeredStore::open_sql`] fills in the
    /// settings' query timeout when this is `None`.
    pub query_timeout: Option<Duration>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            hooks: Arc::new(NoopHooks),
            sink: Arc::new(NoopInvalidationSink),
            max_workers: 64,
            query_timeout: None,
        }
    }
}

impl StoreOptions {
    pub fn with_hooks(mut self, hooks: Arc<dyn StoreHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn InvalidationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for StoreOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreOptions")
            .field("max_workers", &self.max_workers)
            .field("query_timeout", &self.query_timeout)
            .finish_non_exhaustive()
    }
}

/// Cache layers in front of a backing store, exposed as entity stores
pub struct LayeredStore {
    posts: PostStore,
    channels: ChannelStore,
    post_cache: Option<Arc<PostCacheSupplier>>,
    channel_cache: Option<Arc<ChannelCacheSupplier>>,
    backing: Arc<dyn BackingStore>,
    dispatcher: Arc<Dispatcher>,
    closed: AtomicBool,
}

impl LayeredStore {
    /// Assemble the chains over `backing`.
    ///
    /// Must be called from within a tokio runtime; calls are spawned on it.
    pub fn open<B: BackingStore>(
        backing: Arc<B>,
        cache_policy: CachePolicy,
        options: StoreOptions,
    ) -> Result<Self, BootstrapError> {
        cache_policy
            .validate()
            .map_err(BootstrapError::InvalidSettings)?;
        let runtime = Handle::try_current().map_err(|e| {
            BootstrapError::InvalidSettings(format!("store must be opened inside a tokio runtime: {}", e))
        })?;

        let dispatcher = Arc::new(Dispatcher::new(
            runtime,
            options.max_workers,
            options.query_timeout,
        ));

        let mut post_chain = Chain::builder();
        let mut channel_chain = Chain::builder();
        let mut post_cache = None;
        let mut channel_cache = None;

        if cache_policy.enabled {
            let posts = Arc::new(PostCacheSupplier::new(
                &cache_policy,
                options.hooks.clone(),
                options.sink.clone(),
            ));
            let channels = Arc::new(ChannelCacheSupplier::new(
                &cache_policy,
                options.hooks.clone(),
                options.sink.clone(),
            ));
            post_chain = post_chain.push_shared(posts.clone());
            channel_chain = channel_chain.push_shared(channels.clone());
            post_cache = Some(posts);
            channel_cache = Some(channels);
        }

        let post_chain = Arc::new(
            post_chain
                .push_shared(backing.clone() as Arc<dyn Supplier<PostRequest>>)
                .build(),
        );
        let channel_chain = Arc::new(
            channel_chain
                .push_shared(backing.clone() as Arc<dyn Supplier<ChannelRequest>>)
                .build(),
        );

        info!(
            "Opened layered store: {} post supplier(s), {} channel supplier(s), {} worker(s)",
            post_chain.len(),
            channel_chain.len(),
            options.max_workers
        );

        Ok(Self {
            posts: PostStore::new(post_chain, dispatcher.clone(), post_cache.clone()),
            channels: ChannelStore::new(channel_chain, dispatcher.clone()),
            post_cache,
            channel_cache,
            backing,
            dispatcher,
            closed: AtomicBool::new(false),
        })
    }

    /// Open the SQL backing store and assemble the chains over it
    pub async fn open_sql(
        settings: &SqlSettings,
        cache_policy: CachePolicy,
        mut options: StoreOptions,
    ) -> Result<Self, BootstrapError> {
        let backing = Arc::new(SqlSupplier::open(settings, options.hooks.clone()).await?);
        if options.query_timeout.is_none() {
            options.query_timeout = Some(settings.query_timeout);
        }

        match Self::open(backing.clone(), cache_policy, options) {
            Ok(store) => Ok(store),
            Err(e) => {
                backing.close().await;
                Err(e)
            }
        }
    }

    pub fn posts(&self) -> &PostStore {
        &self.posts
    }

    pub fn channels(&self) -> &ChannelStore {
        &self.channels
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Refuse new calls, purge the caches, then close the backing store.
    ///
    /// Only the first call does anything.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        self.dispatcher.close();
        if let Some(cache) = &self.post_cache {
            cache.purge();
        }
        if let Some(cache) = &self.channel_cache {
            cache.purge();
        }
        self.backing.close().await;

        info!("Layered store closed");
    }

    /// Apply an invalidation received from a peer process
    pub fn apply_invalidation(&self, event: &InvalidationEvent) {
        if let Some(cache) = &self.post_cache {
            cache.apply(event);
        }
        if let Some(cache) = &self.channel_cache {
            cache.apply(event);
        }
    }

    /// Counters of every cache layer; empty when caching is disabled
    pub fn cache_stats(&self) -> Vec<(CacheName, CacheStats)> {
        let mut stats = self
            .post_cache
            .as_ref()
            .map(|cache| cache.stats())
            .unwrap_or_default();
        if let Some(cache) = &self.channel_cache {
            stats.push((CacheName::Channels, cache.stats()));
        }
        stats
    }
}

impl fmt::Debug for LayeredStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LayeredStore")
            .field("caching", &self.post_cache.is_some())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
