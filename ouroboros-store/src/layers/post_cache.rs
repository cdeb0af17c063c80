//! Cache layer in front of the post backing store

use crate::cache::{BoundedCache, CacheName, CachePolicy, CacheStats, InvalidationEvent, InvalidationScope, InvalidationSink};
use crate::error::Result;
use crate::hooks::StoreHooks;
use crate::model::{Post, PostList};
use crate::request::{PostRequest, PostResponse};
use crate::supplier::{Context, Hint, Next, Supplier};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Key of a cached channel listing page
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListingKey {
    pub channel_id: String,
    pub offset: u32,
    pub limit: u32,
}

/// Answers single-post reads, channel listings and last-post times from
/// memory; invalidates on every successful write.
pub struct PostCacheSupplier {
    posts: BoundedCache<String, Post>,
    listings: BoundedCache<ListingKey, PostList>,
    last_post_time: BoundedCache<String, i64>,
    hooks: Arc<dyn StoreHooks>,
    sink: Arc<dyn InvalidationSink>,
}

impl PostCacheSupplier {
    pub fn new(policy: &CachePolicy, hooks: Arc<dyn StoreHooks>, sink: Arc<dyn InvalidationSink>) -> Self {
        Self {
            posts: BoundedCache::from_spec(CacheName::Posts.as_str(), &policy.posts, policy.ttl_jitter),
            listings: BoundedCache::from_spec(
                CacheName::PostListings.as_str(),
                &policy.post_listings,
                policy.ttl_jitter,
            ),
            last_post_time: BoundedCache::from_spec(
                CacheName::LastPostTime.as_str(),
                &policy.last_post_time,
                policy.ttl_jitter,
            ),
            hooks,
            sink,
        }
    }

    fn lookup<K, V>(&self, cache: &BoundedCache<K, V>, name: CacheName, key: &K) -> Option<V>
    where
        K: std::hash::Hash + Eq + Clone,
        V: Clone,
    {
        let found = cache.get(key);
        if found.is_some() {
            self.hooks.on_cache_hit(name);
        } else {
            self.hooks.on_cache_miss(name);
        }
        found
    }

    fn publish(&self, cache: CacheName, scope: InvalidationScope, context: &str) {
        self.sink
            .publish(&InvalidationEvent::new(cache, scope).with_context(context));
    }

    fn forget_post(&self, id: &str, context: &str) {
        self.posts.remove(&id.to_string());
        self.publish(CacheName::Posts, InvalidationScope::Key(id.to_string()), context);
    }

    fn forget_channel(&self, channel_id: &str, context: &str) {
        self.drop_listings(channel_id);
        self.last_post_time.remove(&channel_id.to_string());
        self.publish(
            CacheName::PostListings,
            InvalidationScope::Key(channel_id.to_string()),
            context,
        );
        self.publish(
            CacheName::LastPostTime,
            InvalidationScope::Key(channel_id.to_string()),
            context,
        );
    }

    fn drop_listings(&self, channel_id: &str) -> usize {
        self.listings
            .remove_where(|key, _| key.channel_id == channel_id)
            .len()
    }

    fn drop_thread(&self, root_id: &str) -> usize {
        self.posts
            .remove_where(|id, post| id == root_id || post.root_id == root_id)
            .len()
    }

    fn drop_channel_posts(&self, channel_id: &str) -> usize {
        self.posts
            .remove_where(|_, post| post.channel_id == channel_id)
            .len()
    }

    /// Invalidate what a successful write of `post` made stale
    fn after_write(&self, post: &Post, context: &str) {
        self.forget_post(&post.id, context);
        if !post.root_id.is_empty() {
            self.forget_post(&post.root_id, context);
        }
        self.forget_channel(&post.channel_id, context);
    }

    /// Drop the last-post time and listings of a channel
    pub fn invalidate_last_post_time(&self, channel_id: &str) {
        self.forget_channel(channel_id, "invalidate_last_post_time");
    }

    /// Empty every cache and tell peers to do the same
    pub fn clear(&self) {
        self.posts.purge();
        self.listings.purge();
        self.last_post_time.purge();
        for cache in [CacheName::Posts, CacheName::PostListings, CacheName::LastPostTime] {
            self.publish(cache, InvalidationScope::All, "clear_caches");
        }
    }

    /// Drop everything without publishing
    pub fn purge(&self) {
        self.posts.purge();
        self.listings.purge();
        self.last_post_time.purge();
    }

    /// Apply an event received from a peer; nothing is re-published
    pub fn apply(&self, event: &InvalidationEvent) {
        match (&event.cache, &event.scope) {
            (CacheName::Posts, InvalidationScope::All) => {
                self.posts.bump_generation();
            }
            (CacheName::Posts, InvalidationScope::Key(id)) => {
                self.posts.remove(id);
            }
            (CacheName::Posts, InvalidationScope::Thread(root_id)) => {
                self.drop_thread(root_id);
            }
            (CacheName::Posts, InvalidationScope::Channel(channel_id)) => {
                self.drop_channel_posts(channel_id);
            }
            (CacheName::PostListings, InvalidationScope::All) => {
                self.listings.bump_generation();
            }
            (CacheName::PostListings, InvalidationScope::Key(channel_id))
            | (CacheName::PostListings, InvalidationScope::Channel(channel_id)) => {
                self.drop_listings(channel_id);
            }
            (CacheName::LastPostTime, InvalidationScope::All) => {
                self.last_post_time.bump_generation();
            }
            (CacheName::LastPostTime, InvalidationScope::Key(channel_id))
            | (CacheName::LastPostTime, InvalidationScope::Channel(channel_id)) => {
                self.last_post_time.remove(channel_id);
            }
            (_, InvalidationScope::Thread(_)) | (CacheName::Channels, _) => {}
        }
    }

    pub fn stats(&self) -> Vec<(CacheName, CacheStats)> {
        vec![
            (CacheName::Posts, self.posts.stats()),
            (CacheName::PostListings, self.listings.stats()),
            (CacheName::LastPostTime, self.last_post_time.stats()),
        ]
    }

    fn purge_channels(&self, channel_ids: &[String], context: &str) {
        let doomed: HashSet<&str> = channel_ids.iter().map(String::as_str).collect();
        let removed = self
            .posts
            .remove_where(|_, post| doomed.contains(post.channel_id.as_str()));
        debug!("Dropped {} cached posts after {}", removed.len(), context);

        for channel_id in channel_ids {
            self.publish(
                CacheName::Posts,
                InvalidationScope::Channel(channel_id.clone()),
                context,
            );
            self.forget_channel(channel_id, context);
        }
    }
}

#[async_trait]
impl Supplier<PostRequest> for PostCacheSupplier {
    async fn handle(
        &self,
        ctx: &Context,
        req: &PostRequest,
        hints: &[Hint],
        next: Next<'_, PostRequest>,
    ) -> Result<PostResponse> {
        let use_cache = !Hint::BypassCache.is_set(hints);

        match req {
            PostRequest::GetSingle { id } => {
                if use_cache {
                    if let Some(post) = self.lookup(&self.posts, CacheName::Posts, id) {
                        return Ok(PostResponse::Post(post));
                    }
                }
                let epoch = self.posts.epoch();
                let response = next.run(ctx, req, hints).await?;
                if let PostResponse::Post(post) = &response {
                    self.posts.set_if_epoch(id.clone(), post.clone(), epoch);
                }
                Ok(response)
            }

            PostRequest::GetPosts { channel_id, offset, limit } => {
                let key = ListingKey {
                    channel_id: channel_id.clone(),
                    offset: *offset,
                    limit: *limit,
                };
                if use_cache {
                    if let Some(list) = self.lookup(&self.listings, CacheName::PostListings, &key) {
                        return Ok(PostResponse::List(list));
                    }
                }
                let epoch = self.listings.epoch();
                let response = next.run(ctx, req, hints).await?;
                if let PostResponse::List(list) = &response {
                    self.listings.set_if_epoch(key, list.clone(), epoch);
                }
                Ok(response)
            }

            PostRequest::GetPostsSince { channel_id, time } => {
                if use_cache {
                    if let Some(last) = self.lookup(&self.last_post_time, CacheName::LastPostTime, channel_id) {
                        if last <= *time {
                            return Ok(PostResponse::List(PostList::new()));
                        }
                    }
                }
                let epoch = self.last_post_time.epoch();
                let response = next.run(ctx, req, hints).await?;
                if let PostResponse::List(list) = &response {
                    let latest = list.last_update_at().max(*time);
                    self.last_post_time.set_if_epoch(channel_id.clone(), latest, epoch);
                }
                Ok(response)
            }

            PostRequest::LastPostTime { channel_id } => {
                if use_cache {
                    if let Some(last) = self.lookup(&self.last_post_time, CacheName::LastPostTime, channel_id) {
                        return Ok(PostResponse::Time(last));
                    }
                }
                let epoch = self.last_post_time.epoch();
                let response = next.run(ctx, req, hints).await?;
                if let PostResponse::Time(last) = &response {
                    self.last_post_time.set_if_epoch(channel_id.clone(), *last, epoch);
                }
                Ok(response)
            }

            PostRequest::Save(post) | PostRequest::Overwrite(post) | PostRequest::Update { new: post, .. } => {
                let response = next.run(ctx, req, hints).await?;
                self.after_write(post, "write");
                Ok(response)
            }

            PostRequest::Delete { id, .. } => {
                let response = next.run(ctx, req, hints).await?;
                if let PostResponse::Deleted { channel_id } = &response {
                    self.drop_thread(id);
                    self.publish(CacheName::Posts, InvalidationScope::Thread(id.clone()), "delete");
                    self.forget_channel(channel_id, "delete");
                }
                Ok(response)
            }

            PostRequest::PermanentDeleteByUser { .. }
            | PostRequest::PermanentDeleteByChannel { .. }
            | PostRequest::PermanentDeleteBatch { .. } => {
                let response = next.run(ctx, req, hints).await?;
                if let PostResponse::Purged { channel_ids, .. } = &response {
                    self.purge_channels(channel_ids, "permanent_delete");
                }
                Ok(response)
            }

            _ => next.run(ctx, req, hints).await,
        }
    }
}
