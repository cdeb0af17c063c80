use crate::cache::{BoundedCache, CacheName, CachePolicy, CacheStats, InvalidationEvent, InvalidationScope, InvalidationSink};
use crate::error::Result;
use crate::hooks::StoreHooks;
use crate::model::Channel;
use crate::request::{ChannelRequest, ChannelResponse};
use crate::supplier::{Context, Hint, Next, Supplier};
use async_trait::async_trait;
use std::sync::Arc;

/// Caches channels by id
pub struct ChannelCacheSupplier {
    channels: BoundedCache<String, Channel>,
    hooks: Arc<dyn StoreHooks>,
    sink: Arc<dyn InvalidationSink>,
}

impl ChannelCacheSupplier {
    pub fn new(policy: &CachePolicy, hooks: Arc<dyn StoreHooks>, sink: Arc<dyn InvalidationSink>) -> Self {
        Self {
            channels: BoundedCache::from_spec(CacheName::Channels.as_str(), &policy.channels, policy.ttl_jitter),
            hooks,
            sink,
        }
    }

    fn forget(&self, id: &str, context: &str) {
        self.channels.remove(&id.to_string());
        self.sink.publish(
            &InvalidationEvent::key(CacheName::Channels, id).with_context(context),
        );
    }

    pub fn purge(&self) {
        self.channels.purge();
    }

    pub fn apply(&self, event: &InvalidationEvent) {
        if event.cache != CacheName::Channels {
            return;
        }
        match &event.scope {
            InvalidationScope::All => {
                self.channels.bump_generation();
            }
            InvalidationScope::Key(id) | InvalidationScope::Channel(id) => {
                self.channels.remove(id);
            }
            InvalidationScope::Thread(_) => {}
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.channels.stats()
    }
}

#[async_trait]
impl Supplier<ChannelRequest> for ChannelCacheSupplier {
    async fn handle(
        &self,
        ctx: &Context,
        req: &ChannelRequest,
        hints: &[Hint],
        next: Next<'_, ChannelRequest>,
    ) -> Result<ChannelResponse> {
        match req {
            ChannelRequest::Get { id } => {
                if !Hint::BypassCache.is_set(hints) {
                    if let Some(channel) = self.channels.get(id) {
                        self.hooks.on_cache_hit(CacheName::Channels);
                        return Ok(ChannelResponse::Channel(channel));
                    }
                    self.hooks.on_cache_miss(CacheName::Channels);
                }
                let epoch = self.channels.epoch();
                let response = next.run(ctx, req, hints).await?;
                if let ChannelResponse::Channel(channel) = &response {
                    self.channels.set_if_epoch(id.clone(), channel.clone(), epoch);
                }
                Ok(response)
            }
            ChannelRequest::Save(channel) => {
                let response = next.run(ctx, req, hints).await?;
                self.forget(&channel.id, "save");
                Ok(response)
            }
            ChannelRequest::Delete { id, .. } => {
                let response = next.run(ctx, req, hints).await?;
                self.forget(id, "delete");
                Ok(response)
            }
            ChannelRequest::AddMember(_) | ChannelRequest::RemoveMember { .. } => {
                next.run(ctx, req, hints).await
            }
        }
    }
}
