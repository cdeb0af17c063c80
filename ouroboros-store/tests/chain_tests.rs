//! Integration tests for the layered store over an in-memory backing store
//!
//! The backing store counts every request that reaches it, which lets these
//! tests observe exactly when cache layers answer and when they forward.

use async_trait::async_trait;
use ouroboros_store::supplier::{Next, Request, Supplier};
use ouroboros_store::{
    new_id, BackingStore, CacheName, CachePolicy, Channel, ChannelRequest, ChannelResponse, ChannelType,
    Context, Hint, InvalidationEvent, InvalidationScope, InvalidationSink, LayeredStore, Post, PostList,
    PostRequest, PostResponse, StoreError, StoreHooks, StoreOptions, StoreResult,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MemoryBacking {
    posts: Mutex<HashMap<String, Post>>,
    channels: Mutex<HashMap<String, Channel>>,
    post_calls: AtomicUsize,
    channel_calls: AtomicUsize,
    closes: AtomicUsize,
    delay: Option<Duration>,
    read_delay: Option<Duration>,
}

impl MemoryBacking {
    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Default::default()
        }
    }

    /// Single-post reads snapshot the row, then stall before answering
    fn slow_reads(read_delay: Duration) -> Self {
        Self {
            read_delay: Some(read_delay),
            ..Default::default()
        }
    }

    fn post_calls(&self) -> usize {
        self.post_calls.load(Ordering::SeqCst)
    }

    fn channel_posts(&self, channel_id: &str) -> Vec<Post> {
        self.posts
            .lock()
            .unwrap()
            .values()
            .filter(|p| p.channel_id == channel_id && p.delete_at == 0)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Supplier<PostRequest> for MemoryBacking {
    async fn handle(
        &self,
        _ctx: &Context,
        req: &PostRequest,
        _hints: &[Hint],
        _next: Next<'_, PostRequest>,
    ) -> StoreResult<PostResponse> {
        self.post_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match req {
            PostRequest::Save(post) | PostRequest::Overwrite(post) | PostRequest::Update { new: post, .. } => {
                self.posts.lock().unwrap().insert(post.id.clone(), post.clone());
                Ok(PostResponse::Post(post.clone()))
            }
            PostRequest::GetSingle { id } => {
                let snapshot = self
                    .posts
                    .lock()
                    .unwrap()
                    .get(id)
                    .filter(|p| p.delete_at == 0)
                    .cloned();
                if let Some(read_delay) = self.read_delay {
                    tokio::time::sleep(read_delay).await;
                }
                snapshot.map(PostResponse::Post).ok_or_else(|| StoreError::NotFound {
                    entity: "post",
                    id: id.clone(),
                })
            }
            PostRequest::Delete { id, time, .. } => {
                let mut posts = self.posts.lock().unwrap();
                let post = posts.get_mut(id).ok_or_else(|| StoreError::NotFound {
                    entity: "post",
                    id: id.clone(),
                })?;
                post.delete_at = *time;
                Ok(PostResponse::Deleted {
                    channel_id: post.channel_id.clone(),
                })
            }
            PostRequest::PermanentDeleteByChannel { channel_id } => {
                let mut posts = self.posts.lock().unwrap();
                let before = posts.len();
                posts.retain(|_, p| p.channel_id != *channel_id);
                Ok(PostResponse::Purged {
                    deleted: (before - posts.len()) as u64,
                    channel_ids: vec![channel_id.clone()],
                })
            }
            PostRequest::GetPosts { channel_id, .. } => {
                let mut list: PostList = self.channel_posts(channel_id).into_iter().collect();
                list.sort_by_create_at();
                Ok(PostResponse::List(list))
            }
            PostRequest::GetPostsSince { channel_id, time } => {
                let mut list: PostList = self
                    .channel_posts(channel_id)
                    .into_iter()
                    .filter(|p| p.update_at > *time)
                    .collect();
                list.sort_by_create_at();
                Ok(PostResponse::List(list))
            }
            PostRequest::LastPostTime { channel_id } => Ok(PostResponse::Time(
                self.channel_posts(channel_id)
                    .iter()
                    .map(|p| p.update_at)
                    .max()
                    .unwrap_or(0),
            )),
            other => Err(StoreError::Unhandled {
                operation: other.operation(),
            }),
        }
    }
}

#[async_trait]
impl Supplier<ChannelRequest> for MemoryBacking {
    async fn handle(
        &self,
        _ctx: &Context,
        req: &ChannelRequest,
        _hints: &[Hint],
        _next: Next<'_, ChannelRequest>,
    ) -> StoreResult<ChannelResponse> {
        self.channel_calls.fetch_add(1, Ordering::SeqCst);

        match req {
            ChannelRequest::Save(channel) => {
                self.channels
                    .lock()
                    .unwrap()
                    .insert(channel.id.clone(), channel.clone());
                Ok(ChannelResponse::Channel(channel.clone()))
            }
            ChannelRequest::Get { id } => self
                .channels
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .map(ChannelResponse::Channel)
                .ok_or_else(|| StoreError::NotFound {
                    entity: "channel",
                    id: id.clone(),
                }),
            ChannelRequest::Delete { id, time } => {
                if let Some(channel) = self.channels.lock().unwrap().get_mut(id) {
                    channel.delete_at = *time;
                }
                Ok(ChannelResponse::Done)
            }
            other => Err(StoreError::Unhandled {
                operation: other.operation(),
            }),
        }
    }
}

#[async_trait]
impl BackingStore for MemoryBacking {
    async fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<InvalidationEvent>>,
}

impl RecordingSink {
    fn take(&self) -> Vec<InvalidationEvent> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

impl InvalidationSink for RecordingSink {
    fn publish(&self, event: &InvalidationEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Delivers every published event straight to a peer store
struct PeerSink(Arc<LayeredStore>);

impl InvalidationSink for PeerSink {
    fn publish(&self, event: &InvalidationEvent) {
        self.0.apply_invalidation(event);
    }
}

#[derive(Default)]
struct CountingHooks {
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl StoreHooks for CountingHooks {
    fn on_cache_hit(&self, _cache: CacheName) {
        self.hits.fetch_add(1, Ordering::SeqCst);
    }

    fn on_cache_miss(&self, _cache: CacheName) {
        self.misses.fetch_add(1, Ordering::SeqCst);
    }
}

fn open(backing: &Arc<MemoryBacking>) -> LayeredStore {
    LayeredStore::open(backing.clone(), CachePolicy::default(), StoreOptions::default())
        .expect("Failed to open store")
}

async fn saved_post(store: &LayeredStore, channel_id: &str, message: &str) -> Post {
    store
        .posts()
        .save(Post::new(channel_id, new_id(), message))
        .await
        .expect("Failed to save post")
}

#[tokio::test]
async fn test_cache_hit_never_reaches_backing() {
    let backing = Arc::new(MemoryBacking::default());
    let store = open(&backing);
    let post = saved_post(&store, &new_id(), "hello").await;
    assert_eq!(backing.post_calls(), 1);

    // Miss forwards exactly once
    let first = store.posts().get_single(&post.id).await.unwrap();
    assert_eq!(backing.post_calls(), 2);

    // Hit is answered by the cache layer
    let second = store.posts().get_single(&post.id).await.unwrap();
    assert_eq!(backing.post_calls(), 2);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_bypass_cache_hint_reaches_backing() {
    let backing = Arc::new(MemoryBacking::default());
    let store = open(&backing);
    let post = saved_post(&store, &new_id(), "hello").await;

    store.posts().get_single(&post.id).await.unwrap();
    store
        .posts()
        .get_single_with(&post.id, vec![Hint::BypassCache])
        .await
        .unwrap();

    assert_eq!(backing.post_calls(), 3);
}

#[tokio::test]
async fn test_update_invalidates_cached_post() {
    let backing = Arc::new(MemoryBacking::default());
    let store = open(&backing);
    let original = saved_post(&store, &new_id(), "before").await;

    let cached = store.posts().get_single(&original.id).await.unwrap();
    assert_eq!(cached.message, "before");

    let edited = Post {
        message: "after".to_string(),
        ..original.clone()
    };
    let updated = store.posts().update(edited, &original).await.unwrap();
    assert!(updated.edit_at > 0);

    let fresh = store.posts().get_single(&original.id).await.unwrap();
    assert_eq!(fresh.message, "after");
}

#[tokio::test]
async fn test_save_invalidates_channel_listing() {
    let backing = Arc::new(MemoryBacking::default());
    let store = open(&backing);
    let channel_id = new_id();
    saved_post(&store, &channel_id, "one").await;

    let page = store.posts().get_posts(&channel_id, 0, 60, true).await.unwrap();
    assert_eq!(page.len(), 1);
    let calls = backing.post_calls();

    // Cached page
    store.posts().get_posts(&channel_id, 0, 60, true).await.unwrap();
    assert_eq!(backing.post_calls(), calls);

    saved_post(&store, &channel_id, "two").await;
    let page = store.posts().get_posts(&channel_id, 0, 60, true).await.unwrap();
    assert_eq!(page.len(), 2);
}

#[tokio::test]
async fn test_posts_since_short_circuits_on_unchanged_channel() {
    let backing = Arc::new(MemoryBacking::default());
    let store = open(&backing);
    let channel_id = new_id();
    let post = saved_post(&store, &channel_id, "hello").await;

    let since = store.posts().get_posts_since(&channel_id, 0, true).await.unwrap();
    assert_eq!(since.len(), 1);
    let calls = backing.post_calls();

    let unchanged = store
        .posts()
        .get_posts_since(&channel_id, post.update_at, true)
        .await
        .unwrap();
    assert!(unchanged.is_empty());
    assert_eq!(backing.post_calls(), calls);

    // Without the cache the backing store is asked
    store
        .posts()
        .get_posts_since(&channel_id, post.update_at, false)
        .await
        .unwrap();
    assert_eq!(backing.post_calls(), calls + 1);
}

#[tokio::test]
async fn test_etag_served_from_last_post_time_cache() {
    let backing = Arc::new(MemoryBacking::default());
    let store = open(&backing);
    let channel_id = new_id();
    let post = saved_post(&store, &channel_id, "hello").await;

    let etag = store.posts().get_etag(&channel_id, true).await.unwrap();
    assert!(etag.ends_with(&format!(".{}", post.update_at)));
    let calls = backing.post_calls();

    let again = store.posts().get_etag(&channel_id, true).await.unwrap();
    assert_eq!(etag, again);
    assert_eq!(backing.post_calls(), calls);

    store.posts().invalidate_last_post_time_cache(&channel_id);
    store.posts().get_etag(&channel_id, true).await.unwrap();
    assert_eq!(backing.post_calls(), calls + 1);
}

#[tokio::test]
async fn test_delete_invalidates_and_reports_not_found() {
    let backing = Arc::new(MemoryBacking::default());
    let store = open(&backing);
    let post = saved_post(&store, &new_id(), "doomed").await;
    store.posts().get_single(&post.id).await.unwrap();

    store.posts().delete(&post.id, 1_000, new_id()).await.unwrap();

    let err = store.posts().get_single(&post.id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { entity: "post", .. }));
}

#[tokio::test]
async fn test_in_flight_read_does_not_refill_after_update() {
    let backing = Arc::new(MemoryBacking::slow_reads(Duration::from_millis(100)));
    let store = Arc::new(open(&backing));
    let original = saved_post(&store, &new_id(), "before").await;

    // Read the old row, then stall while the update lands
    let reader = {
        let store = store.clone();
        let id = original.id.clone();
        tokio::spawn(async move { store.posts().get_single(&id).await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let edited = Post {
        message: "after".to_string(),
        ..original.clone()
    };
    store.posts().update(edited, &original).await.unwrap();

    let stale = reader.await.unwrap().unwrap();
    assert_eq!(stale.message, "before");

    let fresh = store.posts().get_single(&original.id).await.unwrap();
    assert_eq!(fresh.message, "after");
}

#[tokio::test]
async fn test_peer_drops_replies_of_deleted_root() {
    let backing = Arc::new(MemoryBacking::default());
    let peer = Arc::new(open(&backing));
    let store = LayeredStore::open(
        backing.clone(),
        CachePolicy::default(),
        StoreOptions::default().with_sink(Arc::new(PeerSink(peer.clone()))),
    )
    .unwrap();

    let user_id = new_id();
    let root = saved_post(&store, &new_id(), "root").await;
    let reply = store
        .posts()
        .save(Post::reply_to(&root, &user_id, "reply"))
        .await
        .unwrap();

    peer.posts().get_single(&reply.id).await.unwrap();
    let calls = backing.post_calls();
    peer.posts().get_single(&reply.id).await.unwrap();
    assert_eq!(backing.post_calls(), calls);

    store.posts().delete(&root.id, 1_000, &user_id).await.unwrap();
    let calls = backing.post_calls();

    // The peer never cached the root yet must miss on the reply
    peer.posts().get_single(&reply.id).await.unwrap();
    assert_eq!(backing.post_calls(), calls + 1);
}

#[tokio::test]
async fn test_peer_drops_posts_of_purged_channel() {
    let backing = Arc::new(MemoryBacking::default());
    let peer = Arc::new(open(&backing));
    let sink = Arc::new(RecordingSink::default());
    let store = LayeredStore::open(
        backing.clone(),
        CachePolicy::default(),
        StoreOptions::default().with_sink(Arc::new(PeerSink(peer.clone()))),
    )
    .unwrap();
    let recording = LayeredStore::open(
        backing.clone(),
        CachePolicy::default(),
        StoreOptions::default().with_sink(sink.clone()),
    )
    .unwrap();

    let channel_id = new_id();
    let post = saved_post(&store, &channel_id, "hello").await;
    peer.posts().get_single(&post.id).await.unwrap();

    store.posts().permanent_delete_by_channel(&channel_id).await.unwrap();

    let err = peer.posts().get_single(&post.id).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));

    // The purge is announced for the whole channel
    recording.posts().permanent_delete_by_channel(&channel_id).await.unwrap();
    assert!(sink.take().iter().any(|e| e.cache == CacheName::Posts
        && e.scope == InvalidationScope::Channel(channel_id.clone())));
}

#[tokio::test]
async fn test_backing_errors_propagate_untouched() {
    let backing = Arc::new(MemoryBacking::default());
    let store = open(&backing);

    let err = store.posts().get_oldest().await.unwrap_err();
    assert!(matches!(err, StoreError::Unhandled { operation: "post.get_oldest" }));

    let missing = new_id();
    let err = store.posts().get_single(&missing).await.unwrap_err();
    assert!(matches!(err, StoreError::NotFound { .. }));

    // Errors are not cached
    store.posts().get_single(&missing).await.unwrap_err();
    assert_eq!(backing.post_calls(), 3);
}

#[tokio::test]
async fn test_validation_short_circuits_before_dispatch() {
    let backing = Arc::new(MemoryBacking::default());
    let store = open(&backing);

    let too_long = Post::new(new_id(), new_id(), "x".repeat(16_384));
    let err = store.posts().save(too_long).await.unwrap_err();
    assert!(err.is_validation());

    let err = store.posts().get_single("short").await.unwrap_err();
    assert!(err.is_validation());

    let err = store.posts().get_posts(new_id(), 0, 0, true).await.unwrap_err();
    assert!(err.is_validation());

    assert_eq!(backing.post_calls(), 0);
}

#[tokio::test]
async fn test_invalidation_events_published_after_write() {
    let backing = Arc::new(MemoryBacking::default());
    let sink = Arc::new(RecordingSink::default());
    let store = LayeredStore::open(
        backing.clone(),
        CachePolicy::default(),
        StoreOptions::default().with_sink(sink.clone()),
    )
    .unwrap();

    let post = saved_post(&store, &new_id(), "hello").await;
    let events = sink.take();

    assert!(events
        .iter()
        .any(|e| e.cache == CacheName::Posts && e.scope == InvalidationScope::Key(post.id.clone())));
    assert!(events.iter().any(|e| e.cache == CacheName::PostListings
        && e.scope == InvalidationScope::Key(post.channel_id.clone())));
    assert!(events.iter().any(|e| e.cache == CacheName::LastPostTime
        && e.scope == InvalidationScope::Key(post.channel_id.clone())));

    // A failed write publishes nothing
    let err = store.posts().get_oldest().await;
    assert!(err.is_err());
    assert!(sink.take().is_empty());

    store.posts().clear_caches();
    let events = sink.take();
    assert_eq!(events.len(), 3);
    assert!(events.iter().all(|e| e.scope == InvalidationScope::All));
}

#[tokio::test]
async fn test_apply_invalidation_from_peer() {
    let backing = Arc::new(MemoryBacking::default());
    let store = open(&backing);
    let post = saved_post(&store, &new_id(), "hello").await;

    store.posts().get_single(&post.id).await.unwrap();
    let calls = backing.post_calls();

    let event = InvalidationEvent::key(CacheName::Posts, post.id.clone());
    let wire = event.to_json().unwrap();
    store.apply_invalidation(&InvalidationEvent::from_json(&wire).unwrap());

    store.posts().get_single(&post.id).await.unwrap();
    assert_eq!(backing.post_calls(), calls + 1);

    // Whole-cache invalidation
    store.apply_invalidation(&InvalidationEvent::all(CacheName::Posts));
    store.posts().get_single(&post.id).await.unwrap();
    assert_eq!(backing.post_calls(), calls + 2);
}

#[tokio::test]
async fn test_disabled_cache_always_forwards() {
    let backing = Arc::new(MemoryBacking::default());
    let store = LayeredStore::open(backing.clone(), CachePolicy::disabled(), StoreOptions::default()).unwrap();
    let post = saved_post(&store, &new_id(), "hello").await;

    for _ in 0..3 {
        store.posts().get_single(&post.id).await.unwrap();
    }

    assert_eq!(backing.post_calls(), 4);
    assert!(store.cache_stats().is_empty());
}

#[tokio::test]
async fn test_hooks_observe_cache_traffic() {
    let backing = Arc::new(MemoryBacking::default());
    let hooks = Arc::new(CountingHooks::default());
    let store = LayeredStore::open(
        backing.clone(),
        CachePolicy::default(),
        StoreOptions::default().with_hooks(hooks.clone()),
    )
    .unwrap();
    let post = saved_post(&store, &new_id(), "hello").await;

    store.posts().get_single(&post.id).await.unwrap();
    store.posts().get_single(&post.id).await.unwrap();
    store.posts().get_single(&post.id).await.unwrap();

    assert_eq!(hooks.misses.load(Ordering::SeqCst), 1);
    assert_eq!(hooks.hits.load(Ordering::SeqCst), 2);

    let stats: HashMap<CacheName, _> = store.cache_stats().into_iter().collect();
    assert_eq!(stats[&CacheName::Posts].hits, 2);
    assert_eq!(stats[&CacheName::Posts].misses, 1);
}

#[tokio::test]
async fn test_deadline_elapses_as_timeout() {
    let backing = Arc::new(MemoryBacking::slow(Duration::from_secs(5)));
    let store = open(&backing);

    let err = store
        .posts()
        .with_timeout(Duration::from_millis(20))
        .get_single(new_id())
        .await
        .unwrap_err();

    assert!(matches!(err, StoreError::Timeout { .. }));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let backing = Arc::new(MemoryBacking::default());
    let store = open(&backing);
    let post = saved_post(&store, &new_id(), "hello").await;
    store.posts().get_single(&post.id).await.unwrap();

    store.close().await;
    store.close().await;

    assert!(store.is_closed());
    assert_eq!(backing.closes.load(Ordering::SeqCst), 1);

    let err = store.posts().get_single(&post.id).await.unwrap_err();
    assert!(matches!(err, StoreError::Closed));
}

#[tokio::test]
async fn test_channel_cache() {
    let backing = Arc::new(MemoryBacking::default());
    let store = open(&backing);

    let channel = store
        .channels()
        .save(Channel::new(new_id(), "town-square", ChannelType::Open))
        .await
        .unwrap();

    store.channels().get(&channel.id, true).await.unwrap();
    store.channels().get(&channel.id, true).await.unwrap();
    assert_eq!(backing.channel_calls.load(Ordering::SeqCst), 2);

    store.channels().delete(&channel.id, 5_000).await.unwrap();
    let deleted = store.channels().get(&channel.id, true).await.unwrap();
    assert_eq!(deleted.delete_at, 5_000);
    assert_eq!(backing.channel_calls.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_concurrent_calls_resolve_independently() {
    let backing = Arc::new(MemoryBacking::default());
    let store = LayeredStore::open(
        backing.clone(),
        CachePolicy::default(),
        StoreOptions::default().with_max_workers(4),
    )
    .unwrap();
    let channel_id = new_id();

    let handles: Vec<_> = (0..32)
        .map(|i| store.posts().save(Post::new(channel_id.clone(), new_id(), format!("post {}", i))))
        .collect();

    let saved = futures::future::join_all(handles).await;
    assert!(saved.iter().all(|r| r.is_ok()));

    let page = store.posts().get_posts(&channel_id, 0, 100, false).await.unwrap();
    assert_eq!(page.len(), 32);
}
