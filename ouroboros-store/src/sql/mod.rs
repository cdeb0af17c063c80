//! # Relational backing store
//!
//! [`SqlSupplier`] is the terminal supplier of both chains. Writes go to the
//! primary; listings and aggregates rotate over the read replicas and search
//! goes to the search replicas. A read that fails on a replica because of
//! connectivity is retried once on the primary.

mod args;
pub mod channel;
pub mod pool;
pub mod post;
pub mod schema;

pub use pool::ConnectionPool;

use crate::config::SqlSettings;
use crate::connection::ConnectionRole;
use crate::error::{BootstrapError, Result};
use crate::hooks::StoreHooks;
use crate::model::post::POST_MESSAGE_MAX_RUNES;
use crate::model::now_millis;
use crate::request::{ChannelRequest, ChannelResponse, PostRequest, PostResponse};
use crate::store::BackingStore;
use crate::supplier::{Context, Hint, Next, Request, Supplier};
use async_trait::async_trait;
use sqlx::AnyPool;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Which replica set a read rotates over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadTarget {
    Replica,
    Search,
}

pub struct SqlSupplier {
    pool: ConnectionPool,
    hooks: Arc<dyn StoreHooks>,
    closed: AtomicBool,
}

impl SqlSupplier {
    /// Open the pools and make sure the schema exists
    pub async fn open(
        settings: &SqlSettings,
        hooks: Arc<dyn StoreHooks>,
    ) -> std::result::Result<Self, BootstrapError> {
        let pool = ConnectionPool::open(settings, hooks.clone()).await?;

        if let Err(e) = schema::ensure_schema(pool.primary().conn).await {
            error!("Failed to create tables: {}", e);
            pool.close().await;
            return Err(BootstrapError::Schema(e));
        }

        Ok(Self {
            pool,
            hooks,
            closed: AtomicBool::new(false),
        })
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Close every pool; later calls are no-ops
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pool.close().await;
    }

    fn writer(&self) -> &AnyPool {
        self.pool.primary().conn
    }

    async fn read<T, F, Fut>(
        &self,
        operation: &'static str,
        hints: &[Hint],
        target: ReadTarget,
        query: F,
    ) -> Result<T>
    where
        F: Fn(AnyPool) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let route = if Hint::ForceMaster.is_set(hints) {
            self.pool.primary()
        } else {
            match target {
                ReadTarget::Replica => self.pool.next_replica(),
                ReadTarget::Search => self.pool.next_search_replica(),
            }
        };
        let role = route.role;
        debug!("{} routed to {}", operation, role);

        match query(route.conn.clone()).await {
            Err(e) if role != ConnectionRole::Primary && e.is_connectivity() => {
                warn!("{} failed on {}, retrying on master: {}", operation, role, e);
                self.hooks.on_connection_retry(role, 1, &e.to_string());
                query(self.writer().clone()).await
            }
            result => result,
        }
    }
}

#[async_trait]
impl Supplier<PostRequest> for SqlSupplier {
    async fn handle(
        &self,
        _ctx: &Context,
        req: &PostRequest,
        hints: &[Hint],
        _next: Next<'_, PostRequest>,
    ) -> Result<PostResponse> {
        use ReadTarget::{Replica, Search};

        let op = req.operation();
        let db = self.writer();

        let response = match req {
            PostRequest::Save(p) => PostResponse::Post(post::save(db, p).await?),
            PostRequest::Update { new, old } => {
                let archived = old.archived_copy(new.update_at);
                PostResponse::Post(post::update(db, new, &archived).await?)
            }
            PostRequest::Overwrite(p) => PostResponse::Post(post::overwrite(db, p).await?),
            PostRequest::Delete { id, time, deleted_by } => PostResponse::Deleted {
                channel_id: post::delete(db, id, *time, deleted_by).await?,
            },
            PostRequest::PermanentDeleteByUser { user_id } => {
                let (deleted, channel_ids) = post::permanent_delete_by_user(db, user_id).await?;
                PostResponse::Purged { deleted, channel_ids }
            }
            PostRequest::PermanentDeleteByChannel { channel_id } => PostResponse::Purged {
                deleted: post::permanent_delete_by_channel(db, channel_id).await?,
                channel_ids: vec![channel_id.clone()],
            },
            PostRequest::PermanentDeleteBatch { end_time, limit } => {
                let (deleted, channel_ids) = post::permanent_delete_batch(db, *end_time, *limit).await?;
                PostResponse::Purged { deleted, channel_ids }
            }

            PostRequest::Get { id } => PostResponse::List(
                self.read(op, hints, Replica, |pool| async move { post::get_thread(&pool, id).await })
                    .await?,
            ),
            PostRequest::GetSingle { id } => PostResponse::Post(
                self.read(op, hints, Replica, |pool| async move { post::get_single(&pool, id).await })
                    .await?,
            ),
            PostRequest::GetPosts { channel_id, offset, limit } => PostResponse::List(
                self.read(op, hints, Replica, |pool| async move {
                    post::get_posts(&pool, channel_id, *offset, *limit).await
                })
                .await?,
            ),
            PostRequest::GetPostsSince { channel_id, time } => PostResponse::List(
                self.read(op, hints, Replica, |pool| async move {
                    post::get_posts_since(&pool, channel_id, *time).await
                })
                .await?,
            ),
            PostRequest::GetPostsBefore { channel_id, post_id, per_page, page } => PostResponse::List(
                self.read(op, hints, Replica, |pool| async move {
                    post::get_posts_around(&pool, channel_id, post_id, *per_page, *page, true).await
                })
                .await?,
            ),
            PostRequest::GetPostsAfter { channel_id, post_id, per_page, page } => PostResponse::List(
                self.read(op, hints, Replica, |pool| async move {
                    post::get_posts_around(&pool, channel_id, post_id, *per_page, *page, false).await
                })
                .await?,
            ),
            PostRequest::GetPostsCreatedAt { channel_id, time } => PostResponse::Posts(
                self.read(op, hints, Replica, |pool| async move {
                    post::get_posts_created_at(&pool, channel_id, *time).await
                })
                .await?,
            ),
            PostRequest::GetPostsByIds { ids } => PostResponse::Posts(
                self.read(op, hints, Replica, |pool| async move { post::get_posts_by_ids(&pool, ids).await })
                    .await?,
            ),
            PostRequest::GetPostsBatchForIndexing { start_time, end_time, limit } => PostResponse::Indexing(
                self.read(op, hints, Replica, |pool| async move {
                    post::get_posts_batch_for_indexing(&pool, *start_time, *end_time, *limit).await
                })
                .await?,
            ),
            PostRequest::LastPostTime { channel_id } => PostResponse::Time(
                self.read(op, hints, Replica, |pool| async move {
                    post::last_post_time(&pool, channel_id).await
                })
                .await?,
            ),
            PostRequest::Search { team_id, user_id, params } => PostResponse::List(
                self.read(op, hints, Search, |pool| async move {
                    post::search(&pool, team_id, user_id, params).await
                })
                .await?,
            ),
            PostRequest::AnalyticsPostCountsByDay { team_id } => {
                let driver = self.pool.driver();
                let now = now_millis();
                PostResponse::Rows(
                    self.read(op, hints, Replica, |pool| async move {
                        post::analytics_post_counts_by_day(&pool, driver, team_id, now).await
                    })
                    .await?,
                )
            }
            PostRequest::AnalyticsUserCountsWithPostsByDay { team_id } => {
                let driver = self.pool.driver();
                let now = now_millis();
                PostResponse::Rows(
                    self.read(op, hints, Replica, |pool| async move {
                        post::analytics_user_counts_with_posts_by_day(&pool, driver, team_id, now).await
                    })
                    .await?,
                )
            }
            PostRequest::AnalyticsPostCount { team_id, must_have_file, must_have_hashtag } => {
                PostResponse::Count(
                    self.read(op, hints, Replica, |pool| async move {
                        post::analytics_post_count(&pool, team_id, *must_have_file, *must_have_hashtag)
                            .await
                    })
                    .await?,
                )
            }
            PostRequest::GetOldest => PostResponse::Post(
                self.read(op, hints, Replica, |pool| async move { post::get_oldest(&pool).await })
                    .await?,
            ),
            PostRequest::GetMaxPostSize => PostResponse::Size(POST_MESSAGE_MAX_RUNES),
        };

        Ok(response)
    }
}

#[async_trait]
impl Supplier<ChannelRequest> for SqlSupplier {
    async fn handle(
        &self,
        _ctx: &Context,
        req: &ChannelRequest,
        hints: &[Hint],
        _next: Next<'_, ChannelRequest>,
    ) -> Result<ChannelResponse> {
        let db = self.writer();

        let response = match req {
            ChannelRequest::Save(c) => ChannelResponse::Channel(channel::save(db, c).await?),
            ChannelRequest::Get { id } => ChannelResponse::Channel(
                self.read("channel.get", hints, ReadTarget::Replica, |pool| async move {
                    channel::get(&pool, id).await
                })
                .await?,
            ),
            ChannelRequest::AddMember(member) => {
                ChannelResponse::Member(channel::add_member(db, member).await?)
            }
            ChannelRequest::RemoveMember { channel_id, user_id } => {
                channel::remove_member(db, channel_id, user_id).await?;
                ChannelResponse::Done
            }
            ChannelRequest::Delete { id, time } => {
                channel::delete(db, id, *time).await?;
                ChannelResponse::Done
            }
        };

        Ok(response)
    }
}

#[async_trait]
impl BackingStore for SqlSupplier {
    async fn close(&self) {
        SqlSupplier::close(self).await;
    }
}
