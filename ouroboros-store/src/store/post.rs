//! Post entity store
//!
//! Every method validates its arguments, dispatches the call and returns a
//! [`StoreHandle`] at once. Invalid arguments resolve the handle with
//! [`StoreError::Validation`] without reaching any supplier.

use crate::error::{Result, StoreError};
use crate::layers::PostCacheSupplier;
use crate::model::post::POST_MESSAGE_MAX_RUNES;
use crate::model::{is_valid_id, now_millis, AnalyticsRow, Post, PostForIndexing, PostList, SearchParams};
use crate::request::{PostRequest, PostResponse};
use crate::supplier::{Chain, Context, Dispatcher, Hint, StoreHandle};
use std::sync::Arc;
use std::time::Duration;

/// Largest page a listing may request
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Largest id list accepted by `get_posts_by_ids`
pub const MAX_IDS_PER_CALL: usize = 1000;

#[derive(Clone)]
pub struct PostStore {
    chain: Arc<Chain<PostRequest>>,
    dispatcher: Arc<Dispatcher>,
    cache: Option<Arc<PostCacheSupplier>>,
    timeout: Option<Duration>,
}

fn check_id(field: &'static str, id: &str) -> Result<()> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(StoreError::validation(field, format!("invalid id {:?}", id)))
    }
}

/// Empty means every team
fn check_team(team_id: &str) -> Result<()> {
    if team_id.is_empty() {
        Ok(())
    } else {
        check_id("team_id", team_id)
    }
}

fn check_page_size(field: &'static str, size: u32) -> Result<()> {
    if size == 0 || size > MAX_PAGE_SIZE {
        return Err(StoreError::validation(
            field,
            format!("must be between 1 and {}", MAX_PAGE_SIZE),
        ));
    }
    Ok(())
}

fn cache_hints(allow_cache: bool) -> Vec<Hint> {
    if allow_cache {
        Vec::new()
    } else {
        vec![Hint::BypassCache]
    }
}

/// Cache-validation tag of a channel's post listing
pub fn etag(last_post_time: i64) -> String {
    format!("{}.{}", env!("CARGO_PKG_VERSION"), last_post_time)
}

impl PostStore {
    pub(crate) fn new(
        chain: Arc<Chain<PostRequest>>,
        dispatcher: Arc<Dispatcher>,
        cache: Option<Arc<PostCacheSupplier>>,
    ) -> Self {
        Self {
            chain,
            dispatcher,
            cache,
            timeout: None,
        }
    }

    /// A copy of this store whose calls time out after `timeout`
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self.clone()
        }
    }

    fn dispatch<T, F>(&self, req: PostRequest, hints: Vec<Hint>, extract: F) -> StoreHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(PostResponse) -> Result<T> + Send + 'static,
    {
        let ctx = match self.timeout {
            Some(timeout) => Context::with_timeout(timeout),
            None => self.dispatcher.context(),
        };
        self.dispatcher
            .dispatch(ctx, self.chain.clone(), req, hints, extract)
    }

    fn checked<T, F>(&self, check: Result<()>, req: impl FnOnce() -> PostRequest, hints: Vec<Hint>, extract: F) -> StoreHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(PostResponse) -> Result<T> + Send + 'static,
    {
        match check {
            Ok(()) => self.dispatch(req(), hints, extract),
            Err(e) => StoreHandle::ready(Err(e)),
        }
    }

    /// Assign id and timestamps, then insert
    pub fn save(&self, mut post: Post) -> StoreHandle<Post> {
        post.pre_save();
        let check = post.is_valid(POST_MESSAGE_MAX_RUNES);
        self.checked(check, || PostRequest::Save(post), Vec::new(), PostResponse::into_post)
    }

    /// A post and its whole thread
    pub fn get(&self, id: impl Into<String>) -> StoreHandle<PostList> {
        let id = id.into();
        let check = check_id("post_id", &id);
        self.checked(check, || PostRequest::Get { id }, Vec::new(), PostResponse::into_list)
    }

    pub fn get_single(&self, id: impl Into<String>) -> StoreHandle<Post> {
        let id = id.into();
        let check = check_id("post_id", &id);
        self.checked(check, || PostRequest::GetSingle { id }, Vec::new(), PostResponse::into_post)
    }

    /// Like [`get_single`](Self::get_single) with explicit hints
    pub fn get_single_with(&self, id: impl Into<String>, hints: Vec<Hint>) -> StoreHandle<Post> {
        let id = id.into();
        let check = check_id("post_id", &id);
        self.checked(check, || PostRequest::GetSingle { id }, hints, PostResponse::into_post)
    }

    /// Replace `old` with `new`, keeping `old` as an archived revision
    pub fn update(&self, mut new: Post, old: &Post) -> StoreHandle<Post> {
        new.pre_update();
        if new.message != old.message {
            new.edit_at = new.update_at;
        }
        let check = new.is_valid(POST_MESSAGE_MAX_RUNES).and_then(|()| {
            if new.id == old.id {
                Ok(())
            } else {
                Err(StoreError::validation("post.id", "new and old revisions differ"))
            }
        });
        let old = old.clone();
        self.checked(check, || PostRequest::Update { new, old }, Vec::new(), PostResponse::into_post)
    }

    /// Write `post` over its row without archiving
    pub fn overwrite(&self, mut post: Post) -> StoreHandle<Post> {
        post.pre_update();
        let check = post.is_valid(POST_MESSAGE_MAX_RUNES);
        self.checked(check, || PostRequest::Overwrite(post), Vec::new(), PostResponse::into_post)
    }

    /// Soft-delete a post and its replies at `time`
    pub fn delete(&self, id: impl Into<String>, time: i64, deleted_by: impl Into<String>) -> StoreHandle<()> {
        let id = id.into();
        let deleted_by = deleted_by.into();
        let check = check_id("post_id", &id).and_then(|()| check_id("deleted_by", &deleted_by));
        self.checked(
            check,
            || PostRequest::Delete { id, time, deleted_by },
            Vec::new(),
            PostResponse::into_deleted,
        )
    }

    /// Remove a user's posts for good; resolves to the number of rows removed
    pub fn permanent_delete_by_user(&self, user_id: impl Into<String>) -> StoreHandle<u64> {
        let user_id = user_id.into();
        let check = check_id("user_id", &user_id);
        self.checked(
            check,
            || PostRequest::PermanentDeleteByUser { user_id },
            Vec::new(),
            PostResponse::into_purged,
        )
    }

    pub fn permanent_delete_by_channel(&self, channel_id: impl Into<String>) -> StoreHandle<u64> {
        let channel_id = channel_id.into();
        let check = check_id("channel_id", &channel_id);
        self.checked(
            check,
            || PostRequest::PermanentDeleteByChannel { channel_id },
            Vec::new(),
            PostResponse::into_purged,
        )
    }

    /// Remove up to `limit` posts created before `end_time`
    pub fn permanent_delete_batch(&self, end_time: i64, limit: u32) -> StoreHandle<u64> {
        let check = if limit == 0 {
            Err(StoreError::validation("limit", "must be greater than 0"))
        } else {
            Ok(())
        };
        self.checked(
            check,
            || PostRequest::PermanentDeleteBatch { end_time, limit },
            Vec::new(),
            PostResponse::into_purged,
        )
    }

    /// One page of a channel's posts, newest first
    pub fn get_posts(
        &self,
        channel_id: impl Into<String>,
        offset: u32,
        limit: u32,
        allow_cache: bool,
    ) -> StoreHandle<PostList> {
        let channel_id = channel_id.into();
        let check = check_id("channel_id", &channel_id).and_then(|()| check_page_size("limit", limit));
        self.checked(
            check,
            || PostRequest::GetPosts { channel_id, offset, limit },
            cache_hints(allow_cache),
            PostResponse::into_list,
        )
    }

    /// Posts changed after `time`. Resolves to an empty list without a
    /// round trip when the channel is known not to have changed.
    pub fn get_posts_since(&self, channel_id: impl Into<String>, time: i64, allow_cache: bool) -> StoreHandle<PostList> {
        let channel_id = channel_id.into();
        let check = check_id("channel_id", &channel_id);
        self.checked(
            check,
            || PostRequest::GetPostsSince { channel_id, time },
            cache_hints(allow_cache),
            PostResponse::into_list,
        )
    }

    pub fn get_posts_before(
        &self,
        channel_id: impl Into<String>,
        post_id: impl Into<String>,
        per_page: u32,
        page: u32,
    ) -> StoreHandle<PostList> {
        let channel_id = channel_id.into();
        let post_id = post_id.into();
        let check = check_id("channel_id", &channel_id)
            .and_then(|()| check_id("post_id", &post_id))
            .and_then(|()| check_page_size("per_page", per_page));
        self.checked(
            check,
            || PostRequest::GetPostsBefore { channel_id, post_id, per_page, page },
            Vec::new(),
            PostResponse::into_list,
        )
    }

    pub fn get_posts_after(
        &self,
        channel_id: impl Into<String>,
        post_id: impl Into<String>,
        per_page: u32,
        page: u32,
    ) -> StoreHandle<PostList> {
        let channel_id = channel_id.into();
        let post_id = post_id.into();
        let check = check_id("channel_id", &channel_id)
            .and_then(|()| check_id("post_id", &post_id))
            .and_then(|()| check_page_size("per_page", per_page));
        self.checked(
            check,
            || PostRequest::GetPostsAfter { channel_id, post_id, per_page, page },
            Vec::new(),
            PostResponse::into_list,
        )
    }

    pub fn get_posts_created_at(&self, channel_id: impl Into<String>, time: i64) -> StoreHandle<Vec<Post>> {
        let channel_id = channel_id.into();
        let check = check_id("channel_id", &channel_id);
        self.checked(
            check,
            || PostRequest::GetPostsCreatedAt { channel_id, time },
            Vec::new(),
            PostResponse::into_posts,
        )
    }

    pub fn get_posts_by_ids(&self, ids: Vec<String>) -> StoreHandle<Vec<Post>> {
        let check = if ids.is_empty() || ids.len() > MAX_IDS_PER_CALL {
            Err(StoreError::validation(
                "ids",
                format!("must hold between 1 and {} ids", MAX_IDS_PER_CALL),
            ))
        } else {
            ids.iter().try_for_each(|id| check_id("ids", id))
        };
        self.checked(check, || PostRequest::GetPostsByIds { ids }, Vec::new(), PostResponse::into_posts)
    }

    /// Up to `limit` posts created in `[start_time, end_time)`, oldest first,
    /// deleted ones included
    pub fn get_posts_batch_for_indexing(
        &self,
        start_time: i64,
        end_time: i64,
        limit: u32,
    ) -> StoreHandle<Vec<PostForIndexing>> {
        let check = check_page_size("limit", limit).and_then(|()| {
            if start_time > end_time {
                Err(StoreError::validation("end_time", "must not be before start_time"))
            } else {
                Ok(())
            }
        });
        self.checked(
            check,
            || PostRequest::GetPostsBatchForIndexing { start_time, end_time, limit },
            Vec::new(),
            PostResponse::into_indexing,
        )
    }

    /// Tag that changes whenever a post in the channel changes
    pub fn get_etag(&self, channel_id: impl Into<String>, allow_cache: bool) -> StoreHandle<String> {
        let channel_id = channel_id.into();
        let check = check_id("channel_id", &channel_id);
        self.checked(
            check,
            || PostRequest::LastPostTime { channel_id },
            cache_hints(allow_cache),
            |response| {
                let time = response.into_time()?;
                Ok(etag(if time == 0 { now_millis() } else { time }))
            },
        )
    }

    /// Search channels of `team_id` that `user_id` is a member of
    pub fn search(&self, team_id: impl Into<String>, user_id: impl Into<String>, params: SearchParams) -> StoreHandle<PostList> {
        let team_id = team_id.into();
        let user_id = user_id.into();
        let check = check_team(&team_id)
            .and_then(|()| check_id("user_id", &user_id))
            .and_then(|()| params.validate());
        self.checked(
            check,
            || PostRequest::Search { team_id, user_id, params },
            Vec::new(),
            PostResponse::into_list,
        )
    }

    /// Posts per day over the last 31 days; an empty team covers every team
    pub fn analytics_post_counts_by_day(&self, team_id: impl Into<String>) -> StoreHandle<Vec<AnalyticsRow>> {
        let team_id = team_id.into();
        let check = check_team(&team_id);
        self.checked(
            check,
            || PostRequest::AnalyticsPostCountsByDay { team_id },
            Vec::new(),
            PostResponse::into_rows,
        )
    }

    pub fn analytics_user_counts_with_posts_by_day(&self, team_id: impl Into<String>) -> StoreHandle<Vec<AnalyticsRow>> {
        let team_id = team_id.into();
        let check = check_team(&team_id);
        self.checked(
            check,
            || PostRequest::AnalyticsUserCountsWithPostsByDay { team_id },
            Vec::new(),
            PostResponse::into_rows,
        )
    }

    pub fn analytics_post_count(
        &self,
        team_id: impl Into<String>,
        must_have_file: bool,
        must_have_hashtag: bool,
    ) -> StoreHandle<i64> {
        let team_id = team_id.into();
        let check = check_team(&team_id);
        self.checked(
            check,
            || PostRequest::AnalyticsPostCount { team_id, must_have_file, must_have_hashtag },
            Vec::new(),
            PostResponse::into_count,
        )
    }

    pub fn get_oldest(&self) -> StoreHandle<Post> {
        self.dispatch(PostRequest::GetOldest, Vec::new(), PostResponse::into_post)
    }

    /// Longest message, in characters, the backing store accepts
    pub fn get_max_post_size(&self) -> StoreHandle<usize> {
        self.dispatch(PostRequest::GetMaxPostSize, Vec::new(), PostResponse::into_size)
    }

    /// Empty the post caches of this process and its peers
    pub fn clear_caches(&self) {
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    pub fn invalidate_last_post_time_cache(&self, channel_id: &str) {
        if let Some(cache) = &self.cache {
            cache.invalidate_last_post_time(channel_id);
        }
    }
}
