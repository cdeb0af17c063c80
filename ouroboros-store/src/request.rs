//! Tagged requests and responses carried by the post and channel chains

use crate::error::{Result, StoreError};
use crate::model::{AnalyticsRow, Channel, ChannelMember, Post, PostForIndexing, PostList, SearchParams};
use crate::supplier::Request;

#[derive(Debug, Clone)]
pub enum PostRequest {
    Save(Post),
    /// A post together with its thread
    Get { id: String },
    GetSingle { id: String },
    /// Persist `new` and keep `old` as an archived revision
    Update { new: Post, old: Post },
    Overwrite(Post),
    Delete { id: String, time: i64, deleted_by: String },
    PermanentDeleteByUser { user_id: String },
    PermanentDeleteByChannel { channel_id: String },
    PermanentDeleteBatch { end_time: i64, limit: u32 },
    GetPosts { channel_id: String, offset: u32, limit: u32 },
    GetPostsSince { channel_id: String, time: i64 },
    GetPostsBefore { channel_id: String, post_id: String, per_page: u32, page: u32 },
    GetPostsAfter { channel_id: String, post_id: String, per_page: u32, page: u32 },
    GetPostsCreatedAt { channel_id: String, time: i64 },
    GetPostsByIds { ids: Vec<String> },
    /// Oldest posts created in `[start_time, end_time)`, with team and root times
    GetPostsBatchForIndexing { start_time: i64, end_time: i64, limit: u32 },
    /// Latest `update_at` of any post in the channel
    LastPostTime { channel_id: String },
    Search { team_id: String, user_id: String, params: SearchParams },
    AnalyticsPostCountsByDay { team_id: String },
    AnalyticsUserCountsWithPostsByDay { team_id: String },
    AnalyticsPostCount { team_id: String, must_have_file: bool, must_have_hashtag: bool },
    GetOldest,
    GetMaxPostSize,
}

impl Request for PostRequest {
    type Response = PostResponse;

    fn operation(&self) -> &'static str {
        match self {
            PostRequest::Save(_) => "post.save",
            PostRequest::Get { .. } => "post.get",
            PostRequest::GetSingle { .. } => "post.get_single",
            PostRequest::Update { .. } => "post.update",
            PostRequest::Overwrite(_) => "post.overwrite",
            PostRequest::Delete { .. } => "post.delete",
            PostRequest::PermanentDeleteByUser { .. } => "post.permanent_delete_by_user",
            PostRequest::PermanentDeleteByChannel { .. } => "post.permanent_delete_by_channel",
            PostRequest::PermanentDeleteBatch { .. } => "post.permanent_delete_batch",
            PostRequest::GetPosts { .. } => "post.get_posts",
            PostRequest::GetPostsSince { .. } => "post.get_posts_since",
            PostRequest::GetPostsBefore { .. } => "post.get_posts_before",
            PostRequest::GetPostsAfter { .. } => "post.get_posts_after",
            PostRequest::GetPostsCreatedAt { .. } => "post.get_posts_created_at",
            PostRequest::GetPostsByIds { .. } => "post.get_posts_by_ids",
            PostRequest::GetPostsBatchForIndexing { .. } => "post.get_posts_batch_for_indexing",
            PostRequest::LastPostTime { .. } => "post.last_post_time",
            PostRequest::Search { .. } => "post.search",
            PostRequest::AnalyticsPostCountsByDay { .. } => "post.analytics_post_counts_by_day",
            PostRequest::AnalyticsUserCountsWithPostsByDay { .. } => {
                "post.analytics_user_counts_with_posts_by_day"
            }
            PostRequest::AnalyticsPostCount { .. } => "post.analytics_post_count",
            PostRequest::GetOldest => "post.get_oldest",
            PostRequest::GetMaxPostSize => "post.get_max_post_size",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PostResponse {
    Post(Post),
    List(PostList),
    Posts(Vec<Post>),
    Indexing(Vec<PostForIndexing>),
    Time(i64),
    Rows(Vec<AnalyticsRow>),
    Count(i64),
    Size(usize),
    /// Soft delete of a post in `channel_id`
    Deleted { channel_id: String },
    /// Hard delete touching `channel_ids`
    Purged { deleted: u64, channel_ids: Vec<String> },
}

macro_rules! expect_variant {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(self) -> Result<$ty> {
            match self {
                PostResponse::$variant(value) => Ok(value),
                other => Err(other.unexpected(stringify!($variant))),
            }
        }
    };
}

impl PostResponse {
    fn kind(&self) -> &'static str {
        match self {
            PostResponse::Post(_) => "post",
            PostResponse::List(_) => "list",
            PostResponse::Posts(_) => "posts",
            PostResponse::Indexing(_) => "indexing",
            PostResponse::Time(_) => "time",
            PostResponse::Rows(_) => "rows",
            PostResponse::Count(_) => "count",
            PostResponse::Size(_) => "size",
            PostResponse::Deleted { .. } => "deleted",
            PostResponse::Purged { .. } => "purged",
        }
    }

    fn unexpected(&self, wanted: &'static str) -> StoreError {
        StoreError::UnexpectedResponse {
            expected: wanted,
            actual: self.kind(),
        }
    }

    expect_variant!(into_post, Post, Post);
    expect_variant!(into_list, List, PostList);
    expect_variant!(into_posts, Posts, Vec<Post>);
    expect_variant!(into_indexing, Indexing, Vec<PostForIndexing>);
    expect_variant!(into_time, Time, i64);
    expect_variant!(into_rows, Rows, Vec<AnalyticsRow>);
    expect_variant!(into_count, Count, i64);
    expect_variant!(into_size, Size, usize);

    pub fn into_deleted(self) -> Result<()> {
        match self {
            PostResponse::Deleted { .. } => Ok(()),
            other => Err(other.unexpected("Deleted")),
        }
    }

    pub fn into_purged(self) -> Result<u64> {
        match self {
            PostResponse::Purged { deleted, .. } => Ok(deleted),
            other => Err(other.unexpected("Purged")),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ChannelRequest {
    Save(Channel),
    Get { id: String },
    AddMember(ChannelMember),
    RemoveMember { channel_id: String, user_id: String },
    Delete { id: String, time: i64 },
}

impl Request for ChannelRequest {
    type Response = ChannelResponse;

    fn operation(&self) -> &'static str {
        match self {
            ChannelRequest::Save(_) => "channel.save",
            ChannelRequest::Get { .. } => "channel.get",
            ChannelRequest::AddMember(_) => "channel.add_member",
            ChannelRequest::RemoveMember { .. } => "channel.remove_member",
            ChannelRequest::Delete { .. } => "channel.delete",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChannelResponse {
    Channel(Channel),
    Member(ChannelMember),
    Done,
}

impl ChannelResponse {
    fn kind(&self) -> &'static str {
        match self {
            ChannelResponse::Channel(_) => "channel",
            ChannelResponse::Member(_) => "member",
            ChannelResponse::Done => "done",
        }
    }

    pub fn into_channel(self) -> Result<Channel> {
        match self {
            ChannelResponse::Channel(channel) => Ok(channel),
            other => Err(StoreError::UnexpectedResponse {
                expected: "Channel",
                actual: other.kind(),
            }),
        }
    }

    pub fn into_member(self) -> Result<ChannelMember> {
        match self {
            ChannelResponse::Member(member) => Ok(member),
            other => Err(StoreError::UnexpectedResponse {
                expected: "Member",
                actual: other.kind(),
            }),
        }
    }

    pub fn into_done(self) -> Result<()> {
        match self {
            ChannelResponse::Done => Ok(()),
            other => Err(StoreError::UnexpectedResponse {
                expected: "Done",
                actual: other.kind(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_names() {
        assert_eq!(PostRequest::GetOldest.operation(), "post.get_oldest");
        assert_eq!(
            ChannelRequest::Get { id: "x".into() }.operation(),
            "channel.get"
        );
    }

    #[test]
    fn test_response_extraction() {
        assert_eq!(PostResponse::Count(3).into_count().unwrap(), 3);

        let err = PostResponse::Time(1).into_post().unwrap_err();
        assert!(matches!(
            err,
            StoreError::UnexpectedResponse { expected: "Post", actual: "time" }
        ));

        assert!(ChannelResponse::Done.into_done().is_ok());
        assert!(ChannelResponse::Done.into_channel().is_err());
    }
}
