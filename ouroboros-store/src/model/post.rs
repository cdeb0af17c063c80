//! Post entity, post lists and search parameters

use crate::error::{Result, StoreError};
use crate::model::{is_valid_id, new_id, now_millis};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Maximum message length in characters
pub const POST_MESSAGE_MAX_RUNES: usize = 16383;
/// Maximum serialized size of `props`
pub const POST_PROPS_MAX_BYTES: usize = 8000;
/// Maximum length of the space-separated hashtag list
pub const POST_HASHTAGS_MAX_RUNES: usize = 1000;
/// Maximum length of the serialized file id list
pub const POST_FILE_IDS_MAX_RUNES: usize = 150;
/// Maximum length of a post type
pub const POST_TYPE_MAX_RUNES: usize = 26;

/// A message posted to a channel.
///
/// Timestamps are epoch milliseconds; `delete_at == 0` means live.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub create_at: i64,
    pub update_at: i64,
    pub edit_at: i64,
    pub delete_at: i64,
    pub is_pinned: bool,
    pub user_id: String,
    pub channel_id: String,
    pub root_id: String,
    pub parent_id: String,
    pub original_id: String,
    pub message: String,
    #[serde(rename = "type")]
    pub post_type: String,
    pub props: serde_json::Map<String, serde_json::Value>,
    pub hashtags: String,
    pub file_ids: Vec<String>,
}

impl Post {
    pub fn new(channel_id: impl Into<String>, user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            user_id: user_id.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Reply to `root` in the same channel
    pub fn reply_to(root: &Post, user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            root_id: root.id.clone(),
            parent_id: root.id.clone(),
            ..Self::new(root.channel_id.clone(), user_id, message)
        }
    }

    /// Assign id, timestamps and hashtags before the first save
    pub fn pre_save(&mut self) {
        if self.id.is_empty() {
            self.id = new_id();
        }
        if self.create_at == 0 {
            self.create_at = now_millis();
        }
        self.update_at = self.create_at;
        if self.hashtags.is_empty() {
            self.hashtags = parse_hashtags(&self.message);
        }
    }

    /// Refresh `update_at` and hashtags before an update
    pub fn pre_update(&mut self) {
        self.update_at = now_millis().max(self.create_at);
        self.hashtags = parse_hashtags(&self.message);
    }

    pub fn is_deleted(&self) -> bool {
        self.delete_at != 0
    }

    /// Historical revision of this post, superseded at `at`
    pub fn archived_copy(&self, at: i64) -> Post {
        Post {
            id: new_id(),
            original_id: self.id.clone(),
            update_at: at,
            delete_at: at,
            ..self.clone()
        }
    }

    /// Id of the thread this post belongs to
    pub fn thread_id(&self) -> &str {
        if self.root_id.is_empty() {
            &self.id
        } else {
            &self.root_id
        }
    }

    /// Check every size and shape constraint of a saved post
    pub fn is_valid(&self, max_post_size: usize) -> Result<()> {
        if !is_valid_id(&self.id) {
            return Err(StoreError::validation("post.id", "invalid id"));
        }
        if self.create_at == 0 {
            return Err(StoreError::validation("post.create_at", "must be set"));
        }
        if self.update_at == 0 {
            return Err(StoreError::validation("post.update_at", "must be set"));
        }
        if !is_valid_id(&self.user_id) {
            return Err(StoreError::validation("post.user_id", "invalid id"));
        }
        if !is_valid_id(&self.channel_id) {
            return Err(StoreError::validation("post.channel_id", "invalid id"));
        }
        for (field, value) in [
            ("post.root_id", &self.root_id),
            ("post.parent_id", &self.parent_id),
            ("post.original_id", &self.original_id),
        ] {
            if !value.is_empty() && !is_valid_id(value) {
                return Err(StoreError::validation(field, "invalid id"));
            }
        }
        if !self.parent_id.is_empty() && self.root_id.is_empty() {
            return Err(StoreError::validation("post.root_id", "required when parent_id is set"));
        }

        let message_runes = self.message.chars().count();
        if message_runes > max_post_size {
            return Err(StoreError::validation(
                "post.message",
                format!("{} characters exceeds the limit of {}", message_runes, max_post_size),
            ));
        }
        if self.hashtags.chars().count() > POST_HASHTAGS_MAX_RUNES {
            return Err(StoreError::validation("post.hashtags", "too long"));
        }
        if self.post_type.chars().count() > POST_TYPE_MAX_RUNES {
            return Err(StoreError::validation("post.type", "too long"));
        }
        if self.file_ids_json()?.chars().count() > POST_FILE_IDS_MAX_RUNES {
            return Err(StoreError::validation("post.file_ids", "too long"));
        }
        if self.props_json()?.len() > POST_PROPS_MAX_BYTES {
            return Err(StoreError::validation("post.props", "too large"));
        }

        Ok(())
    }

    pub(crate) fn props_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.props)?)
    }

    pub(crate) fn file_ids_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.file_ids)?)
    }
}

/// Extract `#tags` from a message, deduplicated in first-seen order
pub fn parse_hashtags(message: &str) -> String {
    let mut seen = HashSet::new();
    let mut tags = Vec::new();

    for word in message.split_whitespace() {
        let tag = word.trim_end_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '-');
        if tag.len() > 1
            && tag.starts_with('#')
            && tag[1..].starts_with(|c: char| c.is_alphabetic())
            && seen.insert(tag.to_lowercase())
        {
            tags.push(tag);
        }
    }

    let mut joined = String::new();
    for tag in tags {
        if joined.chars().count() + tag.chars().count() + 1 > POST_HASHTAGS_MAX_RUNES {
            break;
        }
        if !joined.is_empty() {
            joined.push(' ');
        }
        joined.push_str(tag);
    }
    joined
}

/// Ordered set of posts: `order` lists ids newest first, `posts` holds them
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PostList {
    pub order: Vec<String>,
    pub posts: HashMap<String, Post>,
}

impl PostList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `post` to the map without changing `order`
    pub fn add_post(&mut self, post: Post) {
        self.posts.insert(post.id.clone(), post);
    }

    /// Add `post` to the map and append it to `order`
    pub fn push(&mut self, post: Post) {
        self.order.push(post.id.clone());
        self.add_post(post);
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Posts in `order`
    pub fn ordered(&self) -> impl Iterator<Item = &Post> {
        self.order.iter().filter_map(|id| self.posts.get(id))
    }

    /// Sort `order` newest first
    pub fn sort_by_create_at(&mut self) {
        let posts = &self.posts;
        self.order.sort_by(|a, b| {
            let a = posts.get(a).map(|p| p.create_at).unwrap_or_default();
            let b = posts.get(b).map(|p| p.create_at).unwrap_or_default();
            b.cmp(&a)
        });
    }

    /// Largest `update_at` in the list, 0 when empty
    pub fn last_update_at(&self) -> i64 {
        self.posts.values().map(|p| p.update_at).max().unwrap_or(0)
    }
}

impl FromIterator<Post> for PostList {
    fn from_iter<I: IntoIterator<Item = Post>>(iter: I) -> Self {
        let mut list = PostList::new();
        for post in iter {
            list.push(post);
        }
        list
    }
}

/// Parameters of a message search
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchParams {
    /// Whitespace-separated terms
    pub terms: String,
    /// Match terms against hashtags instead of message text
    pub is_hashtag: bool,
    /// Any term may match instead of all terms
    pub or_terms: bool,
    /// Restrict to channels with these names
    pub in_channels: Vec<String>,
    /// Restrict to posts by these user ids
    pub from_users: Vec<String>,
    /// Only posts created after this time (ms)
    pub after: Option<i64>,
    /// Only posts created before this time (ms)
    pub before: Option<i64>,
    /// Include posts from deleted channels
    pub include_deleted_channels: bool,
    pub page: u32,
    pub per_page: u32,
}

/// Largest page size a search may request
pub const SEARCH_MAX_PER_PAGE: u32 = 200;

impl SearchParams {
    pub fn new(terms: impl Into<String>) -> Self {
        Self {
            terms: terms.into(),
            per_page: 100,
            ..Default::default()
        }
    }

    /// Lowercased search terms
    pub fn term_list(&self) -> Vec<String> {
        self.terms
            .split_whitespace()
            .map(|t| t.trim_matches('"').to_lowercase())
            .filter(|t| !t.is_empty())
            .collect()
    }

    pub fn validate(&self) -> Result<()> {
        if self.term_list().is_empty() && self.from_users.is_empty() && self.in_channels.is_empty() {
            return Err(StoreError::validation("search.terms", "no terms or filters given"));
        }
        if self.per_page == 0 || self.per_page > SEARCH_MAX_PER_PAGE {
            return Err(StoreError::validation(
                "search.per_page",
                format!("must be between 1 and {}", SEARCH_MAX_PER_PAGE),
            ));
        }
        if let (Some(after), Some(before)) = (self.after, self.before) {
            if after >= before {
                return Err(StoreError::validation("search.after", "must precede before"));
            }
        }
        Ok(())
    }
}

/// One bucket of an analytics query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsRow {
    pub name: String,
    pub value: i64,
}

/// A post with the context a search indexer needs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostForIndexing {
    #[serde(flatten)]
    pub post: Post,
    /// Team of the post's channel, empty for direct channels or a channel
    /// that no longer exists
    pub team_id: String,
    /// `create_at` of the thread root, for replies whose root still exists
    pub parent_create_at: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_post() -> Post {
        let mut post = Post::new(new_id(), new_id(), "hello #rust world");
        post.pre_save();
        post
    }

    #[test]
    fn test_pre_save_assigns_identity() {
        let post = valid_post();
        assert!(is_valid_id(&post.id));
        assert!(post.create_at > 0);
        assert_eq!(post.update_at, post.create_at);
        assert_eq!(post.hashtags, "#rust");
        assert!(post.is_valid(POST_MESSAGE_MAX_RUNES).is_ok());
    }

    #[test]
    fn test_message_length_limit() {
        let mut post = valid_post();
        post.message = "x".repeat(POST_MESSAGE_MAX_RUNES + 1);

        let err = post.is_valid(POST_MESSAGE_MAX_RUNES).unwrap_err();
        assert!(matches!(err, StoreError::Validation { field: "post.message", .. }));

        post.message = "é".repeat(POST_MESSAGE_MAX_RUNES);
        assert!(post.is_valid(POST_MESSAGE_MAX_RUNES).is_ok());
    }

    #[test]
    fn test_invalid_ids_rejected() {
        let mut post = valid_post();
        post.channel_id = "not-an-id".to_string();
        assert!(post.is_valid(POST_MESSAGE_MAX_RUNES).is_err());

        let mut post = valid_post();
        post.parent_id = new_id();
        assert!(matches!(
            post.is_valid(POST_MESSAGE_MAX_RUNES),
            Err(StoreError::Validation { field: "post.root_id", .. })
        ));
    }

    #[test]
    fn test_props_and_file_id_limits() {
        let mut post = valid_post();
        post.props.insert(
            "blob".to_string(),
            serde_json::Value::String("x".repeat(POST_PROPS_MAX_BYTES)),
        );
        assert!(post.is_valid(POST_MESSAGE_MAX_RUNES).is_err());

        let mut post = valid_post();
        post.file_ids = (0..6).map(|_| new_id()).collect();
        assert!(post.is_valid(POST_MESSAGE_MAX_RUNES).is_err());
    }

    #[test]
    fn test_parse_hashtags() {
        assert_eq!(parse_hashtags("#one two #three, #one #4x"), "#one #three");
        assert_eq!(parse_hashtags("no tags here"), "");
        assert_eq!(parse_hashtags("#"), "");
    }

    #[test]
    fn test_thread_id() {
        let root = valid_post();
        let mut reply = Post::reply_to(&root, new_id(), "reply");
        reply.pre_save();

        assert_eq!(root.thread_id(), root.id);
        assert_eq!(reply.thread_id(), root.id);
        assert!(reply.is_valid(POST_MESSAGE_MAX_RUNES).is_ok());
    }

    #[test]
    fn test_post_list_ordering() {
        let mut older = valid_post();
        older.create_at = 100;
        older.update_at = 100;
        let mut newer = valid_post();
        newer.create_at = 200;
        newer.update_at = 250;

        let mut list: PostList = vec![older.clone(), newer.clone()].into_iter().collect();
        list.sort_by_create_at();

        assert_eq!(list.order, vec![newer.id.clone(), older.id.clone()]);
        assert_eq!(list.last_update_at(), 250);
        assert_eq!(list.ordered().count(), 2);
    }

    #[test]
    fn test_search_params_validation() {
        assert!(SearchParams::new("hello").validate().is_ok());
        assert!(SearchParams::new("   ").validate().is_err());

        let mut params = SearchParams::new("hello");
        params.per_page = 0;
        assert!(params.validate().is_err());

        let mut params = SearchParams::new("hello");
        params.after = Some(10);
        params.before = Some(5);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_search_term_list() {
        let params = SearchParams::new("Hello \"World\"  ");
        assert_eq!(params.term_list(), vec!["hello", "world"]);
    }
}
