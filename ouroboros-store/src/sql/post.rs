//! Post queries

use crate::config::Driver;
use crate::error::{Result, StoreError};
use crate::model::{AnalyticsRow, Post, PostForIndexing, PostList, SearchParams};
use crate::sql::args::SqlArgs;
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};
use std::collections::HashSet;

const COLUMNS: [&str; 16] = [
    "id",
    "create_at",
    "update_at",
    "edit_at",
    "delete_at",
    "is_pinned",
    "user_id",
    "channel_id",
    "root_id",
    "parent_id",
    "original_id",
    "message",
    "post_type",
    "props",
    "hashtags",
    "file_ids",
];

/// Rows returned by `get_posts_since` at most
const SINCE_LIMIT: i64 = 1000;

/// Days covered by the analytics queries
const ANALYTICS_DAYS: i64 = 31;

fn columns(alias: &str) -> String {
    COLUMNS
        .iter()
        .map(|c| format!("{}.{}", alias, c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn post_from_row(row: &AnyRow) -> Result<Post> {
    let props: String = row.try_get("props")?;
    let file_ids: String = row.try_get("file_ids")?;

    Ok(Post {
        id: row.try_get("id")?,
        create_at: row.try_get("create_at")?,
        update_at: row.try_get("update_at")?,
        edit_at: row.try_get("edit_at")?,
        delete_at: row.try_get("delete_at")?,
        is_pinned: row.try_get::<i64, _>("is_pinned")? != 0,
        user_id: row.try_get("user_id")?,
        channel_id: row.try_get("channel_id")?,
        root_id: row.try_get("root_id")?,
        parent_id: row.try_get("parent_id")?,
        original_id: row.try_get("original_id")?,
        message: row.try_get("message")?,
        post_type: row.try_get("post_type")?,
        props: if props.is_empty() {
            Default::default()
        } else {
            serde_json::from_str(&props)?
        },
        hashtags: row.try_get("hashtags")?,
        file_ids: if file_ids.is_empty() {
            Vec::new()
        } else {
            serde_json::from_str(&file_ids)?
        },
    })
}

async fn fetch_posts(pool: &AnyPool, sql: &str, args: SqlArgs) -> Result<Vec<Post>> {
    let rows = args.bind(sqlx::query(sql)).fetch_all(pool).await?;
    rows.iter().map(post_from_row).collect()
}

fn push_post_values(args: &mut SqlArgs, post: &Post) -> Result<Vec<String>> {
    Ok(vec![
        args.push(&post.id),
        args.push(post.create_at),
        args.push(post.update_at),
        args.push(post.edit_at),
        args.push(post.delete_at),
        args.push(i64::from(post.is_pinned)),
        args.push(&post.user_id),
        args.push(&post.channel_id),
        args.push(&post.root_id),
        args.push(&post.parent_id),
        args.push(&post.original_id),
        args.push(&post.message),
        args.push(&post.post_type),
        args.push(post.props_json()?),
        args.push(&post.hashtags),
        args.push(post.file_ids_json()?),
    ])
}

fn insert_statement(post: &Post) -> Result<(String, SqlArgs)> {
    let mut args = SqlArgs::new();
    let values = push_post_values(&mut args, post)?;
    let sql = format!(
        "INSERT INTO posts ({}) VALUES ({})",
        COLUMNS.join(", "),
        values.join(", ")
    );
    Ok((sql, args))
}

fn update_statement(post: &Post) -> Result<(String, SqlArgs)> {
    let mut args = SqlArgs::new();
    let values = push_post_values(&mut args, post)?;
    let assignments = COLUMNS
        .iter()
        .zip(&values)
        .skip(1)
        .map(|(column, value)| format!("{} = {}", column, value))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("UPDATE posts SET {} WHERE id = {}", assignments, values[0]);
    Ok((sql, args))
}

/// Bump the root's `update_at` so thread listings notice a new reply
async fn touch_root<'c, E>(executor: E, root_id: &str, update_at: i64) -> Result<()>
where
    E: sqlx::Executor<'c, Database = sqlx::Any>,
{
    sqlx::query("UPDATE posts SET update_at = $1 WHERE id = $2 AND update_at < $1")
        .bind(update_at)
        .bind(root_id.to_string())
        .execute(executor)
        .await?;
    Ok(())
}

pub(crate) async fn save(pool: &AnyPool, post: &Post) -> Result<Post> {
    let (sql, args) = insert_statement(post)?;
    let mut tx = pool.begin().await?;
    args.bind(sqlx::query(&sql)).execute(&mut *tx).await?;
    if !post.root_id.is_empty() {
        touch_root(&mut *tx, &post.root_id, post.create_at).await?;
    }
    tx.commit().await?;
    Ok(post.clone())
}

pub(crate) async fn get_single(pool: &AnyPool, id: &str) -> Result<Post> {
    let sql = format!(
        "SELECT {} FROM posts p WHERE p.id = $1 AND p.delete_at = 0",
        columns("p")
    );
    let row = sqlx::query(&sql)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::not_found("post", id))?;
    post_from_row(&row)
}

/// The post with every live post of its thread, newest first
pub(crate) async fn get_thread(pool: &AnyPool, id: &str) -> Result<PostList> {
    let post = get_single(pool, id).await?;
    let root_id = post.thread_id().to_string();

    let mut args = SqlArgs::new();
    let root = args.push(&root_id);
    let sql = format!(
        "SELECT {} FROM posts p WHERE (p.id = {root} OR p.root_id = {root}) AND p.delete_at = 0 \
         ORDER BY p.create_at DESC",
        columns("p"),
    );

    let mut list: PostList = fetch_posts(pool, &sql, args).await?.into_iter().collect();
    if !list.posts.contains_key(&post.id) {
        list.push(post);
    }
    Ok(list)
}

/// Write `new` over its row and store `archived` as a historical revision
pub(crate) async fn update(pool: &AnyPool, new: &Post, archived: &Post) -> Result<Post> {
    let (update_sql, update_args) = update_statement(new)?;
    let (insert_sql, insert_args) = insert_statement(archived)?;

    let mut tx = pool.begin().await?;
    let result = update_args
        .bind(sqlx::query(&update_sql))
        .execute(&mut *tx)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("post", &new.id));
    }
    insert_args
        .bind(sqlx::query(&insert_sql))
        .execute(&mut *tx)
        .await?;
    if !new.root_id.is_empty() {
        touch_root(&mut *tx, &new.root_id, new.update_at).await?;
    }
    tx.commit().await?;

    Ok(new.clone())
}

pub(crate) async fn overwrite(pool: &AnyPool, post: &Post) -> Result<Post> {
    let (sql, args) = update_statement(post)?;
    let result = args.bind(sqlx::query(&sql)).execute(pool).await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("post", &post.id));
    }
    Ok(post.clone())
}

/// Soft-delete a post and its replies; returns the post's channel
pub(crate) async fn delete(pool: &AnyPool, id: &str, time: i64, deleted_by: &str) -> Result<String> {
    let mut post = get_single(pool, id).await?;
    post.props.insert(
        "deleteBy".to_string(),
        serde_json::Value::String(deleted_by.to_string()),
    );

    let mut tx = pool.begin().await?;
    sqlx::query("UPDATE posts SET delete_at = $1, update_at = $1, props = $2 WHERE id = $3")
        .bind(time)
        .bind(post.props_json()?)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
    sqlx::query("UPDATE posts SET delete_at = $1, update_at = $1 WHERE root_id = $2 AND delete_at = 0")
        .bind(time)
        .bind(id.to_string())
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(post.channel_id)
}

async fn distinct_channels(pool: &AnyPool, sql: &str, args: SqlArgs) -> Result<Vec<String>> {
    let rows = args.bind(sqlx::query(sql)).fetch_all(pool).await?;
    rows.iter()
        .map(|row| row.try_get::<String, _>(0).map_err(StoreError::from))
        .collect()
}

/// Hard-delete a user's posts and the replies to them
pub(crate) async fn permanent_delete_by_user(
    pool: &AnyPool,
    user_id: &str,
) -> Result<(u64, Vec<String>)> {
    let mut args = SqlArgs::new();
    let user = args.push(user_id);
    let channels = distinct_channels(
        pool,
        &format!("SELECT DISTINCT channel_id FROM posts WHERE user_id = {}", user),
        args,
    )
    .await?;

    let result = sqlx::query(
        "DELETE FROM posts WHERE user_id = $1 \
         OR root_id IN (SELECT id FROM (SELECT id FROM posts WHERE user_id = $1) AS roots)",
    )
    .bind(user_id.to_string())
    .execute(pool)
    .await?;

    Ok((result.rows_affected(), channels))
}

pub(crate) async fn permanent_delete_by_channel(pool: &AnyPool, channel_id: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM posts WHERE channel_id = $1")
        .bind(channel_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

/// Hard-delete up to `limit` posts created before `end_time`
pub(crate) async fn permanent_delete_batch(
    pool: &AnyPool,
    end_time: i64,
    limit: u32,
) -> Result<(u64, Vec<String>)> {
    let mut tx = pool.begin().await?;
    let rows = sqlx::query("SELECT id, channel_id FROM posts WHERE create_at < $1 ORDER BY create_at LIMIT $2")
        .bind(end_time)
        .bind(i64::from(limit))
        .fetch_all(&mut *tx)
        .await?;

    if rows.is_empty() {
        tx.commit().await?;
        return Ok((0, Vec::new()));
    }

    let mut ids = Vec::with_capacity(rows.len());
    let mut channels = Vec::new();
    let mut seen = HashSet::new();
    for row in &rows {
        ids.push(row.try_get::<String, _>("id")?);
        let channel: String = row.try_get("channel_id")?;
        if seen.insert(channel.clone()) {
            channels.push(channel);
        }
    }

    let mut args = SqlArgs::new();
    let sql = format!("DELETE FROM posts WHERE id IN ({})", args.push_list(&ids));
    let result = args.bind(sqlx::query(&sql)).execute(&mut *tx).await?;
    tx.commit().await?;

    Ok((result.rows_affected(), channels))
}

/// Add the roots of any reply whose thread head is not already in `list`
async fn attach_roots(pool: &AnyPool, list: &mut PostList) -> Result<()> {
    let missing: Vec<String> = list
        .posts
        .values()
        .filter(|p| !p.root_id.is_empty() && !list.posts.contains_key(&p.root_id))
        .map(|p| p.root_id.clone())
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();

    if missing.is_empty() {
        return Ok(());
    }

    let mut args = SqlArgs::new();
    let sql = format!(
        "SELECT {} FROM posts p WHERE p.id IN ({})",
        columns("p"),
        args.push_list(&missing)
    );
    for root in fetch_posts(pool, &sql, args).await? {
        list.add_post(root);
    }
    Ok(())
}

/// One page of a channel's live posts, newest first
pub(crate) async fn get_posts(
    pool: &AnyPool,
    channel_id: &str,
    offset: u32,
    limit: u32,
) -> Result<PostList> {
    let sql = format!(
        "SELECT {} FROM posts p WHERE p.channel_id = $1 AND p.delete_at = 0 \
         ORDER BY p.create_at DESC LIMIT $2 OFFSET $3",
        columns("p")
    );
    let mut args = SqlArgs::new();
    args.push(channel_id);
    args.push(i64::from(limit));
    args.push(i64::from(offset));

    let mut list: PostList = fetch_posts(pool, &sql, args).await?.into_iter().collect();
    attach_roots(pool, &mut list).await?;
    Ok(list)
}

/// Posts changed after `time`, deleted ones included
pub(crate) async fn get_posts_since(pool: &AnyPool, channel_id: &str, time: i64) -> Result<PostList> {
    let sql = format!(
        "SELECT {} FROM posts p WHERE p.channel_id = $1 AND p.update_at > $2 \
         ORDER BY p.create_at DESC LIMIT $3",
        columns("p")
    );
    let mut args = SqlArgs::new();
    args.push(channel_id);
    args.push(time);
    args.push(SINCE_LIMIT);

    let mut list: PostList = fetch_posts(pool, &sql, args).await?.into_iter().collect();
    attach_roots(pool, &mut list).await?;
    Ok(list)
}

/// Page of posts created before (`before == true`) or after `post_id`
pub(crate) async fn get_posts_around(
    pool: &AnyPool,
    channel_id: &str,
    post_id: &str,
    per_page: u32,
    page: u32,
    before: bool,
) -> Result<PostList> {
    let (comparison, direction) = if before { ("<", "DESC") } else { (">", "ASC") };
    let sql = format!(
        "SELECT {} FROM posts p WHERE p.channel_id = $1 AND p.delete_at = 0 \
         AND p.create_at {} (SELECT create_at FROM posts WHERE id = $2) \
         ORDER BY p.create_at {} LIMIT $3 OFFSET $4",
        columns("p"),
        comparison,
        direction
    );
    let mut args = SqlArgs::new();
    args.push(channel_id);
    args.push(post_id);
    args.push(i64::from(per_page));
    args.push(i64::from(per_page) * i64::from(page));

    let mut list: PostList = fetch_posts(pool, &sql, args).await?.into_iter().collect();
    list.sort_by_create_at();
    attach_roots(pool, &mut list).await?;
    Ok(list)
}

pub(crate) async fn get_posts_created_at(pool: &AnyPool, channel_id: &str, time: i64) -> Result<Vec<Post>> {
    let sql = format!(
        "SELECT {} FROM posts p WHERE p.channel_id = $1 AND p.create_at = $2 ORDER BY p.id",
        columns("p")
    );
    let mut args = SqlArgs::new();
    args.push(channel_id);
    args.push(time);
    fetch_posts(pool, &sql, args).await
}

pub(crate) async fn get_posts_by_ids(pool: &AnyPool, ids: &[String]) -> Result<Vec<Post>> {
    let mut args = SqlArgs::new();
    let sql = format!(
        "SELECT {} FROM posts p WHERE p.id IN ({}) AND p.delete_at = 0 ORDER BY p.create_at DESC",
        columns("p"),
        args.push_list(ids)
    );
    fetch_posts(pool, &sql, args).await
}

pub(crate) async fn get_posts_batch_for_indexing(
    pool: &AnyPool,
    start_time: i64,
    end_time: i64,
    limit: u32,
) -> Result<Vec<PostForIndexing>> {
    let sql = format!(
        "SELECT {}, c.team_id AS team_id, r.create_at AS parent_create_at \
         FROM (SELECT * FROM posts WHERE create_at >= $1 AND create_at < $2 ORDER BY create_at LIMIT $3) p \
         LEFT JOIN channels c ON c.id = p.channel_id \
         LEFT JOIN posts r ON r.id = p.root_id \
         ORDER BY p.create_at, p.id",
        columns("p")
    );
    let rows = sqlx::query(&sql)
        .bind(start_time)
        .bind(end_time)
        .bind(i64::from(limit))
        .fetch_all(pool)
        .await?;

    rows.iter()
        .map(|row| {
            Ok(PostForIndexing {
                post: post_from_row(row)?,
                team_id: row.try_get::<Option<String>, _>("team_id")?.unwrap_or_default(),
                parent_create_at: row.try_get("parent_create_at")?,
            })
        })
        .collect()
}

/// Latest `update_at` in the channel, 0 when it has no posts
pub(crate) async fn last_post_time(pool: &AnyPool, channel_id: &str) -> Result<i64> {
    let row = sqlx::query("SELECT COALESCE(MAX(update_at), 0) AS last FROM posts WHERE channel_id = $1")
        .bind(channel_id.to_string())
        .fetch_one(pool)
        .await?;
    Ok(row.try_get("last")?)
}

fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Search posts in channels of `team_id` that `user_id` belongs to
pub(crate) async fn search(
    pool: &AnyPool,
    team_id: &str,
    user_id: &str,
    params: &SearchParams,
) -> Result<PostList> {
    let mut args = SqlArgs::new();
    let user = args.push(user_id);
    let team = args.push(team_id);

    let mut filters = vec![
        "p.delete_at = 0".to_string(),
        "p.post_type NOT LIKE 'system_%'".to_string(),
        format!("(c.team_id = {} OR c.team_id = '')", team),
    ];

    if !params.include_deleted_channels {
        filters.push("c.delete_at = 0".to_string());
    }
    if !params.in_channels.is_empty() {
        filters.push(format!("c.name IN ({})", args.push_list(&params.in_channels)));
    }
    if !params.from_users.is_empty() {
        filters.push(format!("p.user_id IN ({})", args.push_list(&params.from_users)));
    }
    if let Some(after) = params.after {
        filters.push(format!("p.create_at > {}", args.push(after)));
    }
    if let Some(before) = params.before {
        filters.push(format!("p.create_at < {}", args.push(before)));
    }

    let terms = params.term_list();
    if !terms.is_empty() {
        let column = if params.is_hashtag { "p.hashtags" } else { "p.message" };
        let clauses: Vec<String> = terms
            .iter()
            .map(|term| {
                let term = if params.is_hashtag && !term.starts_with('#') {
                    format!("#{}", term)
                } else {
                    term.clone()
                };
                let placeholder = args.push(format!("%{}%", escape_like(&term)));
                format!("LOWER({}) LIKE {} ESCAPE '\\'", column, placeholder)
            })
            .collect();
        let joiner = if params.or_terms { " OR " } else { " AND " };
        filters.push(format!("({})", clauses.join(joiner)));
    }

    let limit = args.push(i64::from(params.per_page));
    let offset = args.push(i64::from(params.per_page) * i64::from(params.page));

    let sql = format!(
        "SELECT {} FROM posts p \
         JOIN channels c ON c.id = p.channel_id \
         JOIN channel_members m ON m.channel_id = c.id AND m.user_id = {} \
         WHERE {} ORDER BY p.create_at DESC LIMIT {} OFFSET {}",
        columns("p"),
        user,
        filters.join(" AND "),
        limit,
        offset
    );

    Ok(fetch_posts(pool, &sql, args).await?.into_iter().collect())
}

fn day_expression(driver: Driver) -> &'static str {
    match driver {
        Driver::Sqlite => "date(p.create_at / 1000, 'unixepoch')",
        Driver::Postgres => "TO_CHAR(TO_TIMESTAMP(p.create_at / 1000), 'YYYY-MM-DD')",
    }
}

/// Shared FROM/WHERE for the analytics queries
fn analytics_scope(args: &mut SqlArgs, team_id: &str) -> String {
    if team_id.is_empty() {
        "FROM posts p WHERE p.delete_at = 0".to_string()
    } else {
        format!(
            "FROM posts p JOIN channels c ON c.id = p.channel_id \
             WHERE p.delete_at = 0 AND c.team_id = {}",
            args.push(team_id)
        )
    }
}

async fn counts_by_day(
    pool: &AnyPool,
    driver: Driver,
    team_id: &str,
    count: &str,
    now: i64,
) -> Result<Vec<AnalyticsRow>> {
    let mut args = SqlArgs::new();
    let scope = analytics_scope(&mut args, team_id);
    let since = args.push(now - ANALYTICS_DAYS * 24 * 60 * 60 * 1000);
    let until = args.push(now);

    let sql = format!(
        "SELECT {} AS name, {} AS value {} AND p.create_at >= {} AND p.create_at <= {} \
         GROUP BY {} ORDER BY name DESC LIMIT {}",
        day_expression(driver),
        count,
        scope,
        since,
        until,
        day_expression(driver),
        ANALYTICS_DAYS
    );

    let rows = args.bind(sqlx::query(&sql)).fetch_all(pool).await?;
    rows.iter()
        .map(|row| {
            Ok(AnalyticsRow {
                name: row.try_get("name")?,
                value: row.try_get("value")?,
            })
        })
        .collect()
}

/// Posts per day over the last month, newest day first
pub(crate) async fn analytics_post_counts_by_day(
    pool: &AnyPool,
    driver: Driver,
    team_id: &str,
    now: i64,
) -> Result<Vec<AnalyticsRow>> {
    counts_by_day(pool, driver, team_id, "COUNT(*)", now).await
}

/// Distinct posting users per day over the last month
pub(crate) async fn analytics_user_counts_with_posts_by_day(
    pool: &AnyPool,
    driver: Driver,
    team_id: &str,
    now: i64,
) -> Result<Vec<AnalyticsRow>> {
    counts_by_day(pool, driver, team_id, "COUNT(DISTINCT p.user_id)", now).await
}

pub(crate) async fn analytics_post_count(
    pool: &AnyPool,
    team_id: &str,
    must_have_file: bool,
    must_have_hashtag: bool,
) -> Result<i64> {
    let mut args = SqlArgs::new();
    let mut sql = format!("SELECT COUNT(*) AS value {}", analytics_scope(&mut args, team_id));
    if must_have_file {
        sql.push_str(" AND p.file_ids <> '[]' AND p.file_ids <> ''");
    }
    if must_have_hashtag {
        sql.push_str(" AND p.hashtags <> ''");
    }

    let row = args.bind(sqlx::query(&sql)).fetch_one(pool).await?;
    Ok(row.try_get("value")?)
}

pub(crate) async fn get_oldest(pool: &AnyPool) -> Result<Post> {
    let sql = format!(
        "SELECT {} FROM posts p ORDER BY p.create_at ASC LIMIT 1",
        columns("p")
    );
    let row = sqlx::query(&sql)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::not_found("post", "oldest"))?;
    post_from_row(&row)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_with_alias() {
        let cols = columns("p");
        assert!(cols.starts_with("p.id, p.create_at"));
        assert!(cols.ends_with("p.file_ids"));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
        assert_eq!(escape_like("plain"), "plain");
    }

    #[test]
    fn test_update_statement_targets_id() {
        let post = Post {
            id: "p1".to_string(),
            ..Default::default()
        };
        let (sql, args) = update_statement(&post).unwrap();
        assert!(sql.starts_with("UPDATE posts SET create_at = $2"));
        assert!(sql.ends_with("WHERE id = $1"));
        assert_eq!(args.len(), COLUMNS.len());
    }

    #[test]
    fn test_day_expression_per_dialect() {
        assert!(day_expression(Driver::Sqlite).contains("unixepoch"));
        assert!(day_expression(Driver::Postgres).contains("TO_CHAR"));
    }
}
