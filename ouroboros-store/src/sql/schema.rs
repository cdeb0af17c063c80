//! Idempotent table and index bootstrap

use sqlx::AnyPool;
use tracing::{debug, info};

const TABLES: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS posts (
        id VARCHAR(26) PRIMARY KEY,
        create_at BIGINT NOT NULL,
        update_at BIGINT NOT NULL,
        edit_at BIGINT NOT NULL DEFAULT 0,
        delete_at BIGINT NOT NULL DEFAULT 0,
        is_pinned BIGINT NOT NULL DEFAULT 0,
        user_id VARCHAR(26) NOT NULL,
        channel_id VARCHAR(26) NOT NULL,
        root_id VARCHAR(26) NOT NULL DEFAULT '',
        parent_id VARCHAR(26) NOT NULL DEFAULT '',
        original_id VARCHAR(26) NOT NULL DEFAULT '',
        message TEXT NOT NULL,
        post_type VARCHAR(26) NOT NULL DEFAULT '',
        props TEXT NOT NULL,
        hashtags TEXT NOT NULL,
        file_ids TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS channels (
        id VARCHAR(26) PRIMARY KEY,
        team_id VARCHAR(26) NOT NULL DEFAULT '',
        name VARCHAR(64) NOT NULL,
        display_name VARCHAR(64) NOT NULL,
        channel_type VARCHAR(1) NOT NULL,
        create_at BIGINT NOT NULL,
        update_at BIGINT NOT NULL,
        delete_at BIGINT NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS channel_members (
        channel_id VARCHAR(26) NOT NULL,
        user_id VARCHAR(26) NOT NULL,
        PRIMARY KEY (channel_id, user_id)
    )",
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_posts_update_at ON posts (update_at)",
    "CREATE INDEX IF NOT EXISTS idx_posts_create_at ON posts (create_at)",
    "CREATE INDEX IF NOT EXISTS idx_posts_delete_at ON posts (delete_at)",
    "CREATE INDEX IF NOT EXISTS idx_posts_channel_id ON posts (channel_id)",
    "CREATE INDEX IF NOT EXISTS idx_posts_root_id ON posts (root_id)",
    "CREATE INDEX IF NOT EXISTS idx_posts_user_id ON posts (user_id)",
    "CREATE INDEX IF NOT EXISTS idx_posts_channel_id_update_at ON posts (channel_id, update_at)",
    "CREATE INDEX IF NOT EXISTS idx_posts_channel_id_delete_at_create_at ON posts (channel_id, delete_at, create_at)",
    "CREATE UNIQUE INDEX IF NOT EXISTS idx_channels_team_id_name ON channels (team_id, name)",
    "CREATE INDEX IF NOT EXISTS idx_channel_members_user_id ON channel_members (user_id)",
];

/// Create every table and index that does not exist yet
pub async fn ensure_schema(pool: &AnyPool) -> Result<(), sqlx::Error> {
    for statement in TABLES.iter().chain(INDEXES) {
        debug!("Applying schema statement: {}", first_line(statement));
        sqlx::query(statement).execute(pool).await?;
    }

    info!(
        "Schema ready ({} tables, {} indexes)",
        TABLES.len(),
        INDEXES.len()
    );
    Ok(())
}

fn first_line(statement: &str) -> &str {
    statement.lines().next().unwrap_or(statement)
}
