//! Channel and membership queries

use crate::error::{Result, StoreError};
use crate::model::{Channel, ChannelMember, ChannelType};
use sqlx::any::AnyRow;
use sqlx::{AnyPool, Row};

const SELECT: &str = "SELECT id, team_id, name, display_name, channel_type, create_at, update_at, delete_at \
                      FROM channels WHERE id = $1";

fn channel_from_row(row: &AnyRow) -> Result<Channel> {
    let code: String = row.try_get("channel_type")?;
    let channel_type = ChannelType::parse(&code)
        .ok_or_else(|| StoreError::validation("channel.type", format!("unknown type {:?}", code)))?;

    Ok(Channel {
        id: row.try_get("id")?,
        team_id: row.try_get("team_id")?,
        name: row.try_get("name")?,
        display_name: row.try_get("display_name")?,
        channel_type,
        create_at: row.try_get("create_at")?,
        update_at: row.try_get("update_at")?,
        delete_at: row.try_get("delete_at")?,
    })
}

pub(crate) async fn save(pool: &AnyPool, channel: &Channel) -> Result<Channel> {
    sqlx::query(
        "INSERT INTO channels (id, team_id, name, display_name, channel_type, create_at, update_at, delete_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(channel.id.clone())
    .bind(channel.team_id.clone())
    .bind(channel.name.clone())
    .bind(channel.display_name.clone())
    .bind(channel.channel_type.as_str())
    .bind(channel.create_at)
    .bind(channel.update_at)
    .bind(channel.delete_at)
    .execute(pool)
    .await?;
    Ok(channel.clone())
}

pub(crate) async fn get(pool: &AnyPool, id: &str) -> Result<Channel> {
    let row = sqlx::query(SELECT)
        .bind(id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::not_found("channel", id))?;
    channel_from_row(&row)
}

pub(crate) async fn add_member(pool: &AnyPool, member: &ChannelMember) -> Result<ChannelMember> {
    // Fails with NotFound before touching the membership table
    get(pool, &member.channel_id).await?;

    sqlx::query("INSERT INTO channel_members (channel_id, user_id) VALUES ($1, $2)")
        .bind(member.channel_id.clone())
        .bind(member.user_id.clone())
        .execute(pool)
        .await?;
    Ok(member.clone())
}

pub(crate) async fn remove_member(pool: &AnyPool, channel_id: &str, user_id: &str) -> Result<()> {
    let result = sqlx::query("DELETE FROM channel_members WHERE channel_id = $1 AND user_id = $2")
        .bind(channel_id.to_string())
        .bind(user_id.to_string())
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("channel member", format!("{}/{}", channel_id, user_id)));
    }
    Ok(())
}

pub(crate) async fn delete(pool: &AnyPool, id: &str, time: i64) -> Result<()> {
    let result = sqlx::query("UPDATE channels SET delete_at = $1, update_at = $1 WHERE id = $2")
        .bind(time)
        .bind(id.to_string())
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::not_found("channel", id));
    }
    Ok(())
}
