use crate::error::{Result, StoreError};
use crate::model::{is_valid_id, new_id, now_millis};
use serde::{Deserialize, Serialize};

pub const CHANNEL_NAME_MAX_LENGTH: usize = 64;
pub const CHANNEL_DISPLAY_NAME_MAX_RUNES: usize = 64;

/// Visibility of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelType {
    #[serde(rename = "O")]
    Open,
    #[serde(rename = "P")]
    Private,
    #[serde(rename = "D")]
    Direct,
    #[serde(rename = "G")]
    Group,
}

impl ChannelType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelType::Open => "O",
            ChannelType::Private => "P",
            ChannelType::Direct => "D",
            ChannelType::Group => "G",
        }
    }

    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "O" => Some(ChannelType::Open),
            "P" => Some(ChannelType::Private),
            "D" => Some(ChannelType::Direct),
            "G" => Some(ChannelType::Group),
            _ => None,
        }
    }

    /// Direct and group channels live outside any team
    pub fn is_team_scoped(&self) -> bool {
        matches!(self, ChannelType::Open | ChannelType::Private)
    }
}

/// A channel posts are made to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub team_id: String,
    pub name: String,
    pub display_name: String,
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub create_at: i64,
    pub update_at: i64,
    pub delete_at: i64,
}

impl Channel {
    pub fn new(team_id: impl Into<String>, name: impl Into<String>, channel_type: ChannelType) -> Self {
        let name = name.into();
        Self {
            id: String::new(),
            team_id: team_id.into(),
            display_name: name.clone(),
            name,
            channel_type,
            create_at: 0,
            update_at: 0,
            delete_at: 0,
        }
    }

    pub fn pre_save(&mut self) {
        if self.id.is_empty() {
            self.id = new_id();
        }
        if self.create_at == 0 {
            self.create_at = now_millis();
        }
        self.update_at = self.create_at;
    }

    pub fn is_deleted(&self) -> bool {
        self.delete_at != 0
    }

    pub fn is_valid(&self) -> Result<()> {
        if !is_valid_id(&self.id) {
            return Err(StoreError::validation("channel.id", "invalid id"));
        }
        if self.create_at == 0 || self.update_at == 0 {
            return Err(StoreError::validation("channel.create_at", "must be set"));
        }
        if self.channel_type.is_team_scoped() && !is_valid_id(&self.team_id) {
            return Err(StoreError::validation("channel.team_id", "invalid id"));
        }
        if !self.channel_type.is_team_scoped() && !self.team_id.is_empty() {
            return Err(StoreError::validation("channel.team_id", "must be empty for direct and group channels"));
        }
        if !is_valid_channel_name(&self.name) {
            return Err(StoreError::validation(
                "channel.name",
                "must be 1-64 lowercase letters, digits, '-' or '_'",
            ));
        }
        if self.display_name.chars().count() > CHANNEL_DISPLAY_NAME_MAX_RUNES {
            return Err(StoreError::validation("channel.display_name", "too long"));
        }
        Ok(())
    }
}

fn is_valid_channel_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= CHANNEL_NAME_MAX_LENGTH
        && name
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
}

/// Membership of a user in a channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMember {
    pub channel_id: String,
    pub user_id: String,
}

impl ChannelMember {
    pub fn new(channel_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            channel_id: channel_id.into(),
            user_id: user_id.into(),
        }
    }

    pub fn is_valid(&self) -> Result<()> {
        if !is_valid_id(&self.channel_id) {
            return Err(StoreError::validation("member.channel_id", "invalid id"));
        }
        if !is_valid_id(&self.user_id) {
            return Err(StoreError::validation("member.user_id", "invalid id"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_validation() {
        let mut channel = Channel::new(new_id(), "town-square", ChannelType::Open);
        channel.pre_save();
        assert!(channel.is_valid().is_ok());

        channel.name = "Town Square".to_string();
        assert!(channel.is_valid().is_err());
    }

    #[test]
    fn test_direct_channel_has_no_team() {
        let mut channel = Channel::new("", "dm_pair", ChannelType::Direct);
        channel.pre_save();
        assert!(channel.is_valid().is_ok());

        channel.team_id = new_id();
        assert!(channel.is_valid().is_err());
    }

    #[test]
    fn test_channel_type_codes() {
        for t in [ChannelType::Open, ChannelType::Private, ChannelType::Direct, ChannelType::Group] {
            assert_eq!(ChannelType::parse(t.as_str()), Some(t));
        }
        assert_eq!(ChannelType::parse("X"), None);
    }
}
