//! Entities persisted by the store

pub mod channel;
pub mod post;

pub use channel::{Channel, ChannelMember, ChannelType};
pub use post::{AnalyticsRow, Post, PostForIndexing, PostList, SearchParams};

use chrono::Utc;

/// Length of every generated identifier
pub const ID_LENGTH: usize = 26;

const ID_ALPHABET: &[u8; 32] = b"ybndrfg8ejkmcpqxot1uwisza345h769";

/// Generate a 26-character identifier: a random UUID in lowercase base32
pub fn new_id() -> String {
    let mut out = String::with_capacity(ID_LENGTH);
    let mut buffer: u32 = 0;
    let mut bits = 0u32;

    for byte in uuid::Uuid::new_v4().into_bytes() {
        buffer = (buffer << 8) | u32::from(byte);
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ID_ALPHABET[((buffer >> bits) & 31) as usize] as char);
        }
        buffer &= (1 << bits) - 1;
    }
    if bits > 0 {
        out.push(ID_ALPHABET[((buffer << (5 - bits)) & 31) as usize] as char);
    }

    out
}

/// Whether `id` has the shape produced by [`new_id`]
pub fn is_valid_id(id: &str) -> bool {
    id.len() == ID_LENGTH && id.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_new_id_shape() {
        for _ in 0..100 {
            let id = new_id();
            assert_eq!(id.len(), ID_LENGTH);
            assert!(is_valid_id(&id), "bad id {}", id);
        }
    }

    #[test]
    fn test_new_id_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| new_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_is_valid_id() {
        assert!(!is_valid_id(""));
        assert!(!is_valid_id("short"));
        assert!(!is_valid_id("ABCDEFGHIJKLMNOPQRSTUVWXYZ"));
        assert!(is_valid_id("abcdefghijklmnopqrstuvwxyz"));
    }
}
