//! Conversation thread and message models.

use lobby_contract::ChannelKind;
use lobby_core::advance_timestamp_ms;
use serde::{Deserialize, Serialize};

/// Deterministic thread identity for a platform identity.
///
/// The same external identity always maps to the same thread across repeated
/// logins, so thread ids are derived, never allocated.
pub fn thread_key(channel: ChannelKind, platform_uid: &str) -> String {
    format!("{}:{}", channel.as_str(), platform_uid.trim())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `MessageDirection` values.
pub enum MessageDirection {
    Incoming,
    Outgoing,
}

impl MessageDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Outgoing => "outgoing",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `ConversationThread` used across Lobby components.
pub struct ConversationThread {
    pub thread_id: String,
    pub member_id: String,
    pub channel: ChannelKind,
    pub platform_uid: String,
    pub last_message_unix_ms: Option<u64>,
    pub created_unix_ms: u64,
}

impl ConversationThread {
    pub(crate) fn record_message_time(&mut self, sent_at_unix_ms: u64) {
        self.last_message_unix_ms =
            Some(advance_timestamp_ms(self.last_message_unix_ms, sent_at_unix_ms));
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `ConversationMessage` used across Lobby components.
///
/// Immutable once written; ordering is by `sent_at`, with the store-assigned
/// id keeping insertion order stable for equal instants.
pub struct ConversationMessage {
    pub message_id: u64,
    pub thread_id: String,
    pub channel: ChannelKind,
    pub direction: MessageDirection,
    pub content: String,
    pub sent_at_unix_ms: u64,
}
