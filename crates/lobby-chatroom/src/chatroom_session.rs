//! Chatroom session assembly and default reply-channel selection.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;

use lobby_channels::{ChannelFriend, ChannelFriendRegistry};
use lobby_contract::ChannelKind;
use lobby_conversation::{
    ConversationError, ConversationMessage, ConversationMessageLog, ConversationThreadStore,
};
use lobby_core::compare_optional_instants;
use lobby_identity::{MemberStore, MemberStoreError};
use serde::Serialize;
use thiserror::Error;

/// Providers close their reply window 24 hours after the guest's last
/// interaction; the switcher surfaces this but never hides the channel.
pub const REPLY_WINDOW_MS: u64 = 24 * 60 * 60 * 1_000;

#[derive(Debug, Error)]
/// Enumerates supported `ChatroomError` values.
pub enum ChatroomError {
    #[error("member '{0}' not found")]
    MemberNotFound(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<MemberStoreError> for ChatroomError {
    fn from(error: MemberStoreError) -> Self {
        match error {
            MemberStoreError::UniqueViolation { field } => Self::Storage(anyhow::anyhow!(
                "unexpected unique violation on {field} during read"
            )),
            MemberStoreError::Backend(inner) => Self::Storage(inner),
        }
    }
}

impl From<ConversationError> for ChatroomError {
    fn from(error: ConversationError) -> Self {
        match error {
            ConversationError::ThreadNotFound(thread_id) => Self::Storage(anyhow::anyhow!(
                "conversation thread '{thread_id}' vanished mid-read"
            )),
            ConversationError::Storage(inner) => Self::Storage(inner),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ChannelAvailability` values.
pub enum ChannelAvailability {
    Available,
    ReplyWindowExpired,
    Offline,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Public struct `ChatroomSession` used across Lobby components.
pub struct ChatroomSession {
    pub member_id: String,
    pub available_platforms: Vec<ChannelKind>,
    pub default_platform: Option<ChannelKind>,
    pub threads: BTreeMap<ChannelKind, String>,
    pub availability: BTreeMap<ChannelKind, ChannelAvailability>,
}

/// Public struct `ChatroomSessionAssembler` used across Lobby components.
///
/// Pure aggregation apart from lazily ensuring threads exist; members and
/// channel friends are never mutated here.
pub struct ChatroomSessionAssembler {
    members: Arc<dyn MemberStore>,
    line_friends: Arc<dyn ChannelFriendRegistry>,
    facebook_friends: Arc<dyn ChannelFriendRegistry>,
    webchat_friends: Arc<dyn ChannelFriendRegistry>,
    threads: Arc<dyn ConversationThreadStore>,
    messages: Arc<dyn ConversationMessageLog>,
}

impl ChatroomSessionAssembler {
    pub fn new(
        members: Arc<dyn MemberStore>,
        line_friends: Arc<dyn ChannelFriendRegistry>,
        facebook_friends: Arc<dyn ChannelFriendRegistry>,
        webchat_friends: Arc<dyn ChannelFriendRegistry>,
        threads: Arc<dyn ConversationThreadStore>,
        messages: Arc<dyn ConversationMessageLog>,
    ) -> Self {
        Self {
            members,
            line_friends,
            facebook_friends,
            webchat_friends,
            threads,
            messages,
        }
    }

    pub(crate) fn registry(&self, channel: ChannelKind) -> &Arc<dyn ChannelFriendRegistry> {
        match channel {
            ChannelKind::Line => &self.line_friends,
            ChannelKind::Facebook => &self.facebook_friends,
            ChannelKind::Webchat => &self.webchat_friends,
        }
    }

    pub(crate) fn members(&self) -> &Arc<dyn MemberStore> {
        &self.members
    }

    /// Assembles the agent view for one member.
    ///
    /// `prefer_latest` picks the channel with the most recent interaction;
    /// absent timestamps sort first, and ties break by the fixed preference
    /// order LINE > Facebook > Webchat. With `prefer_latest` off the default
    /// is simply the first linked channel in that order.
    pub fn open(
        &self,
        member_id: &str,
        prefer_latest: bool,
        now_unix_ms: u64,
    ) -> Result<ChatroomSession, ChatroomError> {
        let member_id = member_id.trim();
        if self.members.find(member_id)?.is_none() {
            return Err(ChatroomError::MemberNotFound(member_id.to_string()));
        }

        let mut available_platforms = Vec::new();
        let mut threads = BTreeMap::new();
        let mut availability = BTreeMap::new();
        let mut latest: Option<(ChannelKind, Option<u64>)> = None;

        for channel in ChannelKind::ALL {
            let Some(friend) = self.registry(channel).find_by_member(member_id)? else {
                continue;
            };
            let thread = match self.threads.find_by_member_and_channel(member_id, channel)? {
                Some(thread) => thread,
                None => self.threads.upsert_thread(
                    member_id,
                    channel,
                    &friend.channel_uid,
                    now_unix_ms,
                )?,
            };
            available_platforms.push(channel);
            threads.insert(channel, thread.thread_id);
            availability.insert(channel, channel_availability(&friend, now_unix_ms));

            let is_later = match &latest {
                Some((_, best)) => {
                    compare_optional_instants(friend.last_interaction_unix_ms, *best)
                        == Ordering::Greater
                }
                None => true,
            };
            if is_later {
                latest = Some((channel, friend.last_interaction_unix_ms));
            }
        }

        let default_platform = if prefer_latest {
            latest.map(|(channel, _)| channel)
        } else {
            available_platforms.first().copied()
        };
        tracing::debug!(
            member_id,
            prefer_latest,
            platforms = available_platforms.len(),
            default_platform = ?default_platform,
            "assembled chatroom session"
        );

        Ok(ChatroomSession {
            member_id: member_id.to_string(),
            available_platforms,
            default_platform,
            threads,
            availability,
        })
    }

    /// Merged cross-channel timeline, ordered by `sent_at` with ties broken
    /// by channel preference and then message id.
    pub fn merged_timeline(
        &self,
        member_id: &str,
    ) -> Result<Vec<ConversationMessage>, ChatroomError> {
        let mut timeline = Vec::new();
        for thread in self.threads.list_by_member(member_id.trim())? {
            timeline.extend(self.messages.list_by_thread(&thread.thread_id)?);
        }
        timeline.sort_by_key(|message| {
            (
                message.sent_at_unix_ms,
                message.channel.preference_rank(),
                message.message_id,
            )
        });
        Ok(timeline)
    }
}

fn channel_availability(friend: &ChannelFriend, now_unix_ms: u64) -> ChannelAvailability {
    match friend.channel {
        ChannelKind::Webchat => {
            if friend.is_following {
                ChannelAvailability::Available
            } else {
                ChannelAvailability::Offline
            }
        }
        ChannelKind::Line | ChannelKind::Facebook => {
            let within_window = friend
                .last_interaction_unix_ms
                .map(|at| now_unix_ms.saturating_sub(at) <= REPLY_WINDOW_MS)
                .unwrap_or(false);
            if within_window {
                ChannelAvailability::Available
            } else {
                ChannelAvailability::ReplyWindowExpired
            }
        }
    }
}
