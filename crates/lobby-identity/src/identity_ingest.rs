//! Event ingest: dispatches normalized adapter events into the engine.
//!
//! Login events carry email through the full resolution priority (so the
//! ambiguity rule applies); profile updates resolve by uid first and then
//! take the deferred-merge path, which is how a member that logged in
//! without email later collapses into the email's owner.

use lobby_channels::ChannelFriendRegistry;
use lobby_contract::{ChannelEventKind, ChannelInboundEvent};
use lobby_conversation::{thread_key, ConversationMessageLog, MessageDirection};
use serde::Serialize;

use crate::identity_errors::IdentityError;
use crate::identity_merge::{ChannelLogin, MergeEngine};
use crate::identity_model::MergeDecision;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Public struct `IngestOutcome` used across Lobby components.
pub struct IngestOutcome {
    pub member_id: Option<String>,
    pub decision: Option<MergeDecision>,
    pub message_id: Option<u64>,
}

impl ChannelLogin {
    pub fn from_event(event: &ChannelInboundEvent) -> Self {
        Self {
            channel: event.channel,
            channel_uid: event.channel_uid.clone(),
            email: event.email().map(str::to_string),
            display_name: event.display_name().map(str::to_string),
            avatar_url: event.avatar_url().map(str::to_string),
            timestamp_ms: event.timestamp_ms,
        }
    }

    /// Same as `from_event` but without the email, for paths that must
    /// resolve by uid before email evidence is considered.
    pub fn from_event_uid_only(event: &ChannelInboundEvent) -> Self {
        Self {
            email: None,
            ..Self::from_event(event)
        }
    }
}

impl MergeEngine {
    pub fn ingest_event(&self, event: &ChannelInboundEvent) -> Result<IngestOutcome, IdentityError> {
        let channel_uid = event.channel_uid.trim();
        if channel_uid.is_empty() {
            return Err(IdentityError::InvalidLogin);
        }

        match event.event_kind {
            ChannelEventKind::Login => {
                let resolution = self.resolve_login(&ChannelLogin::from_event(event))?;
                Ok(IngestOutcome {
                    member_id: Some(resolution.member_id),
                    decision: Some(resolution.decision),
                    message_id: None,
                })
            }
            ChannelEventKind::ProfileUpdate => {
                let resolution = self.resolve_login(&ChannelLogin::from_event_uid_only(event))?;
                let member_id = match event.email() {
                    Some(email) => {
                        self.register_email(&resolution.member_id, email, event.timestamp_ms)?
                            .member_id
                    }
                    None => resolution.member_id,
                };
                Ok(IngestOutcome {
                    member_id: Some(member_id),
                    decision: Some(resolution.decision),
                    message_id: None,
                })
            }
            ChannelEventKind::Message => {
                let resolution = self.resolve_login(&ChannelLogin::from_event_uid_only(event))?;
                let thread_id = thread_key(event.channel, channel_uid);
                let message = self.messages.append_message(
                    &thread_id,
                    &event.text,
                    MessageDirection::Incoming,
                    event.timestamp_ms,
                )?;
                Ok(IngestOutcome {
                    member_id: Some(resolution.member_id),
                    decision: Some(resolution.decision),
                    message_id: Some(message.message_id),
                })
            }
            ChannelEventKind::Follow | ChannelEventKind::Unfollow => {
                let following = matches!(event.event_kind, ChannelEventKind::Follow);
                let friend = self
                    .registry(event.channel)
                    .set_following(channel_uid, following, event.timestamp_ms)?;
                Ok(IngestOutcome {
                    member_id: friend.member_id,
                    decision: None,
                    message_id: None,
                })
            }
        }
    }
}
