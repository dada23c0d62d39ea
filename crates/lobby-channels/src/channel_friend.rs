//! Channel friend model and follow-state transitions.

use lobby_contract::ChannelKind;
use lobby_core::advance_timestamp_ms;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `ChannelFriend` used across Lobby components.
///
/// A per-channel follow/contact record, created on first contact and never
/// deleted; merges only relink `member_id`.
pub struct ChannelFriend {
    pub channel: ChannelKind,
    pub channel_uid: String,
    pub member_id: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub is_following: bool,
    pub followed_at_unix_ms: Option<u64>,
    pub unfollowed_at_unix_ms: Option<u64>,
    pub last_interaction_unix_ms: Option<u64>,
}

impl ChannelFriend {
    pub fn new(channel: ChannelKind, channel_uid: impl Into<String>) -> Self {
        Self {
            channel,
            channel_uid: channel_uid.into(),
            member_id: None,
            display_name: None,
            avatar_url: None,
            is_following: false,
            followed_at_unix_ms: None,
            unfollowed_at_unix_ms: None,
            last_interaction_unix_ms: None,
        }
    }

    /// Applies a follow transition; returns true when the state changed.
    ///
    /// Entering `Following` stamps `followed_at` and clears `unfollowed_at`;
    /// leaving stamps `unfollowed_at`. A same-state call is a no-op so a
    /// repeated follow never fabricates lost history.
    pub fn apply_follow_transition(&mut self, following: bool, at_unix_ms: u64) -> bool {
        if self.is_following == following {
            return false;
        }
        self.is_following = following;
        if following {
            self.followed_at_unix_ms = Some(at_unix_ms);
            self.unfollowed_at_unix_ms = None;
        } else {
            self.unfollowed_at_unix_ms = Some(at_unix_ms);
        }
        true
    }

    /// Advances `last_interaction_at`; never moves it backward.
    pub fn record_interaction(&mut self, at_unix_ms: u64) {
        self.last_interaction_unix_ms =
            Some(advance_timestamp_ms(self.last_interaction_unix_ms, at_unix_ms));
    }

    /// Folds profile data into the record: non-blank incoming values win,
    /// blanks never erase what is already on file.
    pub fn apply_profile(&mut self, profile: &FriendProfile) {
        if let Some(member_id) = profile.member_id.as_deref() {
            if !member_id.trim().is_empty() {
                self.member_id = Some(member_id.trim().to_string());
            }
        }
        if let Some(display_name) = profile.display_name.as_deref() {
            if !display_name.trim().is_empty() {
                self.display_name = Some(display_name.trim().to_string());
            }
        }
        if let Some(avatar_url) = profile.avatar_url.as_deref() {
            if !avatar_url.trim().is_empty() {
                self.avatar_url = Some(avatar_url.trim().to_string());
            }
        }
        if let Some(at_unix_ms) = profile.interaction_unix_ms {
            self.record_interaction(at_unix_ms);
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Public struct `FriendProfile` used across Lobby components.
pub struct FriendProfile {
    pub member_id: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub interaction_unix_ms: Option<u64>,
}

impl FriendProfile {
    pub fn linked_to(member_id: impl Into<String>) -> Self {
        Self {
            member_id: Some(member_id.into()),
            ..Self::default()
        }
    }
}
