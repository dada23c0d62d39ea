//! Member-list read model: latest-interaction channel per member.

use std::cmp::Ordering;

use lobby_channels::ChannelFriendRegistry;
use lobby_contract::ChannelKind;
use lobby_core::compare_optional_instants;
use lobby_identity::MemberStore;
use serde::Serialize;

use crate::chatroom_session::{ChatroomError, ChatroomSessionAssembler};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Public struct `MemberListEntry` used across Lobby components.
///
/// The agent's member list shows each member with the channel of their most
/// recent interaction and that channel's display name and avatar.
pub struct MemberListEntry {
    pub member_id: String,
    pub email: Option<String>,
    pub join_source_label: String,
    pub latest_channel: Option<ChannelKind>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub last_interaction_unix_ms: Option<u64>,
}

impl ChatroomSessionAssembler {
    pub fn list_members_with_last_interaction(
        &self,
    ) -> Result<Vec<MemberListEntry>, ChatroomError> {
        let mut entries = Vec::new();
        for member in self.members().list()? {
            let mut latest: Option<(ChannelKind, lobby_channels::ChannelFriend)> = None;
            for channel in ChannelKind::ALL {
                let Some(friend) = self.registry(channel).find_by_member(&member.member_id)?
                else {
                    continue;
                };
                let is_later = match &latest {
                    Some((_, best)) => {
                        compare_optional_instants(
                            friend.last_interaction_unix_ms,
                            best.last_interaction_unix_ms,
                        ) == Ordering::Greater
                    }
                    None => true,
                };
                if is_later {
                    latest = Some((channel, friend));
                }
            }
            let (latest_channel, display_name, avatar_url, last_interaction_unix_ms) = match latest
            {
                Some((channel, friend)) => (
                    Some(channel),
                    friend.display_name,
                    friend.avatar_url,
                    friend.last_interaction_unix_ms,
                ),
                None => (None, None, None, member.last_interaction_unix_ms),
            };
            let join_source_label = member.join_source_label();
            entries.push(MemberListEntry {
                member_id: member.member_id,
                email: member.email,
                join_source_label,
                latest_channel,
                display_name,
                avatar_url,
                last_interaction_unix_ms,
            });
        }
        Ok(entries)
    }
}
