//! Registry interface and in-memory backend for channel friend records.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use lobby_contract::ChannelKind;

use crate::channel_friend::{ChannelFriend, FriendProfile};

/// Repository interface for one channel's friend records.
///
/// Implementations must keep `last_interaction_at` monotonic and must never
/// mutate member rows; relinking is driven by the merge engine.
pub trait ChannelFriendRegistry: Send + Sync {
    fn channel(&self) -> ChannelKind;

    fn find(&self, channel_uid: &str) -> Result<Option<ChannelFriend>>;

    fn find_by_member(&self, member_id: &str) -> Result<Option<ChannelFriend>>;

    /// Creates the friend on first contact, then folds in profile data.
    fn upsert(&self, channel_uid: &str, profile: &FriendProfile) -> Result<ChannelFriend>;

    /// Applies a follow transition, creating the friend when absent.
    fn set_following(
        &self,
        channel_uid: &str,
        following: bool,
        at_unix_ms: u64,
    ) -> Result<ChannelFriend>;

    fn record_interaction(&self, channel_uid: &str, at_unix_ms: u64) -> Result<ChannelFriend>;

    /// Repoints every friend linked to `from_member_id`; returns the count.
    fn relink_member(&self, from_member_id: &str, to_member_id: &str) -> Result<usize>;
}

#[derive(Debug)]
/// Public struct `InMemoryChannelFriendRegistry` used across Lobby components.
pub struct InMemoryChannelFriendRegistry {
    channel: ChannelKind,
    friends: Mutex<BTreeMap<String, ChannelFriend>>,
}

impl InMemoryChannelFriendRegistry {
    pub fn new(channel: ChannelKind) -> Self {
        Self {
            channel,
            friends: Mutex::new(BTreeMap::new()),
        }
    }

    fn with_friend<T>(
        &self,
        channel_uid: &str,
        apply: impl FnOnce(&mut ChannelFriend) -> T,
    ) -> Result<ChannelFriend> {
        let mut friends = self
            .friends
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let friend = friends
            .entry(channel_uid.trim().to_string())
            .or_insert_with(|| ChannelFriend::new(self.channel, channel_uid.trim()));
        apply(friend);
        Ok(friend.clone())
    }
}

impl ChannelFriendRegistry for InMemoryChannelFriendRegistry {
    fn channel(&self) -> ChannelKind {
        self.channel
    }

    fn find(&self, channel_uid: &str) -> Result<Option<ChannelFriend>> {
        let friends = self
            .friends
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(friends.get(channel_uid.trim()).cloned())
    }

    fn find_by_member(&self, member_id: &str) -> Result<Option<ChannelFriend>> {
        let friends = self
            .friends
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(friends
            .values()
            .find(|friend| friend.member_id.as_deref() == Some(member_id))
            .cloned())
    }

    fn upsert(&self, channel_uid: &str, profile: &FriendProfile) -> Result<ChannelFriend> {
        self.with_friend(channel_uid, |friend| friend.apply_profile(profile))
    }

    fn set_following(
        &self,
        channel_uid: &str,
        following: bool,
        at_unix_ms: u64,
    ) -> Result<ChannelFriend> {
        let updated = self.with_friend(channel_uid, |friend| {
            friend.apply_follow_transition(following, at_unix_ms)
        })?;
        tracing::info!(
            channel = self.channel.as_str(),
            channel_uid = channel_uid,
            following,
            "channel friend follow state updated"
        );
        Ok(updated)
    }

    fn record_interaction(&self, channel_uid: &str, at_unix_ms: u64) -> Result<ChannelFriend> {
        self.with_friend(channel_uid, |friend| friend.record_interaction(at_unix_ms))
    }

    fn relink_member(&self, from_member_id: &str, to_member_id: &str) -> Result<usize> {
        let mut friends = self
            .friends
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut relinked = 0;
        for friend in friends.values_mut() {
            if friend.member_id.as_deref() == Some(from_member_id) {
                friend.member_id = Some(to_member_id.to_string());
                relinked += 1;
            }
        }
        Ok(relinked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_upsert_creates_friend_on_first_contact() {
        let registry = InMemoryChannelFriendRegistry::new(ChannelKind::Line);
        let friend = registry
            .upsert("U123", &FriendProfile::linked_to("M001"))
            .expect("upsert");
        assert_eq!(friend.channel, ChannelKind::Line);
        assert!(!friend.is_following);
        assert_eq!(friend.member_id.as_deref(), Some("M001"));
        assert_eq!(
            registry.find("U123").expect("find").map(|f| f.channel_uid),
            Some("U123".to_string())
        );
    }

    #[test]
    fn unit_find_by_member_returns_linked_friend() {
        let registry = InMemoryChannelFriendRegistry::new(ChannelKind::Facebook);
        registry
            .upsert("F321", &FriendProfile::linked_to("M001"))
            .expect("upsert");
        let found = registry.find_by_member("M001").expect("find_by_member");
        assert_eq!(found.map(|f| f.channel_uid), Some("F321".to_string()));
        assert!(registry
            .find_by_member("M999")
            .expect("find_by_member")
            .is_none());
    }

    #[test]
    fn functional_relink_member_repoints_all_matches() {
        let registry = InMemoryChannelFriendRegistry::new(ChannelKind::Webchat);
        registry
            .upsert("W1", &FriendProfile::linked_to("M003"))
            .expect("upsert");
        registry
            .upsert("W2", &FriendProfile::linked_to("M007"))
            .expect("upsert");
        let relinked = registry.relink_member("M003", "M001").expect("relink");
        assert_eq!(relinked, 1);
        assert_eq!(
            registry
                .find("W1")
                .expect("find")
                .and_then(|f| f.member_id),
            Some("M001".to_string())
        );
        assert_eq!(
            registry
                .find("W2")
                .expect("find")
                .and_then(|f| f.member_id),
            Some("M007".to_string())
        );
    }

    #[test]
    fn regression_set_following_on_unknown_uid_creates_record() {
        let registry = InMemoryChannelFriendRegistry::new(ChannelKind::Webchat);
        let friend = registry
            .set_following("W123", true, 1_000)
            .expect("set_following");
        assert!(friend.is_following);
        assert_eq!(friend.followed_at_unix_ms, Some(1_000));
        assert_eq!(friend.member_id, None);
    }
}
