//! Member model, merge decisions, and profile-update payloads.

use std::collections::BTreeSet;

use lobby_contract::ChannelKind;
use lobby_core::advance_timestamp_ms;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
/// Public struct `Member` used across Lobby components.
///
/// The canonical, merged customer identity. At most one member exists per
/// external uid per channel; merged members are deleted, never left dangling.
pub struct Member {
    pub member_id: String,
    pub email: Option<String>,
    pub line_uid: Option<String>,
    pub fb_uid: Option<String>,
    pub webchat_uid: Option<String>,
    pub join_sources: BTreeSet<ChannelKind>,
    pub tags: BTreeSet<String>,
    pub last_interaction_unix_ms: Option<u64>,
    pub updated_unix_ms: Option<u64>,
}

impl Member {
    pub fn new(member_id: impl Into<String>, join_source: ChannelKind) -> Self {
        let mut join_sources = BTreeSet::new();
        join_sources.insert(join_source);
        Self {
            member_id: member_id.into(),
            email: None,
            line_uid: None,
            fb_uid: None,
            webchat_uid: None,
            join_sources,
            tags: BTreeSet::new(),
            last_interaction_unix_ms: None,
            updated_unix_ms: None,
        }
    }

    pub fn channel_uid(&self, channel: ChannelKind) -> Option<&str> {
        match channel {
            ChannelKind::Line => self.line_uid.as_deref(),
            ChannelKind::Facebook => self.fb_uid.as_deref(),
            ChannelKind::Webchat => self.webchat_uid.as_deref(),
        }
    }

    pub fn set_channel_uid(&mut self, channel: ChannelKind, uid: impl Into<String>) {
        let uid = Some(uid.into());
        match channel {
            ChannelKind::Line => self.line_uid = uid,
            ChannelKind::Facebook => self.fb_uid = uid,
            ChannelKind::Webchat => self.webchat_uid = uid,
        }
    }

    /// Agent-facing join source, e.g. "LINE / Webchat".
    pub fn join_source_label(&self) -> String {
        self.join_sources
            .iter()
            .map(|channel| channel.display_label())
            .collect::<Vec<_>>()
            .join(" / ")
    }

    pub fn record_interaction(&mut self, at_unix_ms: u64) {
        self.last_interaction_unix_ms =
            Some(advance_timestamp_ms(self.last_interaction_unix_ms, at_unix_ms));
    }

    pub fn touch(&mut self, at_unix_ms: u64) {
        self.updated_unix_ms = Some(advance_timestamp_ms(self.updated_unix_ms, at_unix_ms));
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `MergeDecision` values.
///
/// Transient outcome of resolving an inbound login; never persisted.
pub enum MergeDecision {
    EmailMatch,
    UidMatch,
    NewMember,
}

impl MergeDecision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::EmailMatch => "email_match",
            Self::UidMatch => "uid_match",
            Self::NewMember => "new_member",
        }
    }
}

#[derive(Debug, Clone, Default)]
/// Public struct `ProfileUpdate` used across Lobby components.
pub struct ProfileUpdate {
    pub email: Option<String>,
    pub tags: Vec<String>,
    pub event_unix_ms: u64,
}

/// Set-union tag merge, de-duplicated case- and whitespace-insensitively.
/// The first spelling seen for a given key is the one kept.
pub fn merge_tags(target: &mut BTreeSet<String>, incoming: &[String]) -> usize {
    let mut seen_keys = target
        .iter()
        .map(|tag| tag_key(tag))
        .collect::<BTreeSet<_>>();
    let mut added = 0;
    for raw in incoming {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen_keys.insert(tag_key(trimmed)) {
            target.insert(trimmed.to_string());
            added += 1;
        }
    }
    added
}

fn tag_key(raw: &str) -> String {
    raw.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_join_source_label_follows_channel_order() {
        let mut member = Member::new("M001", ChannelKind::Webchat);
        member.join_sources.insert(ChannelKind::Line);
        assert_eq!(member.join_source_label(), "LINE / Webchat");
        member.join_sources.insert(ChannelKind::Facebook);
        assert_eq!(member.join_source_label(), "LINE / Facebook / Webchat");
    }

    #[test]
    fn unit_channel_uid_accessors_cover_all_channels() {
        let mut member = Member::new("M001", ChannelKind::Line);
        member.set_channel_uid(ChannelKind::Line, "U123");
        member.set_channel_uid(ChannelKind::Facebook, "F321");
        assert_eq!(member.channel_uid(ChannelKind::Line), Some("U123"));
        assert_eq!(member.channel_uid(ChannelKind::Facebook), Some("F321"));
        assert_eq!(member.channel_uid(ChannelKind::Webchat), None);
    }

    #[test]
    fn unit_record_interaction_never_moves_backward() {
        let mut member = Member::new("M001", ChannelKind::Line);
        member.record_interaction(9_000);
        member.record_interaction(4_000);
        assert_eq!(member.last_interaction_unix_ms, Some(9_000));
    }

    #[test]
    fn unit_merge_tags_dedupes_case_and_whitespace_insensitively() {
        let mut tags = BTreeSet::new();
        merge_tags(
            &mut tags,
            &["VIP".to_string(), "high  spender".to_string()],
        );
        let added = merge_tags(
            &mut tags,
            &[
                " vip ".to_string(),
                "High Spender".to_string(),
                "returning".to_string(),
                "  ".to_string(),
            ],
        );
        assert_eq!(added, 1);
        assert_eq!(tags.len(), 3);
        assert!(tags.contains("VIP"));
        assert!(tags.contains("returning"));
    }
}
