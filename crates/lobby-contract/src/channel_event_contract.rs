//! Channel contract schema and fixture parsing.
//!
//! Defines the channel/event enums and the normalized inbound event consumed
//! by the identity core. Validation here keeps ingress code working only on
//! well-formed events; adapters own the provider-specific payloads.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CHANNEL_EVENT_CONTRACT_SCHEMA_VERSION: u32 = 1;

fn channel_event_contract_schema_version() -> u32 {
    CHANNEL_EVENT_CONTRACT_SCHEMA_VERSION
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ChannelKind` values.
///
/// Declaration order is the fixed channel preference order used for
/// tie-breaks when interaction timestamps are equal or absent.
pub enum ChannelKind {
    Line,
    Facebook,
    Webchat,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 3] = [Self::Line, Self::Facebook, Self::Webchat];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Facebook => "facebook",
            Self::Webchat => "webchat",
        }
    }

    /// Agent-facing label, matching the provider's own casing.
    pub fn display_label(self) -> &'static str {
        match self {
            Self::Line => "LINE",
            Self::Facebook => "Facebook",
            Self::Webchat => "Webchat",
        }
    }

    /// Lower rank wins preference tie-breaks: LINE before Facebook before Webchat.
    pub fn preference_rank(self) -> usize {
        match self {
            Self::Line => 0,
            Self::Facebook => 1,
            Self::Webchat => 2,
        }
    }

    /// Parses the `as_str` form back into a channel; storage backends persist
    /// channels as text columns.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "line" => Some(Self::Line),
            "facebook" => Some(Self::Facebook),
            "webchat" => Some(Self::Webchat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
/// Enumerates supported `ChannelEventKind` values.
pub enum ChannelEventKind {
    Login,
    Message,
    Follow,
    Unfollow,
    ProfileUpdate,
}

impl ChannelEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::Message => "message",
            Self::Follow => "follow",
            Self::Unfollow => "unfollow",
            Self::ProfileUpdate => "profile_update",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `ChannelInboundEvent` used across Lobby components.
///
/// The normalized tuple every adapter produces: empty strings stand for
/// absent optional fields so adapters can emit flat JSON without nulls.
pub struct ChannelInboundEvent {
    #[serde(default = "channel_event_contract_schema_version")]
    pub schema_version: u32,
    pub channel: ChannelKind,
    pub event_kind: ChannelEventKind,
    pub channel_uid: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub avatar_url: String,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl ChannelInboundEvent {
    pub fn email(&self) -> Option<&str> {
        normalize_optional(&self.email)
    }

    pub fn display_name(&self) -> Option<&str> {
        normalize_optional(&self.display_name)
    }

    pub fn avatar_url(&self) -> Option<&str> {
        normalize_optional(&self.avatar_url)
    }
}

fn normalize_optional(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
/// Public struct `ChannelEventFixture` used across Lobby components.
pub struct ChannelEventFixture {
    pub schema_version: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub events: Vec<ChannelInboundEvent>,
}

pub fn parse_channel_event_fixture(raw: &str) -> Result<ChannelEventFixture> {
    let fixture = serde_json::from_str::<ChannelEventFixture>(raw)
        .context("failed to parse channel event fixture")?;
    validate_channel_event_fixture(&fixture)?;
    Ok(fixture)
}

pub fn load_channel_event_fixture(path: &Path) -> Result<ChannelEventFixture> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read channel event fixture {}", path.display()))?;
    parse_channel_event_fixture(&raw)
        .with_context(|| format!("invalid channel event fixture {}", path.display()))
}

fn validate_channel_event_fixture(fixture: &ChannelEventFixture) -> Result<()> {
    if fixture.schema_version != CHANNEL_EVENT_CONTRACT_SCHEMA_VERSION {
        bail!(
            "unsupported channel event fixture schema_version {} (expected {})",
            fixture.schema_version,
            CHANNEL_EVENT_CONTRACT_SCHEMA_VERSION
        );
    }
    if fixture.name.trim().is_empty() {
        bail!("channel event fixture has empty name");
    }
    if fixture.events.is_empty() {
        bail!("channel event fixture must include at least one event");
    }
    for (index, event) in fixture.events.iter().enumerate() {
        validate_channel_event_with_label(event, &format!("fixture event index {}", index))?;
    }
    Ok(())
}

pub fn validate_channel_inbound_event(event: &ChannelInboundEvent) -> Result<()> {
    validate_channel_event_with_label(event, "live ingress event")
}

fn validate_channel_event_with_label(event: &ChannelInboundEvent, label: &str) -> Result<()> {
    if event.schema_version != CHANNEL_EVENT_CONTRACT_SCHEMA_VERSION {
        bail!(
            "{label} has unsupported schema_version {} (expected {})",
            event.schema_version,
            CHANNEL_EVENT_CONTRACT_SCHEMA_VERSION
        );
    }
    if event.channel_uid.trim().is_empty() {
        bail!("{label} has empty channel_uid");
    }
    if event.timestamp_ms == 0 {
        bail!("{label} has zero timestamp_ms");
    }
    if matches!(event.event_kind, ChannelEventKind::Message) && event.text.trim().is_empty() {
        bail!("{label} is a message event with empty text");
    }
    if event.metadata.keys().any(|key| key.trim().is_empty()) {
        bail!("{label} includes empty metadata key");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event_json(channel: &str, uid: &str) -> String {
        format!(
            r#"{{
  "schema_version": 1,
  "channel": "{channel}",
  "event_kind": "login",
  "channel_uid": "{uid}",
  "email": "user@example.com",
  "timestamp_ms": 1764000000000
}}"#
        )
    }

    #[test]
    fn unit_channel_kind_preference_order_matches_declaration() {
        let mut ranked = ChannelKind::ALL.to_vec();
        ranked.sort_by_key(|channel| channel.preference_rank());
        assert_eq!(
            ranked,
            vec![ChannelKind::Line, ChannelKind::Facebook, ChannelKind::Webchat]
        );
        assert!(ChannelKind::Line < ChannelKind::Webchat);
    }

    #[test]
    fn unit_inbound_event_normalizes_blank_optionals() {
        let event = ChannelInboundEvent {
            schema_version: 1,
            channel: ChannelKind::Webchat,
            event_kind: ChannelEventKind::Login,
            channel_uid: "W123".to_string(),
            email: "  ".to_string(),
            display_name: " Guest ".to_string(),
            avatar_url: String::new(),
            timestamp_ms: 1,
            text: String::new(),
            metadata: BTreeMap::new(),
        };
        assert_eq!(event.email(), None);
        assert_eq!(event.display_name(), Some("Guest"));
        assert_eq!(event.avatar_url(), None);
    }

    #[test]
    fn unit_validate_event_rejects_empty_channel_uid() {
        let raw = sample_event_json("line", " ");
        let event = serde_json::from_str::<ChannelInboundEvent>(&raw).expect("parse event");
        let error = validate_channel_inbound_event(&event).expect_err("blank uid should fail");
        assert!(error.to_string().contains("empty channel_uid"));
    }

    #[test]
    fn unit_validate_event_rejects_blank_message_text() {
        let event = ChannelInboundEvent {
            schema_version: 1,
            channel: ChannelKind::Line,
            event_kind: ChannelEventKind::Message,
            channel_uid: "U1".to_string(),
            email: String::new(),
            display_name: String::new(),
            avatar_url: String::new(),
            timestamp_ms: 1,
            text: " ".to_string(),
            metadata: BTreeMap::new(),
        };
        let error = validate_channel_inbound_event(&event).expect_err("blank text should fail");
        assert!(error.to_string().contains("message event with empty text"));
    }

    #[test]
    fn functional_parse_fixture_accepts_all_three_channels() {
        let raw = format!(
            r#"{{
  "schema_version": 1,
  "name": "three-channel-baseline",
  "events": [{}, {}, {}]
}}"#,
            sample_event_json("line", "U123"),
            sample_event_json("facebook", "F321"),
            sample_event_json("webchat", "W555"),
        );
        let fixture = parse_channel_event_fixture(&raw).expect("fixture should parse");
        assert_eq!(fixture.events.len(), 3);
        assert_eq!(fixture.events[0].channel, ChannelKind::Line);
        assert_eq!(fixture.events[2].channel.display_label(), "Webchat");
    }

    #[test]
    fn functional_load_fixture_from_path_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("baseline.json");
        let raw = format!(
            r#"{{
  "schema_version": 1,
  "name": "file-baseline",
  "events": [{}]
}}"#,
            sample_event_json("facebook", "F1"),
        );
        std::fs::write(&path, &raw).expect("write fixture");
        let fixture = load_channel_event_fixture(&path).expect("fixture should load");
        assert_eq!(fixture.name, "file-baseline");
        assert_eq!(fixture.events[0].email(), Some("user@example.com"));
    }

    #[test]
    fn regression_parse_fixture_rejects_unsupported_schema() {
        let raw = r#"{
  "schema_version": 9,
  "name": "unsupported",
  "events": []
}"#;
        let error = parse_channel_event_fixture(raw).expect_err("schema should fail");
        assert!(error
            .to_string()
            .contains("unsupported channel event fixture schema_version 9"));
    }

    #[test]
    fn regression_parse_fixture_rejects_zero_timestamp() {
        let raw = r#"{
  "schema_version": 1,
  "name": "zero-timestamp",
  "events": [
    {
      "schema_version": 1,
      "channel": "line",
      "event_kind": "follow",
      "channel_uid": "U1",
      "timestamp_ms": 0
    }
  ]
}"#;
        let error = parse_channel_event_fixture(raw).expect_err("zero timestamp should fail");
        assert!(error
            .to_string()
            .contains("fixture event index 0 has zero timestamp_ms"));
    }
}
