//! Member repository interface and in-memory backend.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use lobby_contract::ChannelKind;
use thiserror::Error;

use crate::identity_model::Member;

#[derive(Debug, Error)]
/// Enumerates supported `MemberStoreError` values.
pub enum MemberStoreError {
    #[error("unique constraint violated on {field}")]
    UniqueViolation { field: &'static str },
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

/// Repository interface for canonical member rows.
///
/// Uniqueness of `email` and of each per-channel uid is enforced here, which
/// converts concurrent-login races into detectable conflicts the merge
/// engine retries.
pub trait MemberStore: Send + Sync {
    fn next_member_id(&self) -> Result<String, MemberStoreError>;

    fn insert(&self, member: &Member) -> Result<(), MemberStoreError>;

    fn update(&self, member: &Member) -> Result<(), MemberStoreError>;

    fn delete(&self, member_id: &str) -> Result<bool, MemberStoreError>;

    fn find(&self, member_id: &str) -> Result<Option<Member>, MemberStoreError>;

    fn find_by_email(&self, email: &str) -> Result<Option<Member>, MemberStoreError>;

    fn find_by_channel_uid(
        &self,
        channel: ChannelKind,
        uid: &str,
    ) -> Result<Option<Member>, MemberStoreError>;

    fn list(&self) -> Result<Vec<Member>, MemberStoreError>;
}

#[derive(Debug, Default)]
struct MemberState {
    members: BTreeMap<String, Member>,
    next_seq: u64,
}

#[derive(Debug, Default)]
/// Public struct `InMemoryMemberStore` used across Lobby components.
pub struct InMemoryMemberStore {
    state: Mutex<MemberState>,
}

impl InMemoryMemberStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_uniqueness(
    members: &BTreeMap<String, Member>,
    candidate: &Member,
) -> Result<(), MemberStoreError> {
    for existing in members.values() {
        if existing.member_id == candidate.member_id {
            continue;
        }
        if candidate.email.is_some() && existing.email == candidate.email {
            return Err(MemberStoreError::UniqueViolation { field: "email" });
        }
        for channel in ChannelKind::ALL {
            let candidate_uid = candidate.channel_uid(channel);
            if candidate_uid.is_some() && existing.channel_uid(channel) == candidate_uid {
                let field = match channel {
                    ChannelKind::Line => "line_uid",
                    ChannelKind::Facebook => "fb_uid",
                    ChannelKind::Webchat => "webchat_uid",
                };
                return Err(MemberStoreError::UniqueViolation { field });
            }
        }
    }
    Ok(())
}

impl MemberStore for InMemoryMemberStore {
    fn next_member_id(&self) -> Result<String, MemberStoreError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.next_seq += 1;
        Ok(format!("M{:03}", state.next_seq))
    }

    fn insert(&self, member: &Member) -> Result<(), MemberStoreError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.members.contains_key(&member.member_id) {
            return Err(MemberStoreError::UniqueViolation { field: "member_id" });
        }
        check_uniqueness(&state.members, member)?;
        state
            .members
            .insert(member.member_id.clone(), member.clone());
        Ok(())
    }

    fn update(&self, member: &Member) -> Result<(), MemberStoreError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if !state.members.contains_key(&member.member_id) {
            return Err(MemberStoreError::Backend(anyhow::anyhow!(
                "member '{}' does not exist",
                member.member_id
            )));
        }
        check_uniqueness(&state.members, member)?;
        state
            .members
            .insert(member.member_id.clone(), member.clone());
        Ok(())
    }

    fn delete(&self, member_id: &str) -> Result<bool, MemberStoreError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.members.remove(member_id).is_some())
    }

    fn find(&self, member_id: &str) -> Result<Option<Member>, MemberStoreError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.members.get(member_id).cloned())
    }

    fn find_by_email(&self, email: &str) -> Result<Option<Member>, MemberStoreError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .members
            .values()
            .find(|member| member.email.as_deref() == Some(email))
            .cloned())
    }

    fn find_by_channel_uid(
        &self,
        channel: ChannelKind,
        uid: &str,
    ) -> Result<Option<Member>, MemberStoreError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .members
            .values()
            .find(|member| member.channel_uid(channel) == Some(uid))
            .cloned())
    }

    fn list(&self) -> Result<Vec<Member>, MemberStoreError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.members.values().cloned().collect())
    }
}
