//! Identity resolution and member merging.
//!
//! Resolution priority is email match, then channel-uid match, then a new
//! member. Every check-then-act span runs under per-key locks, and store
//! unique violations are retried once before surfacing as `MergeConflict`.

use std::sync::{Arc, PoisonError};

use lobby_channels::{ChannelFriendRegistry, FriendProfile};
use lobby_contract::ChannelKind;
use lobby_conversation::{ConversationMessageLog, ConversationThreadStore};
use serde::Serialize;

use crate::identity_errors::IdentityError;
use crate::identity_locking::KeyLockRegistry;
use crate::identity_model::{merge_tags, Member, MergeDecision, ProfileUpdate};
use crate::identity_store::MemberStore;

#[derive(Debug, Clone, PartialEq, Eq)]
/// Public struct `ChannelLogin` used across Lobby components.
pub struct ChannelLogin {
    pub channel: ChannelKind,
    pub channel_uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub timestamp_ms: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Public struct `LoginResolution` used across Lobby components.
pub struct LoginResolution {
    pub member_id: String,
    pub decision: MergeDecision,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Public struct `MergeReport` used across Lobby components.
pub struct MergeReport {
    pub source_member_id: String,
    pub target_member_id: String,
    pub relinked_friends: usize,
    pub repointed_threads: usize,
    pub already_merged: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
/// Public struct `EmailRegistration` used across Lobby components.
pub struct EmailRegistration {
    pub member_id: String,
    pub merge: Option<MergeReport>,
}

/// Public struct `MergeEngine` used across Lobby components.
///
/// Sole owner of member creation and deletion. Registries and conversation
/// stores are injected; the engine only ever talks to their interfaces.
pub struct MergeEngine {
    members: Arc<dyn MemberStore>,
    line_friends: Arc<dyn ChannelFriendRegistry>,
    facebook_friends: Arc<dyn ChannelFriendRegistry>,
    webchat_friends: Arc<dyn ChannelFriendRegistry>,
    threads: Arc<dyn ConversationThreadStore>,
    pub(crate) messages: Arc<dyn ConversationMessageLog>,
    locks: KeyLockRegistry,
}

impl MergeEngine {
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
            locks: KeyLockRegistry::new(),
        }
    }

    pub(crate) fn registry(&self, channel: ChannelKind) -> &Arc<dyn ChannelFriendRegistry> {
        match channel {
            ChannelKind::Line => &self.line_friends,
            ChannelKind::Facebook => &self.facebook_friends,
            ChannelKind::Webchat => &self.webchat_friends,
        }
    }

    /// Resolves an inbound login to a member, creating or linking as needed.
    pub fn resolve_login(&self, login: &ChannelLogin) -> Result<LoginResolution, IdentityError> {
        let channel_uid = login.channel_uid.trim().to_string();
        if channel_uid.is_empty() {
            return Err(IdentityError::InvalidLogin);
        }
        let email = normalize_optional_text(login.email.as_deref());

        let mut keys = vec![format!("uid:{}:{}", login.channel.as_str(), channel_uid)];
        if let Some(email) = email.as_deref() {
            keys.push(format!("email:{email}"));
        }
        let handles = self.locks.handles(&keys);
        let _guards = handles
            .iter()
            .map(|handle| handle.lock().unwrap_or_else(PoisonError::into_inner))
            .collect::<Vec<_>>();

        match self.try_resolve_login(login, &channel_uid, email.as_deref()) {
            Err(IdentityError::MergeConflict) => {
                tracing::warn!(
                    channel = login.channel.as_str(),
                    channel_uid = %channel_uid,
                    "login resolution hit a write conflict; retrying once"
                );
                self.try_resolve_login(login, &channel_uid, email.as_deref())
            }
            outcome => outcome,
        }
    }

    fn try_resolve_login(
        &self,
        login: &ChannelLogin,
        channel_uid: &str,
        email: Option<&str>,
    ) -> Result<LoginResolution, IdentityError> {
        let registry = self.registry(login.channel);
        let friend = registry.find(channel_uid)?;
        let uid_member = match friend.as_ref().and_then(|friend| friend.member_id.as_deref()) {
            Some(member_id) => self.members.find(member_id)?,
            None => self.members.find_by_channel_uid(login.channel, channel_uid)?,
        };

        let (mut member, decision, is_new) = if let Some(email_value) = email {
            if let Some(email_member) = self.members.find_by_email(email_value)? {
                if let Some(uid_member) = &uid_member {
                    if uid_member.member_id != email_member.member_id {
                        tracing::warn!(
                            email_member = %email_member.member_id,
                            uid_member = %uid_member.member_id,
                            channel = login.channel.as_str(),
                            "ambiguous identity surfaced for manual reconciliation"
                        );
                        return Err(IdentityError::AmbiguousIdentity {
                            email_member_id: email_member.member_id,
                            uid_member_id: uid_member.member_id.clone(),
                        });
                    }
                }
                (email_member, MergeDecision::EmailMatch, false)
            } else if let Some(existing) = uid_member {
                (existing, MergeDecision::UidMatch, false)
            } else {
                (
                    Member::new(self.members.next_member_id()?, login.channel),
                    MergeDecision::NewMember,
                    true,
                )
            }
        } else if let Some(existing) = uid_member {
            (existing, MergeDecision::UidMatch, false)
        } else {
            (
                Member::new(self.members.next_member_id()?, login.channel),
                MergeDecision::NewMember,
                true,
            )
        };

        // Attach the inbound uid only into a vacant slot; a different uid
        // already on file stays untouched.
        if member.channel_uid(login.channel).is_none() {
            member.set_channel_uid(login.channel, channel_uid);
        }
        if member.email.is_none() {
            if let Some(email_value) = email {
                member.email = Some(email_value.to_string());
            }
        }
        member.join_sources.insert(login.channel);
        member.record_interaction(login.timestamp_ms);
        member.touch(login.timestamp_ms);
        if is_new {
            self.members.insert(&member)?;
        } else {
            self.members.update(&member)?;
        }

        registry.upsert(
            channel_uid,
            &FriendProfile {
                member_id: Some(member.member_id.clone()),
                display_name: login.display_name.clone(),
                avatar_url: login.avatar_url.clone(),
                interaction_unix_ms: Some(login.timestamp_ms),
            },
        )?;
        self.threads.upsert_thread(
            &member.member_id,
            login.channel,
            channel_uid,
            login.timestamp_ms,
        )?;

        tracing::info!(
            member_id = %member.member_id,
            channel = login.channel.as_str(),
            decision = decision.as_str(),
            "resolved channel login"
        );
        Ok(LoginResolution {
            member_id: member.member_id,
            decision,
        })
    }

    /// Collapses `source` into `target`, relinking every dependent record.
    ///
    /// Idempotent: merging an id that no longer exists into a live target is
    /// a successful no-op.
    pub fn merge_members(
        &self,
        source_member_id: &str,
        target_member_id: &str,
    ) -> Result<MergeReport, IdentityError> {
        let source_member_id = source_member_id.trim();
        let target_member_id = target_member_id.trim();
        if source_member_id == target_member_id {
            return Ok(MergeReport {
                source_member_id: source_member_id.to_string(),
                target_member_id: target_member_id.to_string(),
                relinked_friends: 0,
                repointed_threads: 0,
                already_merged: true,
            });
        }
        let handles = self.locks.handles(&[
            format!("member:{source_member_id}"),
            format!("member:{target_member_id}"),
        ]);
        let _guards = handles
            .iter()
            .map(|handle| handle.lock().unwrap_or_else(PoisonError::into_inner))
            .collect::<Vec<_>>();
        self.try_merge_members(source_member_id, target_member_id)
    }

    pub(crate) fn try_merge_members(
        &self,
        source_member_id: &str,
        target_member_id: &str,
    ) -> Result<MergeReport, IdentityError> {
        let Some(mut target) = self.members.find(target_member_id)? else {
            return Err(IdentityError::MemberNotFound(target_member_id.to_string()));
        };
        let Some(mut source) = self.members.find(source_member_id)? else {
            return Ok(MergeReport {
                source_member_id: source_member_id.to_string(),
                target_member_id: target_member_id.to_string(),
                relinked_friends: 0,
                repointed_threads: 0,
                already_merged: true,
            });
        };

        // Vacant fields fill from the source; populated target fields are
        // never overwritten.
        let source_email = source.email.take();
        if target.email.is_none() {
            target.email = source_email;
        }
        for channel in ChannelKind::ALL {
            let source_uid = source.channel_uid(channel).map(str::to_string);
            match channel {
                ChannelKind::Line => source.line_uid = None,
                ChannelKind::Facebook => source.fb_uid = None,
                ChannelKind::Webchat => source.webchat_uid = None,
            }
            if target.channel_uid(channel).is_none() {
                if let Some(uid) = source_uid {
                    target.set_channel_uid(channel, uid);
                }
            }
        }
        target.join_sources.extend(source.join_sources.iter().copied());
        let source_tags = source.tags.iter().cloned().collect::<Vec<_>>();
        merge_tags(&mut target.tags, &source_tags);
        if let Some(at) = source.last_interaction_unix_ms {
            target.record_interaction(at);
        }
        if let Some(at) = source.updated_unix_ms {
            target.touch(at);
        }

        // Free the source's unique keys before the target claims them.
        self.members.update(&source)?;
        self.members.update(&target)?;

        let mut relinked_friends = 0;
        for channel in ChannelKind::ALL {
            relinked_friends += self
                .registry(channel)
                .relink_member(source_member_id, target_member_id)?;
        }
        let repointed_threads = self
            .threads
            .repoint_member(source_member_id, target_member_id)?;
        self.members.delete(source_member_id)?;

        tracing::info!(
            source_member_id,
            target_member_id,
            relinked_friends,
            repointed_threads,
            "merged member records"
        );
        Ok(MergeReport {
            source_member_id: source_member_id.to_string(),
            target_member_id: target_member_id.to_string(),
            relinked_friends,
            repointed_threads,
            already_merged: false,
        })
    }

    /// Deferred-merge entry point: a member acquiring an email that already
    /// belongs to another live member is merged into that owner.
    pub fn register_email(
        &self,
        member_id: &str,
        email: &str,
        at_unix_ms: u64,
    ) -> Result<EmailRegistration, IdentityError> {
        let Some(email) = normalize_optional_text(Some(email)) else {
            return Err(IdentityError::Storage(anyhow::anyhow!(
                "email must not be blank"
            )));
        };
        let member_id = member_id.trim();
        let handles = self
            .locks
            .handles(&[format!("member:{member_id}"), format!("email:{email}")]);
        let _guards = handles
            .iter()
            .map(|handle| handle.lock().unwrap_or_else(PoisonError::into_inner))
            .collect::<Vec<_>>();

        match self.try_register_email(member_id, &email, at_unix_ms) {
            Err(IdentityError::MergeConflict) => {
                tracing::warn!(
                    member_id,
                    "email registration hit a write conflict; retrying once"
                );
                self.try_register_email(member_id, &email, at_unix_ms)
            }
            outcome => outcome,
        }
    }

    fn try_register_email(
        &self,
        member_id: &str,
        email: &str,
        at_unix_ms: u64,
    ) -> Result<EmailRegistration, IdentityError> {
        let Some(mut member) = self.members.find(member_id)? else {
            return Err(IdentityError::MemberNotFound(member_id.to_string()));
        };
        if member.email.as_deref() == Some(email) {
            return Ok(EmailRegistration {
                member_id: member.member_id,
                merge: None,
            });
        }
        if let Some(owner) = self.members.find_by_email(email)? {
            if owner.member_id != member.member_id {
                let report = self.try_merge_members(&member.member_id, &owner.member_id)?;
                return Ok(EmailRegistration {
                    member_id: owner.member_id,
                    merge: Some(report),
                });
            }
        }
        member.email = Some(email.to_string());
        member.touch(at_unix_ms);
        self.members.update(&member)?;
        tracing::info!(member_id = %member.member_id, "registered member email");
        Ok(EmailRegistration {
            member_id: member.member_id,
            merge: None,
        })
    }

    /// Ordinary profile-update conflict rule, distinct from identity merge:
    /// new non-blank data wins, and when both sides are non-blank the later
    /// timestamp wins. Tags merge by de-duplicated set union.
    pub fn apply_profile_update(
        &self,
        member_id: &str,
        update: &ProfileUpdate,
    ) -> Result<Member, IdentityError> {
        let member_id = member_id.trim();
        let email = normalize_optional_text(update.email.as_deref());
        let mut keys = vec![format!("member:{member_id}")];
        if let Some(email) = email.as_deref() {
            keys.push(format!("email:{email}"));
        }
        let handles = self.locks.handles(&keys);
        let _guards = handles
            .iter()
            .map(|handle| handle.lock().unwrap_or_else(PoisonError::into_inner))
            .collect::<Vec<_>>();

        match self.try_apply_profile_update(member_id, email.as_deref(), update) {
            Err(IdentityError::MergeConflict) => {
                tracing::warn!(
                    member_id,
                    "profile update hit a write conflict; retrying once"
                );
                self.try_apply_profile_update(member_id, email.as_deref(), update)
            }
            outcome => outcome,
        }
    }

    fn try_apply_profile_update(
        &self,
        member_id: &str,
        email: Option<&str>,
        update: &ProfileUpdate,
    ) -> Result<Member, IdentityError> {
        let Some(mut member) = self.members.find(member_id)? else {
            return Err(IdentityError::MemberNotFound(member_id.to_string()));
        };

        if let Some(email_value) = email {
            if member.email.as_deref() != Some(email_value) {
                if let Some(owner) = self.members.find_by_email(email_value)? {
                    self.try_merge_members(&member.member_id, &owner.member_id)?;
                    member = self.members.find(&owner.member_id)?.ok_or_else(|| {
                        IdentityError::MemberNotFound(owner.member_id.clone())
                    })?;
                } else {
                    let incoming_wins = member
                        .updated_unix_ms
                        .map(|updated| update.event_unix_ms > updated)
                        .unwrap_or(true);
                    if member.email.is_none() || incoming_wins {
                        member.email = Some(email_value.to_string());
                    }
                }
            }
        }

        merge_tags(&mut member.tags, &update.tags);
        member.touch(update.event_unix_ms);
        self.members.update(&member)?;
        Ok(member)
    }
}

fn normalize_optional_text(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| value.to_string())
}
