//! Typed identity error taxonomy surfaced to callers.

use lobby_conversation::ConversationError;
use thiserror::Error;

use crate::identity_store::MemberStoreError;

#[derive(Debug, Error)]
/// Enumerates supported `IdentityError` values.
///
/// Every variant is a case callers must handle: invalid input is rejected
/// before any mutation, ambiguity is surfaced to a human reconciliation flow,
/// and write races become `MergeConflict` after one internal retry.
pub enum IdentityError {
    #[error("login rejected: channel_uid is required")]
    InvalidLogin,
    #[error(
        "ambiguous identity: email resolves to member '{email_member_id}' but the channel uid is linked to member '{uid_member_id}'"
    )]
    AmbiguousIdentity {
        email_member_id: String,
        uid_member_id: String,
    },
    #[error("concurrent identity mutation detected")]
    MergeConflict,
    #[error("member '{0}' not found")]
    MemberNotFound(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl From<MemberStoreError> for IdentityError {
    fn from(error: MemberStoreError) -> Self {
        match error {
            MemberStoreError::UniqueViolation { .. } => Self::MergeConflict,
            MemberStoreError::Backend(inner) => Self::Storage(inner),
        }
    }
}

impl From<ConversationError> for IdentityError {
    fn from(error: ConversationError) -> Self {
        match error {
            ConversationError::ThreadNotFound(thread_id) => Self::Storage(anyhow::anyhow!(
                "conversation thread '{thread_id}' vanished mid-operation"
            )),
            ConversationError::Storage(inner) => Self::Storage(inner),
        }
    }
}
