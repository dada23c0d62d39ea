//! Canonical member identity: resolution, merging, and the member store.
//!
//! The merge engine is the only component allowed to create or delete member
//! rows. Channel registries and conversation stores are injected so the
//! decision logic stays independent of any storage concretion.

mod identity_errors;
mod identity_ingest;
mod identity_locking;
mod identity_merge;
mod identity_model;
mod identity_store;
mod identity_store_sqlite;

pub use identity_errors::IdentityError;
pub use identity_ingest::IngestOutcome;
pub use identity_merge::{
    ChannelLogin, EmailRegistration, LoginResolution, MergeEngine, MergeReport,
};
pub use identity_model::{merge_tags, Member, MergeDecision, ProfileUpdate};
pub use identity_store::{InMemoryMemberStore, MemberStore, MemberStoreError};
pub use identity_store_sqlite::SqliteMemberStore;
