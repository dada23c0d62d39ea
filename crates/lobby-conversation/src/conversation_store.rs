//! Repository interfaces and in-memory backend for threads and messages.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use lobby_contract::ChannelKind;
use thiserror::Error;

use crate::conversation_model::{
    thread_key, ConversationMessage, ConversationThread, MessageDirection,
};

#[derive(Debug, Error)]
/// Enumerates supported `ConversationError` values.
pub enum ConversationError {
    #[error("conversation thread '{0}' not found")]
    ThreadNotFound(String),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

/// Repository interface for conversation threads.
///
/// `upsert_thread` is idempotent: thread identity is a pure function of
/// `(channel, platform uid)`, so repeated logins converge on one row.
pub trait ConversationThreadStore: Send + Sync {
    fn upsert_thread(
        &self,
        member_id: &str,
        channel: ChannelKind,
        platform_uid: &str,
        at_unix_ms: u64,
    ) -> Result<ConversationThread, ConversationError>;

    fn find_thread(&self, thread_id: &str) -> Result<Option<ConversationThread>, ConversationError>;

    fn find_by_member_and_channel(
        &self,
        member_id: &str,
        channel: ChannelKind,
    ) -> Result<Option<ConversationThread>, ConversationError>;

    fn list_by_member(&self, member_id: &str) -> Result<Vec<ConversationThread>, ConversationError>;

    /// Repoints threads after a member merge; thread identity never changes.
    fn repoint_member(
        &self,
        from_member_id: &str,
        to_member_id: &str,
    ) -> Result<usize, ConversationError>;
}

/// Append-only message log, ordered by `sent_at`.
pub trait ConversationMessageLog: Send + Sync {
    fn append_message(
        &self,
        thread_id: &str,
        content: &str,
        direction: MessageDirection,
        sent_at_unix_ms: u64,
    ) -> Result<ConversationMessage, ConversationError>;

    fn list_by_thread(
        &self,
        thread_id: &str,
    ) -> Result<Vec<ConversationMessage>, ConversationError>;
}

#[derive(Debug, Default)]
struct ConversationState {
    threads: BTreeMap<String, ConversationThread>,
    messages: Vec<ConversationMessage>,
    next_message_id: u64,
}

#[derive(Debug, Default)]
/// Public struct `InMemoryConversationStore` used across Lobby components.
pub struct InMemoryConversationStore {
    state: Mutex<ConversationState>,
}

impl InMemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ConversationThreadStore for InMemoryConversationStore {
    fn upsert_thread(
        &self,
        member_id: &str,
        channel: ChannelKind,
        platform_uid: &str,
        at_unix_ms: u64,
    ) -> Result<ConversationThread, ConversationError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let thread_id = thread_key(channel, platform_uid);
        let thread = state
            .threads
            .entry(thread_id.clone())
            .or_insert_with(|| ConversationThread {
                thread_id,
                member_id: member_id.to_string(),
                channel,
                platform_uid: platform_uid.trim().to_string(),
                last_message_unix_ms: None,
                created_unix_ms: at_unix_ms,
            });
        if thread.member_id != member_id {
            thread.member_id = member_id.to_string();
        }
        Ok(thread.clone())
    }

    fn find_thread(
        &self,
        thread_id: &str,
    ) -> Result<Option<ConversationThread>, ConversationError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state.threads.get(thread_id).cloned())
    }

    fn find_by_member_and_channel(
        &self,
        member_id: &str,
        channel: ChannelKind,
    ) -> Result<Option<ConversationThread>, ConversationError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .threads
            .values()
            .find(|thread| thread.member_id == member_id && thread.channel == channel)
            .cloned())
    }

    fn list_by_member(
        &self,
        member_id: &str,
    ) -> Result<Vec<ConversationThread>, ConversationError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .threads
            .values()
            .filter(|thread| thread.member_id == member_id)
            .cloned()
            .collect())
    }

    fn repoint_member(
        &self,
        from_member_id: &str,
        to_member_id: &str,
    ) -> Result<usize, ConversationError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut repointed = 0;
        for thread in state.threads.values_mut() {
            if thread.member_id == from_member_id {
                thread.member_id = to_member_id.to_string();
                repointed += 1;
            }
        }
        Ok(repointed)
    }
}

impl ConversationMessageLog for InMemoryConversationStore {
    fn append_message(
        &self,
        thread_id: &str,
        content: &str,
        direction: MessageDirection,
        sent_at_unix_ms: u64,
    ) -> Result<ConversationMessage, ConversationError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let channel = match state.threads.get_mut(thread_id) {
            Some(thread) => {
                thread.record_message_time(sent_at_unix_ms);
                thread.channel
            }
            None => return Err(ConversationError::ThreadNotFound(thread_id.to_string())),
        };
        state.next_message_id += 1;
        let message = ConversationMessage {
            message_id: state.next_message_id,
            thread_id: thread_id.to_string(),
            channel,
            direction,
            content: content.to_string(),
            sent_at_unix_ms,
        };
        state.messages.push(message.clone());
        tracing::debug!(
            thread_id,
            message_id = message.message_id,
            direction = direction.as_str(),
            "appended conversation message"
        );
        Ok(message)
    }

    fn list_by_thread(
        &self,
        thread_id: &str,
    ) -> Result<Vec<ConversationMessage>, ConversationError> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut messages = state
            .messages
            .iter()
            .filter(|message| message.thread_id == thread_id)
            .cloned()
            .collect::<Vec<_>>();
        messages.sort_by_key(|message| (message.sent_at_unix_ms, message.message_id));
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_upsert_thread_is_idempotent() {
        let store = InMemoryConversationStore::new();
        let first = store
            .upsert_thread("M001", ChannelKind::Line, "U123", 1_000)
            .expect("upsert");
        let second = store
            .upsert_thread("M001", ChannelKind::Line, "U123", 9_000)
            .expect("upsert");
        assert_eq!(first.thread_id, second.thread_id);
        assert_eq!(second.created_unix_ms, 1_000);
        assert_eq!(
            store
                .list_by_member("M001")
                .expect("list_by_member")
                .len(),
            1
        );
    }

    #[test]
    fn unit_upsert_thread_repoints_member_without_changing_identity() {
        let store = InMemoryConversationStore::new();
        let created = store
            .upsert_thread("M003", ChannelKind::Webchat, "W555", 1_000)
            .expect("upsert");
        let repointed = store
            .upsert_thread("M001", ChannelKind::Webchat, "W555", 2_000)
            .expect("upsert");
        assert_eq!(created.thread_id, repointed.thread_id);
        assert_eq!(repointed.member_id, "M001");
    }

    #[test]
    fn unit_append_message_rejects_unknown_thread() {
        let store = InMemoryConversationStore::new();
        let error = store
            .append_message("line:ghost", "hello", MessageDirection::Incoming, 1_000)
            .expect_err("unknown thread should fail");
        assert!(matches!(error, ConversationError::ThreadNotFound(_)));
    }

    #[test]
    fn functional_list_by_thread_orders_by_sent_at_under_out_of_order_delivery() {
        let store = InMemoryConversationStore::new();
        let thread = store
            .upsert_thread("M001", ChannelKind::Facebook, "F321", 1_000)
            .expect("upsert");
        store
            .append_message(&thread.thread_id, "second", MessageDirection::Incoming, 5_000)
            .expect("append");
        store
            .append_message(&thread.thread_id, "first", MessageDirection::Incoming, 2_000)
            .expect("append");
        store
            .append_message(&thread.thread_id, "reply", MessageDirection::Outgoing, 5_000)
            .expect("append");
        let contents = store
            .list_by_thread(&thread.thread_id)
            .expect("list")
            .into_iter()
            .map(|message| message.content)
            .collect::<Vec<_>>();
        assert_eq!(contents, vec!["first", "second", "reply"]);
    }

    #[test]
    fn functional_last_message_at_is_monotonic_under_out_of_order_delivery() {
        let store = InMemoryConversationStore::new();
        let thread = store
            .upsert_thread("M001", ChannelKind::Line, "U123", 1_000)
            .expect("upsert");
        store
            .append_message(&thread.thread_id, "late", MessageDirection::Incoming, 8_000)
            .expect("append");
        store
            .append_message(&thread.thread_id, "early", MessageDirection::Incoming, 4_000)
            .expect("append");
        let thread = store
            .find_thread(&thread.thread_id)
            .expect("find")
            .expect("thread exists");
        assert_eq!(thread.last_message_unix_ms, Some(8_000));
    }

    #[test]
    fn functional_repoint_member_moves_all_threads() {
        let store = InMemoryConversationStore::new();
        store
            .upsert_thread("M003", ChannelKind::Line, "U888", 1_000)
            .expect("upsert");
        store
            .upsert_thread("M003", ChannelKind::Webchat, "W1", 1_000)
            .expect("upsert");
        store
            .upsert_thread("M007", ChannelKind::Facebook, "F9", 1_000)
            .expect("upsert");
        let repointed = store.repoint_member("M003", "M001").expect("repoint");
        assert_eq!(repointed, 2);
        assert_eq!(store.list_by_member("M001").expect("list").len(), 2);
        assert_eq!(store.list_by_member("M007").expect("list").len(), 1);
    }
}
