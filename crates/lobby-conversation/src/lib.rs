//! Conversation threads and the append-only message log.
//!
//! One thread exists per `(channel, platform uid)` at all times; a member
//! merge only repoints the thread's member pointer, never its identity.

mod conversation_model;
mod conversation_sqlite;
mod conversation_store;

pub use conversation_model::{
    thread_key, ConversationMessage, ConversationThread, MessageDirection,
};
pub use conversation_sqlite::SqliteConversationStore;
pub use conversation_store::{
    ConversationError, ConversationMessageLog, ConversationThreadStore, InMemoryConversationStore,
};
