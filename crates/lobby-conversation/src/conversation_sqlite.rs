//! SQLite backend for threads and the message log.

use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use lobby_contract::ChannelKind;
use rusqlite::{params, Connection, OptionalExtension};

use crate::conversation_model::{
    thread_key, ConversationMessage, ConversationThread, MessageDirection,
};
use crate::conversation_store::{
    ConversationError, ConversationMessageLog, ConversationThreadStore,
};

#[derive(Debug)]
/// Public struct `SqliteConversationStore` used across Lobby components.
pub struct SqliteConversationStore {
    connection: Mutex<Connection>,
}

impl SqliteConversationStore {
    pub fn open(path: &Path) -> Result<Self> {
        let connection = open_conversation_sqlite_connection(path)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }
}

impl ConversationThreadStore for SqliteConversationStore {
    fn upsert_thread(
        &self,
        member_id: &str,
        channel: ChannelKind,
        platform_uid: &str,
        at_unix_ms: u64,
    ) -> Result<ConversationThread, ConversationError> {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let thread_id = thread_key(channel, platform_uid);
        connection
            .execute(
                r#"
                INSERT INTO conversation_threads (
                    thread_id, member_id, channel, platform_uid,
                    last_message_unix_ms, created_unix_ms
                )
                VALUES (?1, ?2, ?3, ?4, NULL, ?5)
                ON CONFLICT (thread_id) DO UPDATE SET member_id = excluded.member_id
                "#,
                params![
                    thread_id,
                    member_id,
                    channel.as_str(),
                    platform_uid.trim(),
                    at_unix_ms,
                ],
            )
            .context("failed to upsert conversation thread")?;
        let thread = query_thread(&connection, &thread_id)?
            .ok_or_else(|| anyhow!("upserted thread '{}' missing on re-read", thread_id))?;
        Ok(thread)
    }

    fn find_thread(
        &self,
        thread_id: &str,
    ) -> Result<Option<ConversationThread>, ConversationError> {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Ok(query_thread(&connection, thread_id)?)
    }

    fn find_by_member_and_channel(
        &self,
        member_id: &str,
        channel: ChannelKind,
    ) -> Result<Option<ConversationThread>, ConversationError> {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut statement = connection
            .prepare(
                r#"
                SELECT thread_id, member_id, channel, platform_uid,
                       last_message_unix_ms, created_unix_ms
                FROM conversation_threads
                WHERE member_id = ?1 AND channel = ?2
                LIMIT 1
                "#,
            )
            .map_err(|error| ConversationError::Storage(error.into()))?;
        let thread = statement
            .query_row(params![member_id, channel.as_str()], thread_from_row)
            .optional()
            .context("failed to query thread by member and channel")?;
        Ok(thread)
    }

    fn list_by_member(
        &self,
        member_id: &str,
    ) -> Result<Vec<ConversationThread>, ConversationError> {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut statement = connection
            .prepare(
                r#"
                SELECT thread_id, member_id, channel, platform_uid,
                       last_message_unix_ms, created_unix_ms
                FROM conversation_threads
                WHERE member_id = ?1
                ORDER BY thread_id ASC
                "#,
            )
            .map_err(|error| ConversationError::Storage(error.into()))?;
        let mut rows = statement
            .query(params![member_id])
            .map_err(|error| ConversationError::Storage(error.into()))?;
        let mut threads = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|error| ConversationError::Storage(error.into()))?
        {
            threads.push(thread_from_row(row).map_err(|error| {
                ConversationError::Storage(anyhow!("failed to decode thread row: {error}"))
            })?);
        }
        Ok(threads)
    }

    fn repoint_member(
        &self,
        from_member_id: &str,
        to_member_id: &str,
    ) -> Result<usize, ConversationError> {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let repointed = connection
            .execute(
                "UPDATE conversation_threads SET member_id = ?1 WHERE member_id = ?2",
                params![to_member_id, from_member_id],
            )
            .context("failed to repoint conversation threads")?;
        Ok(repointed)
    }
}

impl ConversationMessageLog for SqliteConversationStore {
    fn append_message(
        &self,
        thread_id: &str,
        content: &str,
        direction: MessageDirection,
        sent_at_unix_ms: u64,
    ) -> Result<ConversationMessage, ConversationError> {
        let mut connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let transaction = connection
            .transaction()
            .context("failed to start message append transaction")?;

        let Some(thread) = query_thread(&transaction, thread_id)? else {
            return Err(ConversationError::ThreadNotFound(thread_id.to_string()));
        };

        let message_id: u64 = transaction
            .query_row(
                "SELECT COALESCE(MAX(message_id), 0) + 1 FROM conversation_messages",
                [],
                |row| row.get(0),
            )
            .context("failed to allocate message id")?;
        transaction
            .execute(
                r#"
                INSERT INTO conversation_messages (
                    message_id, thread_id, channel, direction, content, sent_at_unix_ms
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
                params![
                    message_id,
                    thread_id,
                    thread.channel.as_str(),
                    direction.as_str(),
                    content,
                    sent_at_unix_ms,
                ],
            )
            .context("failed to append conversation message")?;
        transaction
            .execute(
                r#"
                UPDATE conversation_threads
                SET last_message_unix_ms = MAX(COALESCE(last_message_unix_ms, 0), ?1)
                WHERE thread_id = ?2
                "#,
                params![sent_at_unix_ms, thread_id],
            )
            .context("failed to advance thread last_message_at")?;
        transaction
            .commit()
            .context("failed to commit message append")?;
        tracing::debug!(
            thread_id,
            message_id,
            direction = direction.as_str(),
            "appended conversation message"
        );

        Ok(ConversationMessage {
            message_id,
            thread_id: thread_id.to_string(),
            channel: thread.channel,
            direction,
            content: content.to_string(),
            sent_at_unix_ms,
        })
    }

    fn list_by_thread(
        &self,
        thread_id: &str,
    ) -> Result<Vec<ConversationMessage>, ConversationError> {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut statement = connection
            .prepare(
                r#"
                SELECT message_id, thread_id, channel, direction, content, sent_at_unix_ms
                FROM conversation_messages
                WHERE thread_id = ?1
                ORDER BY sent_at_unix_ms ASC, message_id ASC
                "#,
            )
            .map_err(|error| ConversationError::Storage(error.into()))?;
        let mut rows = statement
            .query(params![thread_id])
            .map_err(|error| ConversationError::Storage(error.into()))?;
        let mut messages = Vec::new();
        while let Some(row) = rows
            .next()
            .map_err(|error| ConversationError::Storage(error.into()))?
        {
            let channel_raw: String = row
                .get(2)
                .map_err(|error| ConversationError::Storage(error.into()))?;
            let direction_raw: String = row
                .get(3)
                .map_err(|error| ConversationError::Storage(error.into()))?;
            messages.push(ConversationMessage {
                message_id: row
                    .get(0)
                    .map_err(|error| ConversationError::Storage(error.into()))?,
                thread_id: row
                    .get(1)
                    .map_err(|error| ConversationError::Storage(error.into()))?,
                channel: parse_channel(&channel_raw)?,
                direction: parse_direction(&direction_raw)?,
                content: row
                    .get(4)
                    .map_err(|error| ConversationError::Storage(error.into()))?,
                sent_at_unix_ms: row
                    .get(5)
                    .map_err(|error| ConversationError::Storage(error.into()))?,
            });
        }
        Ok(messages)
    }
}

fn open_conversation_sqlite_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!(
                    "failed to create conversation store directory {}",
                    parent.display()
                )
            })?;
        }
    }
    let connection = Connection::open(path)
        .with_context(|| format!("failed to open sqlite conversation store {}", path.display()))?;
    connection.busy_timeout(Duration::from_secs(5))?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        CREATE TABLE IF NOT EXISTS conversation_threads (
            thread_id TEXT PRIMARY KEY,
            member_id TEXT NOT NULL,
            channel TEXT NOT NULL,
            platform_uid TEXT NOT NULL,
            last_message_unix_ms INTEGER NULL,
            created_unix_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversation_threads_member
            ON conversation_threads(member_id);
        CREATE TABLE IF NOT EXISTS conversation_messages (
            message_id INTEGER PRIMARY KEY,
            thread_id TEXT NOT NULL,
            channel TEXT NOT NULL,
            direction TEXT NOT NULL,
            content TEXT NOT NULL,
            sent_at_unix_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversation_messages_thread
            ON conversation_messages(thread_id, sent_at_unix_ms);
        "#,
    )?;
    Ok(connection)
}

fn query_thread(
    connection: &Connection,
    thread_id: &str,
) -> Result<Option<ConversationThread>, ConversationError> {
    let mut statement = connection
        .prepare(
            r#"
            SELECT thread_id, member_id, channel, platform_uid,
                   last_message_unix_ms, created_unix_ms
            FROM conversation_threads
            WHERE thread_id = ?1
            "#,
        )
        .map_err(|error| ConversationError::Storage(error.into()))?;
    let thread = statement
        .query_row(params![thread_id], thread_from_row)
        .optional()
        .context("failed to query conversation thread")?;
    Ok(thread)
}

fn thread_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationThread> {
    let channel_raw: String = row.get(2)?;
    let channel = ChannelKind::parse(&channel_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown channel '{channel_raw}'").into(),
        )
    })?;
    Ok(ConversationThread {
        thread_id: row.get(0)?,
        member_id: row.get(1)?,
        channel,
        platform_uid: row.get(3)?,
        last_message_unix_ms: row.get(4)?,
        created_unix_ms: row.get(5)?,
    })
}

fn parse_channel(raw: &str) -> Result<ChannelKind, ConversationError> {
    ChannelKind::parse(raw)
        .ok_or_else(|| ConversationError::Storage(anyhow!("unknown channel '{raw}' in store")))
}

fn parse_direction(raw: &str) -> Result<MessageDirection, ConversationError> {
    match raw.trim() {
        "incoming" => Ok(MessageDirection::Incoming),
        "outgoing" => Ok(MessageDirection::Outgoing),
        other => Err(ConversationError::Storage(anyhow!(
            "unknown message direction '{other}' in store"
        ))),
    }
}
