//! SQLite backend for channel friend records.

use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use lobby_contract::ChannelKind;
use rusqlite::{params, Connection, OptionalExtension};

use crate::channel_friend::{ChannelFriend, FriendProfile};
use crate::channel_friend_registry::ChannelFriendRegistry;

#[derive(Debug)]
/// Public struct `SqliteChannelFriendRegistry` used across Lobby components.
pub struct SqliteChannelFriendRegistry {
    channel: ChannelKind,
    connection: Mutex<Connection>,
}

impl SqliteChannelFriendRegistry {
    pub fn open(channel: ChannelKind, path: &Path) -> Result<Self> {
        let connection = open_friend_sqlite_connection(path)?;
        Ok(Self {
            channel,
            connection: Mutex::new(connection),
        })
    }

    fn with_friend(
        &self,
        channel_uid: &str,
        apply: impl FnOnce(&mut ChannelFriend),
    ) -> Result<ChannelFriend> {
        let channel_uid = channel_uid.trim();
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut friend = query_friend(&connection, self.channel, channel_uid)?
            .unwrap_or_else(|| ChannelFriend::new(self.channel, channel_uid));
        apply(&mut friend);
        write_friend(&connection, &friend)?;
        Ok(friend)
    }
}

impl ChannelFriendRegistry for SqliteChannelFriendRegistry {
    fn channel(&self) -> ChannelKind {
        self.channel
    }

    fn find(&self, channel_uid: &str) -> Result<Option<ChannelFriend>> {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        query_friend(&connection, self.channel, channel_uid.trim())
    }

    fn find_by_member(&self, member_id: &str) -> Result<Option<ChannelFriend>> {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut statement = connection.prepare(
            r#"
            SELECT channel_uid, member_id, display_name, avatar_url, is_following,
                   followed_at_unix_ms, unfollowed_at_unix_ms, last_interaction_unix_ms
            FROM channel_friends
            WHERE channel = ?1 AND member_id = ?2
            ORDER BY channel_uid ASC
            LIMIT 1
            "#,
        )?;
        let friend = statement
            .query_row(params![self.channel.as_str(), member_id], |row| {
                friend_from_row(self.channel, row)
            })
            .optional()
            .context("failed to query channel friend by member")?;
        Ok(friend)
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
            friend.apply_follow_transition(following, at_unix_ms);
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
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let relinked = connection
            .execute(
                r#"
                UPDATE channel_friends
                SET member_id = ?1
                WHERE channel = ?2 AND member_id = ?3
                "#,
                params![to_member_id, self.channel.as_str(), from_member_id],
            )
            .context("failed to relink channel friends")?;
        Ok(relinked)
    }
}

fn open_friend_sqlite_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create friend store directory {}", parent.display())
            })?;
        }
    }
    let connection = Connection::open(path)
        .with_context(|| format!("failed to open sqlite friend store {}", path.display()))?;
    connection.busy_timeout(Duration::from_secs(5))?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        CREATE TABLE IF NOT EXISTS channel_friends (
            channel TEXT NOT NULL,
            channel_uid TEXT NOT NULL,
            member_id TEXT NULL,
            display_name TEXT NULL,
            avatar_url TEXT NULL,
            is_following INTEGER NOT NULL,
            followed_at_unix_ms INTEGER NULL,
            unfollowed_at_unix_ms INTEGER NULL,
            last_interaction_unix_ms INTEGER NULL,
            PRIMARY KEY (channel, channel_uid)
        );
        CREATE INDEX IF NOT EXISTS idx_channel_friends_member
            ON channel_friends(channel, member_id);
        "#,
    )?;
    Ok(connection)
}

fn query_friend(
    connection: &Connection,
    channel: ChannelKind,
    channel_uid: &str,
) -> Result<Option<ChannelFriend>> {
    let mut statement = connection.prepare(
        r#"
        SELECT channel_uid, member_id, display_name, avatar_url, is_following,
               followed_at_unix_ms, unfollowed_at_unix_ms, last_interaction_unix_ms
        FROM channel_friends
        WHERE channel = ?1 AND channel_uid = ?2
        "#,
    )?;
    let friend = statement
        .query_row(params![channel.as_str(), channel_uid], |row| {
            friend_from_row(channel, row)
        })
        .optional()
        .context("failed to query channel friend")?;
    Ok(friend)
}

fn friend_from_row(
    channel: ChannelKind,
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<ChannelFriend> {
    Ok(ChannelFriend {
        channel,
        channel_uid: row.get(0)?,
        member_id: row.get(1)?,
        display_name: row.get(2)?,
        avatar_url: row.get(3)?,
        is_following: row.get(4)?,
        followed_at_unix_ms: row.get(5)?,
        unfollowed_at_unix_ms: row.get(6)?,
        last_interaction_unix_ms: row.get(7)?,
    })
}

fn write_friend(connection: &Connection, friend: &ChannelFriend) -> Result<()> {
    connection
        .execute(
            r#"
            INSERT INTO channel_friends (
                channel, channel_uid, member_id, display_name, avatar_url,
                is_following, followed_at_unix_ms, unfollowed_at_unix_ms,
                last_interaction_unix_ms
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT (channel, channel_uid) DO UPDATE SET
                member_id = excluded.member_id,
                display_name = excluded.display_name,
                avatar_url = excluded.avatar_url,
                is_following = excluded.is_following,
                followed_at_unix_ms = excluded.followed_at_unix_ms,
                unfollowed_at_unix_ms = excluded.unfollowed_at_unix_ms,
                last_interaction_unix_ms = excluded.last_interaction_unix_ms
            "#,
            params![
                friend.channel.as_str(),
                friend.channel_uid,
                friend.member_id,
                friend.display_name,
                friend.avatar_url,
                friend.is_following,
                friend.followed_at_unix_ms,
                friend.unfollowed_at_unix_ms,
                friend.last_interaction_unix_ms,
            ],
        )
        .context("failed to write channel friend")?;
    Ok(())
}
