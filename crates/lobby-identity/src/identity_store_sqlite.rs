//! SQLite backend for the member store.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use lobby_contract::ChannelKind;
use rusqlite::{params, Connection, OptionalExtension};

use crate::identity_model::Member;
use crate::identity_store::{MemberStore, MemberStoreError};

#[derive(Debug)]
/// Public struct `SqliteMemberStore` used across Lobby components.
pub struct SqliteMemberStore {
    connection: Mutex<Connection>,
}

impl SqliteMemberStore {
    pub fn open(path: &Path) -> Result<Self> {
        let connection = open_member_sqlite_connection(path)?;
        Ok(Self {
            connection: Mutex::new(connection),
        })
    }

    fn write_member(&self, member: &Member, replace: bool) -> Result<(), MemberStoreError> {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let join_sources_json = serde_json::to_string(&member.join_sources)
            .context("failed to encode member join sources")
            .map_err(MemberStoreError::Backend)?;
        let tags_json = serde_json::to_string(&member.tags)
            .context("failed to encode member tags")
            .map_err(MemberStoreError::Backend)?;
        let sql = if replace {
            r#"
            UPDATE members
            SET email = ?2, line_uid = ?3, fb_uid = ?4, webchat_uid = ?5,
                join_sources_json = ?6, tags_json = ?7,
                last_interaction_unix_ms = ?8, updated_unix_ms = ?9
            WHERE member_id = ?1
            "#
        } else {
            r#"
            INSERT INTO members (
                member_id, email, line_uid, fb_uid, webchat_uid,
                join_sources_json, tags_json, last_interaction_unix_ms, updated_unix_ms
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#
        };
        let outcome = connection.execute(
            sql,
            params![
                member.member_id,
                member.email,
                member.line_uid,
                member.fb_uid,
                member.webchat_uid,
                join_sources_json,
                tags_json,
                member.last_interaction_unix_ms,
                member.updated_unix_ms,
            ],
        );
        match outcome {
            Ok(0) if replace => Err(MemberStoreError::Backend(anyhow::anyhow!(
                "member '{}' does not exist",
                member.member_id
            ))),
            Ok(_) => Ok(()),
            Err(error) => Err(classify_sqlite_error(error)),
        }
    }
}

impl MemberStore for SqliteMemberStore {
    fn next_member_id(&self) -> Result<String, MemberStoreError> {
        let mut connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let transaction = connection
            .transaction()
            .context("failed to start member id transaction")
            .map_err(MemberStoreError::Backend)?;
        let current: u64 = transaction
            .query_row("SELECT value FROM member_id_seq", [], |row| row.get(0))
            .context("failed to read member id sequence")
            .map_err(MemberStoreError::Backend)?;
        let next = current + 1;
        transaction
            .execute("UPDATE member_id_seq SET value = ?1", params![next])
            .context("failed to advance member id sequence")
            .map_err(MemberStoreError::Backend)?;
        transaction
            .commit()
            .context("failed to commit member id sequence")
            .map_err(MemberStoreError::Backend)?;
        Ok(format!("M{:03}", next))
    }

    fn insert(&self, member: &Member) -> Result<(), MemberStoreError> {
        self.write_member(member, false)
    }

    fn update(&self, member: &Member) -> Result<(), MemberStoreError> {
        self.write_member(member, true)
    }

    fn delete(&self, member_id: &str) -> Result<bool, MemberStoreError> {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let removed = connection
            .execute("DELETE FROM members WHERE member_id = ?1", params![member_id])
            .context("failed to delete member")
            .map_err(MemberStoreError::Backend)?;
        Ok(removed > 0)
    }

    fn find(&self, member_id: &str) -> Result<Option<Member>, MemberStoreError> {
        self.query_one("member_id = ?1", member_id)
    }

    fn find_by_email(&self, email: &str) -> Result<Option<Member>, MemberStoreError> {
        self.query_one("email = ?1", email)
    }

    fn find_by_channel_uid(
        &self,
        channel: ChannelKind,
        uid: &str,
    ) -> Result<Option<Member>, MemberStoreError> {
        let filter = match channel {
            ChannelKind::Line => "line_uid = ?1",
            ChannelKind::Facebook => "fb_uid = ?1",
            ChannelKind::Webchat => "webchat_uid = ?1",
        };
        self.query_one(filter, uid)
    }

    fn list(&self) -> Result<Vec<Member>, MemberStoreError> {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut statement = connection
            .prepare(&format!("{MEMBER_SELECT} ORDER BY member_id ASC"))
            .context("failed to prepare member list query")
            .map_err(MemberStoreError::Backend)?;
        let mut rows = statement
            .query([])
            .context("failed to list members")
            .map_err(MemberStoreError::Backend)?;
        let mut members = Vec::new();
        while let Some(row) = rows
            .next()
            .context("failed to read member row")
            .map_err(MemberStoreError::Backend)?
        {
            members.push(member_from_row(row)?);
        }
        Ok(members)
    }
}

impl SqliteMemberStore {
    fn query_one(&self, filter: &str, value: &str) -> Result<Option<Member>, MemberStoreError> {
        let connection = self
            .connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut statement = connection
            .prepare(&format!("{MEMBER_SELECT} WHERE {filter}"))
            .context("failed to prepare member query")
            .map_err(MemberStoreError::Backend)?;
        let row = statement
            .query_row(params![value], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, Option<String>>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<u64>>(7)?,
                    row.get::<_, Option<u64>>(8)?,
                ))
            })
            .optional()
            .context("failed to query member")
            .map_err(MemberStoreError::Backend)?;
        match row {
            Some(raw) => Ok(Some(member_from_parts(raw)?)),
            None => Ok(None),
        }
    }
}

const MEMBER_SELECT: &str = r#"
SELECT member_id, email, line_uid, fb_uid, webchat_uid,
       join_sources_json, tags_json, last_interaction_unix_ms, updated_unix_ms
FROM members
"#;

type MemberRowParts = (
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
    Option<u64>,
    Option<u64>,
);

fn member_from_row(row: &rusqlite::Row<'_>) -> Result<Member, MemberStoreError> {
    let parts: MemberRowParts = (|| -> rusqlite::Result<MemberRowParts> {
        Ok((
            row.get(0)?,
            row.get(1)?,
            row.get(2)?,
            row.get(3)?,
            row.get(4)?,
            row.get(5)?,
            row.get(6)?,
            row.get(7)?,
            row.get(8)?,
        ))
    })()
    .context("failed to decode member row")
    .map_err(MemberStoreError::Backend)?;
    member_from_parts(parts)
}

fn member_from_parts(parts: MemberRowParts) -> Result<Member, MemberStoreError> {
    let (
        member_id,
        email,
        line_uid,
        fb_uid,
        webchat_uid,
        join_sources_json,
        tags_json,
        last_interaction_unix_ms,
        updated_unix_ms,
    ) = parts;
    let join_sources: BTreeSet<ChannelKind> = serde_json::from_str(&join_sources_json)
        .with_context(|| format!("failed to decode join sources for member {member_id}"))
        .map_err(MemberStoreError::Backend)?;
    let tags: BTreeSet<String> = serde_json::from_str(&tags_json)
        .with_context(|| format!("failed to decode tags for member {member_id}"))
        .map_err(MemberStoreError::Backend)?;
    Ok(Member {
        member_id,
        email,
        line_uid,
        fb_uid,
        webchat_uid,
        join_sources,
        tags,
        last_interaction_unix_ms,
        updated_unix_ms,
    })
}

fn classify_sqlite_error(error: rusqlite::Error) -> MemberStoreError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &error {
        if failure.code == rusqlite::ErrorCode::ConstraintViolation {
            let field = message
                .as_deref()
                .map(|text| {
                    if text.contains("members.email") {
                        "email"
                    } else if text.contains("members.line_uid") {
                        "line_uid"
                    } else if text.contains("members.fb_uid") {
                        "fb_uid"
                    } else if text.contains("members.webchat_uid") {
                        "webchat_uid"
                    } else {
                        "member_id"
                    }
                })
                .unwrap_or("member_id");
            return MemberStoreError::UniqueViolation { field };
        }
    }
    MemberStoreError::Backend(anyhow::Error::new(error).context("failed to write member"))
}

fn open_member_sqlite_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create member store directory {}", parent.display())
            })?;
        }
    }
    let connection = Connection::open(path)
        .with_context(|| format!("failed to open sqlite member store {}", path.display()))?;
    connection.busy_timeout(Duration::from_secs(5))?;
    connection.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        CREATE TABLE IF NOT EXISTS members (
            member_id TEXT PRIMARY KEY,
            email TEXT NULL UNIQUE,
            line_uid TEXT NULL UNIQUE,
            fb_uid TEXT NULL UNIQUE,
            webchat_uid TEXT NULL UNIQUE,
            join_sources_json TEXT NOT NULL,
            tags_json TEXT NOT NULL,
            last_interaction_unix_ms INTEGER NULL,
            updated_unix_ms INTEGER NULL
        );
        CREATE TABLE IF NOT EXISTS member_id_seq (value INTEGER NOT NULL);
        INSERT INTO member_id_seq (value)
            SELECT 0 WHERE NOT EXISTS (SELECT 1 FROM member_id_seq);
        "#,
    )?;
    Ok(connection)
}
