// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable chat message log.
//!
//! SQLite-backed. A single connection behind a mutex gives the
//! single-writer-many-readers discipline; every query sees a consistent
//! snapshot. Delivery status only ever advances along
//! `pending → delivered → read`; regressions are rejected silently.

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

use crate::bus::epoch_ms;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("invalid message: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Agent,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Agent => "agent",
            Self::System => "system",
        }
    }

    fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "user" => Ok(Self::User),
            "agent" => Ok(Self::Agent),
            "system" => Ok(Self::System),
            other => Err(StoreError::Invalid(format!("unknown role: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Delivered,
    Read,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Delivered => "delivered",
            Self::Read => "read",
        }
    }

    fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "delivered" => Ok(Self::Delivered),
            "read" => Ok(Self::Read),
            other => Err(StoreError::Invalid(format!("unknown delivery status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub recipient: Option<String>,
    pub role: Role,
    pub body: String,
    pub metadata: Option<Value>,
    pub delivery_status: DeliveryStatus,
    pub event_type: Option<String>,
    pub thread_id: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Fields for inserting a message; server-assigned fields default.
#[derive(Debug, Clone, Default)]
pub struct MessageInput {
    pub id: Option<String>,
    pub session_id: Option<String>,
    pub agent_id: Option<String>,
    pub recipient: Option<String>,
    pub role: Role,
    pub body: String,
    pub metadata: Option<Value>,
    pub delivery_status: Option<DeliveryStatus>,
    pub event_type: Option<String>,
    pub thread_id: Option<String>,
}

impl Default for Role {
    fn default() -> Self {
        Self::User
    }
}

/// Filters for [`MessageStore::get_messages`] and search.
#[derive(Debug, Clone, Default)]
pub struct MessageQuery {
    pub agent_id: Option<String>,
    pub thread_id: Option<String>,
    pub role: Option<Role>,
    pub limit: Option<usize>,
    /// Only messages created strictly before this epoch-ms timestamp.
    pub before: Option<u64>,
    /// Only messages created strictly after this epoch-ms timestamp.
    pub after: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnreadCount {
    pub agent_id: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub message_count: u64,
    pub last_message_at: u64,
    pub participants: Vec<String>,
}

const DEFAULT_LIMIT: usize = 100;
const MAX_LIMIT: usize = 1000;

pub struct MessageStore {
    conn: Mutex<Connection>,
}

impl MessageStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn: Mutex::new(conn) };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                session_id TEXT,
                agent_id TEXT,
                recipient TEXT,
                role TEXT NOT NULL,
                body TEXT NOT NULL,
                metadata TEXT,
                delivery_status TEXT NOT NULL DEFAULT 'delivered',
                event_type TEXT,
                thread_id TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_messages_agent ON messages(agent_id);
            CREATE INDEX IF NOT EXISTS idx_messages_thread ON messages(thread_id);
            CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at DESC);
            CREATE INDEX IF NOT EXISTS idx_messages_status ON messages(delivery_status);
            "#,
        )?;
        Ok(())
    }

    /// Insert a message, generating the id and stamping timestamps.
    /// Never overwrites an existing row.
    pub fn insert_message(&self, input: MessageInput) -> Result<Message, StoreError> {
        let now = epoch_ms();
        let message = Message {
            id: input.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            session_id: input.session_id,
            agent_id: input.agent_id,
            recipient: input.recipient,
            role: input.role,
            body: input.body,
            metadata: input.metadata,
            delivery_status: input.delivery_status.unwrap_or(DeliveryStatus::Delivered),
            event_type: input.event_type,
            thread_id: input.thread_id,
            created_at: now,
            updated_at: now,
        };

        let metadata = match message.metadata {
            Some(ref value) => Some(serde_json::to_string(value).map_err(|e| {
                StoreError::Invalid(format!("unserializable metadata: {e}"))
            })?),
            None => None,
        };

        self.conn.lock().execute(
            r#"
            INSERT INTO messages
                (id, session_id, agent_id, recipient, role, body, metadata,
                 delivery_status, event_type, thread_id, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
            params![
                message.id,
                message.session_id,
                message.agent_id,
                message.recipient,
                message.role.as_str(),
                message.body,
                metadata,
                message.delivery_status.as_str(),
                message.event_type,
                message.thread_id,
                message.created_at as i64,
                message.updated_at as i64,
            ],
        )?;
        Ok(message)
    }

    pub fn get_message(&self, id: &str) -> Result<Option<Message>, StoreError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row("SELECT * FROM messages WHERE id = ?1", params![id], row_to_message)
            .optional()?;
        row.transpose()
    }

    /// List messages matching the filters, newest first (`created_at`
    /// descending, then id). Limit defaults to 100, capped at 1000.
    pub fn get_messages(&self, query: &MessageQuery) -> Result<Vec<Message>, StoreError> {
        self.query_messages(query, None)
    }

    /// Substring search over message bodies, with the same filters.
    pub fn search_messages(
        &self,
        text: &str,
        query: &MessageQuery,
    ) -> Result<Vec<Message>, StoreError> {
        self.query_messages(query, Some(text))
    }

    fn query_messages(
        &self,
        query: &MessageQuery,
        body_search: Option<&str>,
    ) -> Result<Vec<Message>, StoreError> {
        let mut sql = String::from("SELECT * FROM messages WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref agent_id) = query.agent_id {
            sql.push_str(" AND (agent_id = ? OR recipient = ?)");
            args.push(Box::new(agent_id.clone()));
            args.push(Box::new(agent_id.clone()));
        }
        if let Some(ref thread_id) = query.thread_id {
            sql.push_str(" AND thread_id = ?");
            args.push(Box::new(thread_id.clone()));
        }
        if let Some(role) = query.role {
            sql.push_str(" AND role = ?");
            args.push(Box::new(role.as_str().to_owned()));
        }
        if let Some(before) = query.before {
            sql.push_str(" AND created_at < ?");
            args.push(Box::new(before as i64));
        }
        if let Some(after) = query.after {
            sql.push_str(" AND created_at > ?");
            args.push(Box::new(after as i64));
        }
        if let Some(text) = body_search {
            sql.push_str(" AND body LIKE '%' || ? || '%'");
            args.push(Box::new(text.to_owned()));
        }

        let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
        sql.push_str(" ORDER BY created_at DESC, id DESC LIMIT ?");
        args.push(Box::new(limit as i64));

        let refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(AsRef::as_ref).collect();
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(&refs[..], row_to_message)?;
        let mut messages = Vec::new();
        for row in rows {
            messages.push(row??);
        }
        Ok(messages)
    }

    /// Advance one message to `read`. Allowed from `pending` or
    /// `delivered`; a message already `read` is left untouched. Returns
    /// whether a row changed.
    pub fn mark_read(&self, id: &str) -> Result<bool, StoreError> {
        let changed = self.conn.lock().execute(
            r#"
            UPDATE messages SET delivery_status = 'read', updated_at = ?1
            WHERE id = ?2 AND delivery_status IN ('pending', 'delivered')
            "#,
            params![epoch_ms() as i64, id],
        )?;
        Ok(changed > 0)
    }

    /// Mark all unread messages for an agent and/or session as read.
    pub fn mark_all_read(
        &self,
        agent_id: Option<&str>,
        session_id: Option<&str>,
    ) -> Result<usize, StoreError> {
        let mut sql = String::from(
            "UPDATE messages SET delivery_status = 'read', updated_at = ? \
             WHERE delivery_status IN ('pending', 'delivered')",
        );
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(epoch_ms() as i64)];
        if let Some(agent_id) = agent_id {
            sql.push_str(" AND (agent_id = ? OR recipient = ?)");
            args.push(Box::new(agent_id.to_owned()));
            args.push(Box::new(agent_id.to_owned()));
        }
        if let Some(session_id) = session_id {
            sql.push_str(" AND session_id = ?");
            args.push(Box::new(session_id.to_owned()));
        }
        let refs: Vec<&dyn rusqlite::ToSql> = args.iter().map(AsRef::as_ref).collect();
        let changed = self.conn.lock().execute(&sql, &refs[..])?;
        Ok(changed)
    }

    /// Unread (non-`read`) message counts per addressed agent.
    pub fn get_unread_counts(&self) -> Result<Vec<UnreadCount>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT recipient, COUNT(*) FROM messages
            WHERE delivery_status != 'read' AND recipient IS NOT NULL
            GROUP BY recipient ORDER BY recipient
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(UnreadCount { agent_id: row.get(0)?, count: row.get::<_, i64>(1)? as u64 })
        })?;
        let mut counts = Vec::new();
        for row in rows {
            counts.push(row?);
        }
        Ok(counts)
    }

    /// Thread summaries, optionally restricted to one participant.
    pub fn get_threads(&self, agent_id: Option<&str>) -> Result<Vec<ThreadSummary>, StoreError> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            r#"
            SELECT thread_id, agent_id, recipient, created_at FROM messages
            WHERE thread_id IS NOT NULL ORDER BY created_at ASC
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
                row.get::<_, i64>(3)? as u64,
            ))
        })?;

        let mut threads: Vec<ThreadSummary> = Vec::new();
        for row in rows {
            let (thread_id, agent, recipient, created_at) = row?;
            let entry = match threads.iter_mut().find(|t| t.thread_id == thread_id) {
                Some(entry) => entry,
                None => {
                    threads.push(ThreadSummary {
                        thread_id,
                        message_count: 0,
                        last_message_at: 0,
                        participants: Vec::new(),
                    });
                    match threads.last_mut() {
                        Some(entry) => entry,
                        None => continue,
                    }
                }
            };
            entry.message_count += 1;
            entry.last_message_at = entry.last_message_at.max(created_at);
            for participant in [agent, recipient].into_iter().flatten() {
                if !entry.participants.contains(&participant) {
                    entry.participants.push(participant);
                }
            }
        }

        if let Some(agent_id) = agent_id {
            threads.retain(|t| t.participants.iter().any(|p| p == agent_id));
        }
        threads.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(threads)
    }
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Result<Message, StoreError>> {
    let role: String = row.get("role")?;
    let status: String = row.get("delivery_status")?;
    let metadata: Option<String> = row.get("metadata")?;

    Ok((|| {
        Ok(Message {
            id: row.get("id").map_err(StoreError::Sqlite)?,
            session_id: row.get("session_id").map_err(StoreError::Sqlite)?,
            agent_id: row.get("agent_id").map_err(StoreError::Sqlite)?,
            recipient: row.get("recipient").map_err(StoreError::Sqlite)?,
            role: Role::parse(&role)?,
            body: row.get("body").map_err(StoreError::Sqlite)?,
            metadata: match metadata {
                Some(ref raw) => Some(
                    serde_json::from_str(raw)
                        .map_err(|e| StoreError::Invalid(format!("bad metadata: {e}")))?,
                ),
                None => None,
            },
            delivery_status: DeliveryStatus::parse(&status)?,
            event_type: row.get("event_type").map_err(StoreError::Sqlite)?,
            thread_id: row.get("thread_id").map_err(StoreError::Sqlite)?,
            created_at: row.get::<_, i64>("created_at").map_err(StoreError::Sqlite)? as u64,
            updated_at: row.get::<_, i64>("updated_at").map_err(StoreError::Sqlite)? as u64,
        })
    })())
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
