//! SQLite session backend.
//!
//! Default persistence for single-process deployments; sessions survive
//! restart. History is stored one row per turn with the content as JSON;
//! `delete` cascades across all three tables in a single transaction.

use async_trait::async_trait;
use marmot_core::session::{SessionBackend, SessionMeta, StoreError};
use marmot_core::types::{Message, MessageContent, Role, UsageInfo};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Session backend backed by a SQLite database file.
pub struct SqliteSessionBackend {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionBackend {
    /// Open (or create) the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(sql_err)?;
        Self::with_connection(conn)
    }

    /// An in-memory database, for tests.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                 session_id TEXT PRIMARY KEY,
                 created_at INTEGER NOT NULL,
                 updated_at INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS messages (
                 session_id TEXT NOT NULL,
                 turn_index INTEGER NOT NULL,
                 role TEXT NOT NULL,
                 content_json TEXT NOT NULL,
                 PRIMARY KEY (session_id, turn_index)
             );
             CREATE TABLE IF NOT EXISTS usage (
                 session_id TEXT PRIMARY KEY,
                 input INTEGER NOT NULL,
                 output INTEGER NOT NULL,
                 cache_creation INTEGER NOT NULL,
                 cache_read INTEGER NOT NULL,
                 updated_at INTEGER NOT NULL
             );",
        )
        .map_err(sql_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn sql_err(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn millis_to_time(millis: i64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(millis.max(0) as u64)
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

fn parse_role(raw: &str) -> Result<Role, StoreError> {
    match raw {
        "user" => Ok(Role::User),
        "assistant" => Ok(Role::Assistant),
        other => Err(StoreError::Serialization(format!("unknown role: {other}"))),
    }
}

#[async_trait]
impl SessionBackend for SqliteSessionBackend {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT role, content_json FROM messages
                 WHERE session_id = ?1 ORDER BY turn_index",
            )
            .map_err(sql_err)?;

        let rows = stmt
            .query_map(params![session_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })
            .map_err(sql_err)?;

        let mut messages = Vec::new();
        for row in rows {
            let (role, content_json) = row.map_err(sql_err)?;
            let content: MessageContent = serde_json::from_str(&content_json)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            messages.push(Message {
                role: parse_role(&role)?,
                content,
            });
        }
        Ok(messages)
    }

    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(sql_err)?;
        let now = now_millis();

        tx.execute(
            "INSERT INTO sessions (session_id, created_at, updated_at)
             VALUES (?1, ?2, ?2)
             ON CONFLICT(session_id) DO UPDATE SET updated_at = ?2",
            params![session_id, now],
        )
        .map_err(sql_err)?;

        tx.execute(
            "DELETE FROM messages WHERE session_id = ?1",
            params![session_id],
        )
        .map_err(sql_err)?;

        for (turn_index, message) in messages.iter().enumerate() {
            let content_json = serde_json::to_string(&message.content)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            tx.execute(
                "INSERT INTO messages (session_id, turn_index, role, content_json)
                 VALUES (?1, ?2, ?3, ?4)",
                params![session_id, turn_index as i64, role_str(message.role), content_json],
            )
            .map_err(sql_err)?;
        }

        tx.commit().map_err(sql_err)?;
        tracing::debug!(session_id, messages = messages.len(), "session saved");
        Ok(())
    }

    async fn reset(&self, session_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(sql_err)?;
        tx.execute(
            "DELETE FROM messages WHERE session_id = ?1",
            params![session_id],
        )
        .map_err(sql_err)?;
        tx.execute(
            "DELETE FROM sessions WHERE session_id = ?1",
            params![session_id],
        )
        .map_err(sql_err)?;
        tx.commit().map_err(sql_err)
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, StoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT s.session_id, s.created_at, s.updated_at, COUNT(m.turn_index)
                 FROM sessions s
                 LEFT JOIN messages m ON m.session_id = s.session_id
                 GROUP BY s.session_id
                 ORDER BY s.updated_at DESC",
            )
            .map_err(sql_err)?;

        let rows = stmt
            .query_map([], |row| {
                Ok(SessionMeta {
                    id: row.get(0)?,
                    created_at: millis_to_time(row.get(1)?),
                    updated_at: millis_to_time(row.get(2)?),
                    message_count: row.get::<_, i64>(3)? as usize,
                })
            })
            .map_err(sql_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(sql_err)?;
        tx.execute(
            "DELETE FROM messages WHERE session_id = ?1",
            params![session_id],
        )
        .map_err(sql_err)?;
        tx.execute(
            "DELETE FROM usage WHERE session_id = ?1",
            params![session_id],
        )
        .map_err(sql_err)?;
        tx.execute(
            "DELETE FROM sessions WHERE session_id = ?1",
            params![session_id],
        )
        .map_err(sql_err)?;
        tx.commit().map_err(sql_err)
    }

    async fn load_usage(&self, session_id: &str) -> Result<UsageInfo, StoreError> {
        let conn = self.conn.lock().unwrap();
        let usage = conn
            .query_row(
                "SELECT input, output, cache_creation, cache_read
                 FROM usage WHERE session_id = ?1",
                params![session_id],
                |row| {
                    Ok(UsageInfo {
                        input_tokens: row.get::<_, i64>(0)? as u64,
                        output_tokens: row.get::<_, i64>(1)? as u64,
                        cache_creation_input_tokens: row.get::<_, i64>(2)? as u64,
                        cache_read_input_tokens: row.get::<_, i64>(3)? as u64,
                    })
                },
            )
            .optional()
            .map_err(sql_err)?;
        Ok(usage.unwrap_or_default())
    }

    async fn save_usage(&self, session_id: &str, usage: &UsageInfo) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO usage (session_id, input, output, cache_creation, cache_read, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(session_id) DO UPDATE SET
                 input = ?2, output = ?3, cache_creation = ?4, cache_read = ?5, updated_at = ?6",
            params![
                session_id,
                usage.input_tokens as i64,
                usage.output_tokens as i64,
                usage.cache_creation_input_tokens as i64,
                usage.cache_read_input_tokens as i64,
                now_millis(),
            ],
        )
        .map_err(sql_err)?;
        Ok(())
    }

    async fn reset_usage(&self, session_id: &str) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "DELETE FROM usage WHERE session_id = ?1",
            params![session_id],
        )
        .map_err(sql_err)?;
        Ok(())
    }
}
