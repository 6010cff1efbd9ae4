//! SQLite event store.
//!
//! Durable backend for resumable streams. Sequence numbers are allocated
//! inside a transaction so appends stay monotonic under concurrent writers
//! to different streams, and a completed stream rejects further appends: a
//! reader that has observed `completed` will never see a later event.

use async_trait::async_trait;
use marmot_core::event_store::{EventStore, EventStoreError, StreamEvent, StreamStatus};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Event store backed by a SQLite database file.
pub struct SqliteEventStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteEventStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EventStoreError> {
        let conn = Connection::open(path).map_err(sql_err)?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, EventStoreError> {
        let conn = Connection::open_in_memory().map_err(sql_err)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, EventStoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS streams (
                 stream_id TEXT PRIMARY KEY,
                 status TEXT NOT NULL,
                 created_at INTEGER NOT NULL
             );
             CREATE TABLE IF NOT EXISTS events (
                 stream_id TEXT NOT NULL,
                 seq INTEGER NOT NULL,
                 kind TEXT NOT NULL,
                 data TEXT NOT NULL,
                 ts INTEGER NOT NULL,
                 PRIMARY KEY (stream_id, seq)
             );",
        )
        .map_err(sql_err)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn sql_err(err: rusqlite::Error) -> EventStoreError {
    EventStoreError::Backend(err.to_string())
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn status_str(status: StreamStatus) -> &'static str {
    match status {
        StreamStatus::Generating => "generating",
        StreamStatus::Completed => "completed",
        StreamStatus::Failed => "failed",
        StreamStatus::Absent => "absent",
    }
}

fn parse_status(raw: &str) -> StreamStatus {
    match raw {
        "generating" => StreamStatus::Generating,
        "completed" => StreamStatus::Completed,
        "failed" => StreamStatus::Failed,
        _ => StreamStatus::Absent,
    }
}

impl SqliteEventStore {
    fn set_status(&self, stream_id: &str, status: StreamStatus) -> Result<(), EventStoreError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                "UPDATE streams SET status = ?2 WHERE stream_id = ?1",
                params![stream_id, status_str(status)],
            )
            .map_err(sql_err)?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO streams (stream_id, status, created_at) VALUES (?1, ?2, ?3)",
                params![stream_id, status_str(status), now_millis()],
            )
            .map_err(sql_err)?;
        }
        Ok(())
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn append(
        &self,
        stream_id: &str,
        kind: &str,
        data: String,
    ) -> Result<u64, EventStoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction().map_err(sql_err)?;

        let status: Option<String> = tx
            .query_row(
                "SELECT status FROM streams WHERE stream_id = ?1",
                params![stream_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?;

        match status.as_deref() {
            Some("completed") => {
                return Err(EventStoreError::Closed {
                    stream_id: stream_id.to_string(),
                });
            }
            Some(_) => {}
            None => {
                tx.execute(
                    "INSERT INTO streams (stream_id, status, created_at)
                     VALUES (?1, 'generating', ?2)",
                    params![stream_id, now_millis()],
                )
                .map_err(sql_err)?;
            }
        }

        let seq: i64 = tx
            .query_row(
                "SELECT COALESCE(MAX(seq), 0) + 1 FROM events WHERE stream_id = ?1",
                params![stream_id],
                |row| row.get(0),
            )
            .map_err(sql_err)?;

        tx.execute(
            "INSERT INTO events (stream_id, seq, kind, data, ts)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![stream_id, seq, kind, data, now_millis()],
        )
        .map_err(sql_err)?;

        tx.commit().map_err(sql_err)?;
        Ok(seq as u64)
    }

    async fn read(
        &self,
        stream_id: &str,
        after_id: u64,
    ) -> Result<Vec<StreamEvent>, EventStoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT seq, kind, data, ts FROM events
                 WHERE stream_id = ?1 AND seq > ?2 ORDER BY seq",
            )
            .map_err(sql_err)?;

        let rows = stmt
            .query_map(params![stream_id, after_id as i64], |row| {
                Ok(StreamEvent {
                    id: row.get::<_, i64>(0)? as u64,
                    stream_id: stream_id.to_string(),
                    kind: row.get(1)?,
                    data: row.get(2)?,
                    ts: UNIX_EPOCH + Duration::from_millis(row.get::<_, i64>(3)?.max(0) as u64),
                })
            })
            .map_err(sql_err)?;

        rows.collect::<Result<Vec<_>, _>>().map_err(sql_err)
    }

    async fn status(&self, stream_id: &str) -> Result<StreamStatus, EventStoreError> {
        let conn = self.conn.lock().unwrap();
        let status: Option<String> = conn
            .query_row(
                "SELECT status FROM streams WHERE stream_id = ?1",
                params![stream_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(sql_err)?;
        Ok(status.as_deref().map(parse_status).unwrap_or(StreamStatus::Absent))
    }

    async fn mark_completed(&self, stream_id: &str) -> Result<(), EventStoreError> {
        self.set_status(stream_id, StreamStatus::Completed)
    }

    async fn mark_failed(&self, stream_id: &str) -> Result<(), EventStoreError> {
        self.set_status(stream_id, StreamStatus::Failed)
    }
}
