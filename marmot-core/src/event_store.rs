//! Resumable event store — ordered, offset-addressable event log.
//!
//! Streams are identified by caller-supplied ids. Event ids are strictly
//! increasing within a stream, contiguous from 1, and never reused; a
//! client that dropped after event N resumes with `read(stream, N)`.
//! Implementations live in `marmot-session`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// A persisted stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Monotonically increasing within the stream, starting at 1.
    pub id: u64,
    pub stream_id: String,
    /// Wire-level event name (`token`, `tool_call`, ...).
    pub kind: String,
    /// JSON payload, opaque to the store.
    pub data: String,
    pub ts: SystemTime,
}

/// Lifecycle state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    Generating,
    Completed,
    Failed,
    Absent,
}

/// Errors from event store operations.
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store error: {0}")]
    Backend(String),

    #[error("stream '{stream_id}' is closed")]
    Closed { stream_id: String },
}

/// Append-only, offset-addressable event log keyed by stream id.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Append an event; the store assigns and returns the event id.
    async fn append(
        &self,
        stream_id: &str,
        kind: &str,
        data: String,
    ) -> Result<u64, EventStoreError>;

    /// Read events with id greater than `after_id`, in id order.
    /// An absent stream reads as empty.
    async fn read(&self, stream_id: &str, after_id: u64)
        -> Result<Vec<StreamEvent>, EventStoreError>;

    /// Current status; `Absent` for unknown or expired streams.
    async fn status(&self, stream_id: &str) -> Result<StreamStatus, EventStoreError>;

    /// Mark the stream finished; no further appends will be accepted by
    /// persistent backends.
    async fn mark_completed(&self, stream_id: &str) -> Result<(), EventStoreError>;

    /// Mark the stream failed.
    async fn mark_failed(&self, stream_id: &str) -> Result<(), EventStoreError>;
}
