//! Session backend — persistence of conversation history and usage counters.
//!
//! Backends own the durable copy of a session. Sessions are fully
//! independent: no backend shares state across ids. Implementations live in
//! `marmot-session`.

use crate::types::{Message, UsageInfo};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Summary metadata for listing sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMeta {
    pub id: String,
    pub created_at: SystemTime,
    pub updated_at: SystemTime,
    pub message_count: usize,
}

/// Errors from session store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("store error: {0}")]
    Backend(String),
}

/// Persistence of conversation history and per-session usage counters.
#[async_trait]
pub trait SessionBackend: Send + Sync {
    /// Load the conversation history; an unknown session reads as empty.
    async fn load(&self, session_id: &str) -> Result<Vec<Message>, StoreError>;

    /// Persist the full conversation history.
    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError>;

    /// Clear the conversation history.
    async fn reset(&self, session_id: &str) -> Result<(), StoreError>;

    /// List known sessions.
    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, StoreError>;

    /// Delete a session entirely: history and usage, together.
    async fn delete(&self, session_id: &str) -> Result<(), StoreError>;

    /// Load cumulative usage; an unknown session reads as zero.
    async fn load_usage(&self, session_id: &str) -> Result<UsageInfo, StoreError>;

    /// Persist cumulative usage.
    async fn save_usage(&self, session_id: &str, usage: &UsageInfo) -> Result<(), StoreError>;

    /// Clear usage counters.
    async fn reset_usage(&self, session_id: &str) -> Result<(), StoreError>;
}
