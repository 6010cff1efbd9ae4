//! In-memory session backend.
//!
//! Process-local, for development and tests. History is deep-copied on
//! load and save so callers never alias stored state.

use async_trait::async_trait;
use marmot_core::session::{SessionBackend, SessionMeta, StoreError};
use marmot_core::types::{Message, UsageInfo};
use std::collections::HashMap;
use std::time::SystemTime;
use tokio::sync::RwLock;

struct StoredSession {
    messages: Vec<Message>,
    created_at: SystemTime,
    updated_at: SystemTime,
}

/// Session backend backed by a process-local map.
#[derive(Default)]
pub struct MemorySessionBackend {
    sessions: RwLock<HashMap<String, StoredSession>>,
    usage: RwLock<HashMap<String, UsageInfo>>,
}

impl MemorySessionBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionBackend for MemorySessionBackend {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(session_id)
            .map(|s| s.messages.clone())
            .unwrap_or_default())
    }

    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let now = SystemTime::now();
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(session_id) {
            Some(stored) => {
                stored.messages = messages.to_vec();
                stored.updated_at = now;
            }
            None => {
                sessions.insert(
                    session_id.to_string(),
                    StoredSession {
                        messages: messages.to_vec(),
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
        }
        tracing::debug!(session_id, messages = messages.len(), "session saved");
        Ok(())
    }

    async fn reset(&self, session_id: &str) -> Result<(), StoreError> {
        self.sessions.write().await.remove(session_id);
        Ok(())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, StoreError> {
        let sessions = self.sessions.read().await;
        let mut metas: Vec<SessionMeta> = sessions
            .iter()
            .map(|(id, stored)| SessionMeta {
                id: id.clone(),
                created_at: stored.created_at,
                updated_at: stored.updated_at,
                message_count: stored.messages.len(),
            })
            .collect();
        metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(metas)
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.sessions.write().await.remove(session_id);
        self.usage.write().await.remove(session_id);
        Ok(())
    }

    async fn load_usage(&self, session_id: &str) -> Result<UsageInfo, StoreError> {
        Ok(self
            .usage
            .read()
            .await
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn save_usage(&self, session_id: &str, usage: &UsageInfo) -> Result<(), StoreError> {
        self.usage
            .write()
            .await
            .insert(session_id.to_string(), usage.clone());
        Ok(())
    }

    async fn reset_usage(&self, session_id: &str) -> Result<(), StoreError> {
        self.usage.write().await.remove(session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use marmot_core::types::ContentBlock;
    use serde_json::json;

    #[tokio::test]
    async fn test_unknown_session_reads_empty() {
        let backend = MemorySessionBackend::new();
        assert!(backend.load("missing").await.unwrap().is_empty());
        assert_eq!(
            backend.load_usage("missing").await.unwrap(),
            UsageInfo::default()
        );
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let backend = MemorySessionBackend::new();
        let messages = vec![
            Message::user("hi"),
            Message::assistant_blocks(vec![ContentBlock::ToolUse {
                id: "tu_1".to_string(),
                name: "read_file".to_string(),
                input: json!({"path": "a.py", "depth": 3}),
            }]),
        ];
        backend.save("s1", &messages).await.unwrap();
        assert_eq!(backend.load("s1").await.unwrap(), messages);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let backend = MemorySessionBackend::new();
        backend.save("a", &[Message::user("for a")]).await.unwrap();
        backend.save("b", &[Message::user("for b")]).await.unwrap();

        backend.delete("a").await.unwrap();
        assert!(backend.load("a").await.unwrap().is_empty());
        assert_eq!(backend.load("b").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_cascades_usage() {
        let backend = MemorySessionBackend::new();
        backend.save("s1", &[Message::user("x")]).await.unwrap();
        backend
            .save_usage(
                "s1",
                &UsageInfo {
                    input_tokens: 10,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        backend.delete("s1").await.unwrap();
        assert_eq!(
            backend.load_usage("s1").await.unwrap(),
            UsageInfo::default()
        );
    }

    #[tokio::test]
    async fn test_list_sessions_counts_messages() {
        let backend = MemorySessionBackend::new();
        backend
            .save("s1", &[Message::user("1"), Message::assistant("2")])
            .await
            .unwrap();

        let metas = backend.list_sessions().await.unwrap();
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].id, "s1");
        assert_eq!(metas[0].message_count, 2);
    }
}
