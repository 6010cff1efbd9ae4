//! TTL-backed KV session backend.
//!
//! For cache-style deployments where sessions should expire on their own.
//! The `KvStore` capability abstracts the actual store; `MemoryKvStore`
//! provides a process-local implementation with TTL expiry.

use async_trait::async_trait;
use marmot_core::session::{SessionBackend, SessionMeta, StoreError};
use marmot_core::types::{Message, UsageInfo};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Minimal key-value capability with optional per-key TTL.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>)
        -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
    /// Keys starting with `prefix`.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }
}

/// Process-local KV store with TTL expiry.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<HashMap<String, KvEntry>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|e| !e.expired())
            .map(|e| e.value.clone()))
    }

    async fn set(
        &self,
        key: &str,
        value: String,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        self.entries.write().await.insert(
            key.to_string(),
            KvEntry {
                value,
                expires_at: ttl.map(|d| Instant::now() + d),
            },
        );
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(key, entry)| key.starts_with(prefix) && !entry.expired())
            .map(|(key, _)| key.clone())
            .collect())
    }
}

/// Session backend over a `KvStore`, with a shared TTL for every key.
pub struct KvSessionBackend {
    kv: std::sync::Arc<dyn KvStore>,
    ttl: Option<Duration>,
}

impl KvSessionBackend {
    pub fn new(kv: std::sync::Arc<dyn KvStore>, ttl: Option<Duration>) -> Self {
        Self { kv, ttl }
    }

    fn messages_key(session_id: &str) -> String {
        format!("session:{session_id}:messages")
    }

    fn usage_key(session_id: &str) -> String {
        format!("session:{session_id}:usage")
    }

    fn meta_key(session_id: &str) -> String {
        format!("session:{session_id}:meta")
    }
}

#[async_trait]
impl SessionBackend for KvSessionBackend {
    async fn load(&self, session_id: &str) -> Result<Vec<Message>, StoreError> {
        match self.kv.get(&Self::messages_key(session_id)).await? {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| StoreError::Serialization(e.to_string()))
            }
            None => Ok(Vec::new()),
        }
    }

    async fn save(&self, session_id: &str, messages: &[Message]) -> Result<(), StoreError> {
        let raw = serde_json::to_string(messages)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.kv
            .set(&Self::messages_key(session_id), raw, self.ttl)
            .await?;

        let now = std::time::SystemTime::now();
        let created_at = match self.kv.get(&Self::meta_key(session_id)).await? {
            Some(raw) => serde_json::from_str::<SessionMeta>(&raw)
                .map(|meta| meta.created_at)
                .unwrap_or(now),
            None => now,
        };
        let meta = SessionMeta {
            id: session_id.to_string(),
            created_at,
            updated_at: now,
            message_count: messages.len(),
        };
        let raw = serde_json::to_string(&meta)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.kv.set(&Self::meta_key(session_id), raw, self.ttl).await
    }

    async fn reset(&self, session_id: &str) -> Result<(), StoreError> {
        self.kv.remove(&Self::messages_key(session_id)).await?;
        self.kv.remove(&Self::meta_key(session_id)).await
    }

    async fn list_sessions(&self) -> Result<Vec<SessionMeta>, StoreError> {
        let mut metas = Vec::new();
        for key in self.kv.keys("session:").await? {
            if !key.ends_with(":meta") {
                continue;
            }
            if let Some(raw) = self.kv.get(&key).await? {
                if let Ok(meta) = serde_json::from_str::<SessionMeta>(&raw) {
                    metas.push(meta);
                }
            }
        }
        metas.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(metas)
    }

    async fn delete(&self, session_id: &str) -> Result<(), StoreError> {
        self.kv.remove(&Self::messages_key(session_id)).await?;
        self.kv.remove(&Self::usage_key(session_id)).await?;
        self.kv.remove(&Self::meta_key(session_id)).await
    }

    async fn load_usage(&self, session_id: &str) -> Result<UsageInfo, StoreError> {
        match self.kv.get(&Self::usage_key(session_id)).await? {
            Some(raw) => {
                serde_json::from_str(&raw).map_err(|e| StoreError::Serialization(e.to_string()))
            }
            None => Ok(UsageInfo::default()),
        }
    }

    async fn save_usage(&self, session_id: &str, usage: &UsageInfo) -> Result<(), StoreError> {
        let raw =
            serde_json::to_string(usage).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.kv.set(&Self::usage_key(session_id), raw, self.ttl).await
    }

    async fn reset_usage(&self, session_id: &str) -> Result<(), StoreError> {
        self.kv.remove(&Self::usage_key(session_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_kv_backend_roundtrip() {
        let backend = KvSessionBackend::new(Arc::new(MemoryKvStore::new()), None);
        let messages = vec![Message::user("hello"), Message::assistant("hi")];
        backend.save("s1", &messages).await.unwrap();
        assert_eq!(backend.load("s1").await.unwrap(), messages);

        let metas = backend.list_sessions().await.unwrap();
        assert_eq!(metas.len(), 1);
        assert_eq!(metas[0].message_count, 2);
    }

    #[tokio::test]
    async fn test_kv_ttl_expires_sessions() {
        let backend = KvSessionBackend::new(
            Arc::new(MemoryKvStore::new()),
            Some(Duration::from_millis(30)),
        );
        backend.save("s1", &[Message::user("x")]).await.unwrap();
        assert_eq!(backend.load("s1").await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(backend.load("s1").await.unwrap().is_empty());
        assert!(backend.list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_kv_created_at_preserved_on_resave() {
        let backend = KvSessionBackend::new(Arc::new(MemoryKvStore::new()), None);
        backend.save("s1", &[Message::user("a")]).await.unwrap();
        let first = backend.list_sessions().await.unwrap()[0].clone();

        tokio::time::sleep(Duration::from_millis(10)).await;
        backend
            .save("s1", &[Message::user("a"), Message::assistant("b")])
            .await
            .unwrap();
        let second = backend.list_sessions().await.unwrap()[0].clone();

        assert_eq!(first.created_at, second.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    #[tokio::test]
    async fn test_kv_delete_removes_all_keys() {
        let kv = Arc::new(MemoryKvStore::new());
        let backend = KvSessionBackend::new(kv.clone(), None);
        backend.save("s1", &[Message::user("x")]).await.unwrap();
        backend
            .save_usage(
                "s1",
                &UsageInfo {
                    input_tokens: 3,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        backend.delete("s1").await.unwrap();
        assert!(kv.keys("session:").await.unwrap().is_empty());
    }
}
