//! In-memory event store with TTL eviction.
//!
//! Suitable for a single process. Expired streams are garbage-collected
//! lazily and thereafter read as absent.

use async_trait::async_trait;
use marmot_core::event_store::{EventStore, EventStoreError, StreamEvent, StreamStatus};
use std::collections::HashMap;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::RwLock;

/// Default stream TTL: five minutes.
pub const DEFAULT_STREAM_TTL: Duration = Duration::from_secs(300);

struct StreamData {
    events: Vec<StreamEvent>,
    status: StreamStatus,
    created_at: Instant,
    counter: u64,
}

/// Event store backed by a process-local map.
pub struct MemoryEventStore {
    streams: RwLock<HashMap<String, StreamData>>,
    ttl: Duration,
}

impl MemoryEventStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    fn expired(&self, data: &StreamData) -> bool {
        data.created_at.elapsed() > self.ttl
    }
}

impl Default for MemoryEventStore {
    fn default() -> Self {
        Self::new(DEFAULT_STREAM_TTL)
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn append(
        &self,
        stream_id: &str,
        kind: &str,
        data: String,
    ) -> Result<u64, EventStoreError> {
        let mut streams = self.streams.write().await;

        // An expired stream restarts from scratch.
        if streams.get(stream_id).is_some_and(|s| self.expired(s)) {
            streams.remove(stream_id);
        }

        let stream = streams.entry(stream_id.to_string()).or_insert_with(|| {
            StreamData {
                events: Vec::new(),
                status: StreamStatus::Generating,
                created_at: Instant::now(),
                counter: 0,
            }
        });

        stream.counter += 1;
        stream.events.push(StreamEvent {
            id: stream.counter,
            stream_id: stream_id.to_string(),
            kind: kind.to_string(),
            data,
            ts: SystemTime::now(),
        });
        Ok(stream.counter)
    }

    async fn read(
        &self,
        stream_id: &str,
        after_id: u64,
    ) -> Result<Vec<StreamEvent>, EventStoreError> {
        let streams = self.streams.read().await;
        match streams.get(stream_id) {
            Some(stream) if !self.expired(stream) => Ok(stream
                .events
                .iter()
                .filter(|e| e.id > after_id)
                .cloned()
                .collect()),
            _ => Ok(Vec::new()),
        }
    }

    async fn status(&self, stream_id: &str) -> Result<StreamStatus, EventStoreError> {
        let streams = self.streams.read().await;
        Ok(match streams.get(stream_id) {
            Some(stream) if !self.expired(stream) => stream.status,
            _ => StreamStatus::Absent,
        })
    }

    async fn mark_completed(&self, stream_id: &str) -> Result<(), EventStoreError> {
        let mut streams = self.streams.write().await;
        if let Some(stream) = streams.get_mut(stream_id) {
            stream.status = StreamStatus::Completed;
        }
        Ok(())
    }

    async fn mark_failed(&self, stream_id: &str) -> Result<(), EventStoreError> {
        let mut streams = self.streams.write().await;
        if let Some(stream) = streams.get_mut(stream_id) {
            stream.status = StreamStatus::Failed;
        }
        Ok(())
    }
}
