//! marmot-session — session backends and event stores.
//!
//! Three session backends (in-memory, SQLite, TTL-backed KV) and two event
//! stores (in-memory with TTL, SQLite) implementing the persistence traits
//! from `marmot-core`.

pub mod event_memory;
pub mod event_sqlite;
pub mod kv;
pub mod memory;
pub mod sqlite;

pub use event_memory::{MemoryEventStore, DEFAULT_STREAM_TTL};
pub use event_sqlite::SqliteEventStore;
pub use kv::{KvSessionBackend, KvStore, MemoryKvStore};
pub use memory::MemorySessionBackend;
pub use sqlite::SqliteSessionBackend;
