//! Fetch-through caching for remote entities.
//!
//! This module provides the transport-agnostic machinery that:
//! - Deduplicates concurrent fetches of the same entity key
//! - Persists a snapshot after every successful fetch
//! - Serves attribute reads from the record store when offline
//! - Tracks per-attribute resolution state

mod coordinator;
pub(crate) mod slot;
mod storage;
mod traits;

pub use coordinator::FetchCoordinator;
pub use slot::SlotState;
pub use storage::{MemoryStore, NoopStore, SqliteStore};
pub use traits::{RecordStore, Snapshot, Transport};
