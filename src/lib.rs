//! Asynchronous cached views over remote entities.
//!
//! Attributes are fetched on demand from a [`Transport`], memoized per
//! entity, persisted as [`Snapshot`]s in a [`RecordStore`], and readable
//! from that store alone when the view is offline.

pub mod cache;
pub mod config;
pub mod error;
pub mod key;
pub mod logging;
pub mod source;
pub mod view;

#[cfg(test)]
mod testing;

pub use cache::{MemoryStore, NoopStore, RecordStore, Snapshot, SlotState, SqliteStore, Transport};
pub use error::{CacheWarning, FetchError, StorageError, TransportError};
pub use key::{EntityKey, EntityRef};
pub use source::{HttpTransport, UnreachableTransport};
pub use view::{CachedAttribute, CachedView, Document, EntityHandle, Model, ViewMode, ViewOptions};
