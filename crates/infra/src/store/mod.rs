//! Durable snapshot storage.
//!
//! Every piece of state this system persists (the job table, the credential
//! set, site settings) is saved and reloaded as a whole snapshot. A store must
//! make each `save` visible all-or-nothing and serialize concurrent writers;
//! how it does that (temp file + rename, a single KV put) is up to the
//! implementation.

use std::sync::Arc;

pub mod in_memory;
pub mod json_file;
#[cfg(feature = "redis")]
pub mod redis;

pub use in_memory::InMemoryStore;
pub use json_file::JsonFileStore;
#[cfg(feature = "redis")]
pub use redis::RedisStore;

/// Whole-value persistence for `T`.
pub trait SnapshotStore<T>: Send + Sync {
    /// Load the last saved snapshot. `Ok(None)` when nothing was saved yet.
    fn load(&self) -> Result<Option<T>, StoreError>;

    /// Atomically replace the stored snapshot.
    fn save(&self, value: &T) -> Result<(), StoreError>;
}

/// Snapshot store error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(String),
    #[error("stored snapshot is corrupt: {0}")]
    Corrupt(String),
    #[error("serialization error: {0}")]
    Serialize(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl<T, S> SnapshotStore<T> for Arc<S>
where
    S: SnapshotStore<T> + ?Sized,
{
    fn load(&self) -> Result<Option<T>, StoreError> {
        (**self).load()
    }

    fn save(&self, value: &T) -> Result<(), StoreError> {
        (**self).save(value)
    }
}
