//! Durable local state: the task snapshot, the pending-change set, the last
//! sync time and the owning user.
//!
//! Each piece is an independent JSON entry in a [`KeyValueBackend`], so a
//! corrupt pending set cannot take the task snapshot down with it. Loads
//! never fail: a missing entry yields the default, and an unreadable or
//! undecodable entry is logged and also yields the default. Saves return
//! [`StoreError`]; the repository logs those and keeps going with its
//! in-memory state.

pub mod file;
pub mod memory;

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;

use tasksync_proto::task::{Task, TaskId};

pub use file::FileBackend;
pub use memory::MemoryBackend;

/// Entry holding the whole task collection.
pub const SNAPSHOT_KEY: &str = "saved_tasks";
/// Entry holding the time of the last successful sync.
pub const LAST_SYNC_KEY: &str = "last_sync_time";
/// Entry holding the ids of tasks with unpushed local changes.
pub const PENDING_KEY: &str = "pending_sync_tasks";
/// Entry holding the user id the persisted state belongs to.
pub const OWNER_KEY: &str = "session_owner";

const ALL_KEYS: [&str; 4] = [SNAPSHOT_KEY, LAST_SYNC_KEY, PENDING_KEY, OWNER_KEY];

/// Errors that can occur during local storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing medium failed.
    #[error("storage I/O error for `{key}`: {source}")]
    Io {
        /// Entry key.
        key: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A value could not be serialized.
    #[error("failed to encode entry: {0}")]
    Encode(#[from] serde_json::Error),

    /// The backend refused the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Byte-level key-value persistence used by [`LocalStore`].
pub trait KeyValueBackend: Send + Sync {
    /// Returns the bytes stored under `key`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the medium cannot be read.
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Replaces the bytes stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the medium cannot be written.
    fn write(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Removes `key`. Removing a missing key succeeds.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the medium cannot be written.
    fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Typed access to the persisted sync state.
pub struct LocalStore<B: KeyValueBackend> {
    backend: B,
}

impl<B: KeyValueBackend> LocalStore<B> {
    #[must_use]
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Returns the underlying backend.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Persists the whole task collection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if encoding or writing fails.
    pub fn save_snapshot<'a>(
        &self,
        tasks: impl IntoIterator<Item = &'a Task>,
    ) -> Result<(), StoreError> {
        let mut tasks: Vec<&Task> = tasks.into_iter().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        self.save_entry(SNAPSHOT_KEY, &tasks)
    }

    /// Loads the task collection, or an empty one if missing or corrupt.
    #[must_use]
    pub fn load_snapshot(&self) -> Vec<Task> {
        self.load_entry(SNAPSHOT_KEY).unwrap_or_default()
    }

    /// Persists the pending-change set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if encoding or writing fails.
    pub fn save_pending_set(&self, pending: &HashSet<TaskId>) -> Result<(), StoreError> {
        let mut ids: Vec<&TaskId> = pending.iter().collect();
        ids.sort();
        self.save_entry(PENDING_KEY, &ids)
    }

    /// Loads the pending-change set, or an empty one if missing or corrupt.
    #[must_use]
    pub fn load_pending_set(&self) -> HashSet<TaskId> {
        self.load_entry::<Vec<TaskId>>(PENDING_KEY)
            .unwrap_or_default()
            .into_iter()
            .collect()
    }

    /// Persists the time of the last successful sync.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if encoding or writing fails.
    pub fn save_sync_timestamp(&self, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.save_entry(LAST_SYNC_KEY, &at)
    }

    /// Loads the last sync time, or `None` if missing or corrupt.
    #[must_use]
    pub fn load_sync_timestamp(&self) -> Option<DateTime<Utc>> {
        self.load_entry(LAST_SYNC_KEY)
    }

    /// Records which user the persisted state belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if encoding or writing fails.
    pub fn save_owner(&self, user_id: &str) -> Result<(), StoreError> {
        self.save_entry(OWNER_KEY, &user_id)
    }

    /// The user the persisted state belongs to, if recorded.
    #[must_use]
    pub fn load_owner(&self) -> Option<String> {
        self.load_entry(OWNER_KEY)
    }

    /// Removes every entry. Stops at the first failure.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if an entry cannot be removed.
    pub fn clear(&self) -> Result<(), StoreError> {
        for key in ALL_KEYS {
            self.backend.remove(key)?;
        }
        Ok(())
    }

    fn save_entry<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)?;
        self.backend.write(key, &bytes)
    }

    fn load_entry<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let bytes = match self.backend.read(key) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(key, error = %e, "failed to read local entry, using default");
                return None;
            }
        };
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(key, error = %e, "corrupt local entry, using default");
                None
            }
        }
    }
}
