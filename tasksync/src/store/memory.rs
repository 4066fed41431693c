//! In-memory [`KeyValueBackend`] for tests and ephemeral sessions.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::{KeyValueBackend, StoreError};

/// Shared-handle in-memory backend. Clones see the same entries, so a test
/// can keep one handle while the repository owns another.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    entries: Mutex<HashMap<String, Vec<u8>>>,
    failing: AtomicBool,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// When `true`, every write and remove fails with
    /// [`StoreError::Unavailable`]. Reads keep working.
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Stores raw bytes, bypassing encoding (used to plant corrupt entries).
    pub fn insert_raw(&self, key: &str, bytes: &[u8]) {
        self.inner
            .entries
            .lock()
            .insert(key.to_string(), bytes.to_vec());
    }

    /// Raw bytes under `key`.
    #[must_use]
    pub fn raw(&self, key: &str) -> Option<Vec<u8>> {
        self.inner.entries.lock().get(key).cloned()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.lock().is_empty()
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }
}

impl KeyValueBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.raw(key))
    }

    fn write(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.check_writable()?;
        self.insert_raw(key, value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.check_writable()?;
        self.inner.entries.lock().remove(key);
        Ok(())
    }
}
