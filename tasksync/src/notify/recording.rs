//! In-memory [`NotificationScheduler`] that records what is scheduled.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::{Notification, NotificationScheduler, NotifyError, Trigger, check_trigger};

/// A recorded schedule entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledEntry {
    pub trigger: Trigger,
    pub notification: Notification,
}

/// Keeps scheduled entries in a map. Clones share the map, so a test can
/// hand one handle to the repository and inspect through another.
#[derive(Clone, Default)]
pub struct RecordingScheduler {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    entries: Mutex<HashMap<String, ScheduledEntry>>,
    cancelled: Mutex<Vec<String>>,
    failing: AtomicBool,
}

impl RecordingScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// When `true`, every `schedule` call fails with
    /// [`NotifyError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// The entry scheduled under `id`, if any.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<ScheduledEntry> {
        self.inner.entries.lock().get(id).cloned()
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.inner.entries.lock().contains_key(id)
    }

    /// Identifiers currently scheduled, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.entries.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Every `cancel` call so far, in order, including no-op ones.
    #[must_use]
    pub fn cancelled(&self) -> Vec<String> {
        self.inner.cancelled.lock().clone()
    }
}

impl NotificationScheduler for RecordingScheduler {
    fn schedule(
        &self,
        id: &str,
        trigger: Trigger,
        notification: Notification,
    ) -> Result<(), NotifyError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(NotifyError::Unavailable("injected failure".to_string()));
        }
        check_trigger(trigger)?;
        self.inner.entries.lock().insert(
            id.to_string(),
            ScheduledEntry {
                trigger,
                notification,
            },
        );
        Ok(())
    }

    fn cancel(&self, id: &str) {
        self.inner.entries.lock().remove(id);
        self.inner.cancelled.lock().push(id.to_string());
    }
}
