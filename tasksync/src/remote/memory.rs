//! In-process [`RemoteStore`].
//!
//! Holds documents in memory and fans snapshots out to watchers. Clones
//! share state, so one handle can be given to the repository while a test
//! inspects and manipulates the store through another (acting as "another
//! device").

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tasksync_proto::document::{Document, split_path};
use tokio::sync::{mpsc, watch};

use super::{RemoteError, RemoteStore, SnapshotStream};

type Watcher = mpsc::UnboundedSender<Result<Vec<Document>, RemoteError>>;

/// Memory-backed remote document store.
#[derive(Clone)]
pub struct MemoryRemote {
    inner: Arc<Inner>,
}

struct Inner {
    /// Collection path -> document id -> document.
    collections: Mutex<HashMap<String, BTreeMap<String, Document>>>,
    watchers: Mutex<HashMap<String, Vec<Watcher>>>,
    failing: AtomicBool,
    writes: AtomicUsize,
    /// While `true`, writes wait before touching the store.
    paused: watch::Sender<bool>,
}

impl Default for MemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRemote {
    #[must_use]
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                collections: Mutex::new(HashMap::new()),
                watchers: Mutex::new(HashMap::new()),
                failing: AtomicBool::new(false),
                writes: AtomicUsize::new(0),
                paused,
            }),
        }
    }

    /// When `true`, every request fails with [`RemoteError::Unavailable`].
    pub fn set_failing(&self, failing: bool) {
        self.inner.failing.store(failing, Ordering::SeqCst);
    }

    /// Holds writes in flight until [`resume`](Self::resume) is called.
    pub fn pause(&self) {
        self.inner.paused.send_replace(true);
    }

    pub fn resume(&self) {
        self.inner.paused.send_replace(false);
    }

    /// Number of successful set/delete requests so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Current documents in `collection`, ordered by document id.
    #[must_use]
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.inner
            .collections
            .lock()
            .get(collection)
            .map(|docs| docs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Delivers `error` to every watcher of `collection`.
    pub fn push_watch_error(&self, collection: &str, error: RemoteError) {
        let mut watchers = self.inner.watchers.lock();
        if let Some(list) = watchers.get_mut(collection) {
            list.retain(|tx| tx.send(Err(error.clone())).is_ok());
        }
    }

    /// Number of live watchers on `collection`.
    #[must_use]
    pub fn watcher_count(&self, collection: &str) -> usize {
        let mut watchers = self.inner.watchers.lock();
        watchers.get_mut(collection).map_or(0, |list| {
            list.retain(|tx| !tx.is_closed());
            list.len()
        })
    }

    fn check_available(&self) -> Result<(), RemoteError> {
        if self.inner.failing.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    async fn wait_unpaused(&self) {
        let mut rx = self.inner.paused.subscribe();
        // The sender lives in `inner`, so this only errors if we are dropped.
        let _ = rx.wait_for(|paused| !*paused).await;
    }

    fn notify_watchers(&self, collection: &str) {
        let snapshot = self.documents(collection);
        let mut watchers = self.inner.watchers.lock();
        if let Some(list) = watchers.get_mut(collection) {
            list.retain(|tx| tx.send(Ok(snapshot.clone())).is_ok());
        }
    }
}

impl RemoteStore for MemoryRemote {
    async fn get_document(&self, path: &str) -> Result<Option<Document>, RemoteError> {
        self.check_available()?;
        let (collection, id) =
            split_path(path).ok_or_else(|| RemoteError::Rejected(format!("bad path: {path}")))?;
        Ok(self
            .inner
            .collections
            .lock()
            .get(collection)
            .and_then(|docs| docs.get(id).cloned()))
    }

    async fn set_document(&self, path: &str, document: Document) -> Result<(), RemoteError> {
        self.wait_unpaused().await;
        self.check_available()?;
        let (collection, id) =
            split_path(path).ok_or_else(|| RemoteError::Rejected(format!("bad path: {path}")))?;
        self.inner
            .collections
            .lock()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), document);
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        self.notify_watchers(collection);
        Ok(())
    }

    async fn delete_document(&self, path: &str) -> Result<(), RemoteError> {
        self.wait_unpaused().await;
        self.check_available()?;
        let (collection, id) =
            split_path(path).ok_or_else(|| RemoteError::Rejected(format!("bad path: {path}")))?;
        let removed = self
            .inner
            .collections
            .lock()
            .get_mut(collection)
            .and_then(|docs| docs.remove(id));
        self.inner.writes.fetch_add(1, Ordering::SeqCst);
        if removed.is_some() {
            self.notify_watchers(collection);
        }
        Ok(())
    }

    async fn list_documents(&self, collection: &str) -> Result<Vec<Document>, RemoteError> {
        self.check_available()?;
        Ok(self.documents(collection))
    }

    async fn watch_collection(&self, collection: &str) -> Result<SnapshotStream, RemoteError> {
        self.check_available()?;
        let (tx, rx) = mpsc::unbounded_channel();
        // Hold the watcher lock across the initial send so a concurrent write
        // cannot slip its snapshot in ahead of this one.
        let mut watchers = self.inner.watchers.lock();
        let _ = tx.send(Ok(self.documents(collection)));
        let list = watchers.entry(collection.to_string()).or_default();
        list.retain(|w| !w.is_closed());
        list.push(tx);
        drop(watchers);
        Ok(rx)
    }
}
