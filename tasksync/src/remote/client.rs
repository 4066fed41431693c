//! Per-user task operations over a [`RemoteStore`].
//!
//! Every operation checks the [`ConnectivityObserver`] first and fails fast
//! with [`RemoteError::Offline`] without touching the network. The client
//! holds no retry state; callers own pending-set bookkeeping.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use tasksync_proto::document::{Document, collection_path, decode_task, document_path, encode_task};
use tasksync_proto::task::{Task, TaskId};
use tokio::task::JoinHandle;

use super::{RemoteError, RemoteStore};
use crate::connectivity::ConnectivityObserver;

/// Binds a remote store to one user's task collection.
pub struct RemoteSyncClient<R> {
    remote: Arc<R>,
    user_id: String,
    connectivity: ConnectivityObserver,
    /// The single live subscription, if any.
    subscription: Option<JoinHandle<()>>,
}

impl<R: RemoteStore> RemoteSyncClient<R> {
    #[must_use]
    pub fn new(
        remote: Arc<R>,
        user_id: impl Into<String>,
        connectivity: ConnectivityObserver,
    ) -> Self {
        Self {
            remote,
            user_id: user_id.into(),
            connectivity,
            subscription: None,
        }
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn online(&self) -> Result<(), RemoteError> {
        if self.connectivity.is_connected() {
            Ok(())
        } else {
            Err(RemoteError::Offline)
        }
    }

    /// Uploads `task`, replacing the remote copy. The returned future owns
    /// everything it needs, so it can be spawned.
    pub fn push_task(
        &self,
        task: &Task,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send + use<R> {
        let online = self.online();
        let remote = Arc::clone(&self.remote);
        let path = document_path(&self.user_id, &task.id);
        let document = encode_task(task, Utc::now());
        async move {
            online?;
            remote.set_document(&path, document).await
        }
    }

    /// Deletes the remote copy of `id`.
    pub fn delete_task(
        &self,
        id: &TaskId,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send + use<R> {
        let online = self.online();
        let remote = Arc::clone(&self.remote);
        let path = document_path(&self.user_id, id);
        async move {
            online?;
            remote.delete_document(&path).await
        }
    }

    /// Fetches the whole remote collection once. Undecodable documents are
    /// skipped.
    pub fn fetch_all(
        &self,
    ) -> impl Future<Output = Result<Vec<Task>, RemoteError>> + Send + use<R> {
        let online = self.online();
        let remote = Arc::clone(&self.remote);
        let collection = collection_path(&self.user_id);
        async move {
            online?;
            let documents = remote.list_documents(&collection).await?;
            Ok(decode_documents(&documents))
        }
    }

    /// Starts the live subscription, replacing any previous one.
    ///
    /// `deliver` is called with the full decoded collection on every change,
    /// starting with the current state, and with `Err` on a watch failure.
    /// Returning `false` ends the subscription.
    ///
    /// # Errors
    ///
    /// [`RemoteError::Offline`] when disconnected, or the store's error if
    /// the watch cannot be opened. Any previous subscription is cancelled
    /// either way.
    pub async fn subscribe<F>(&mut self, mut deliver: F) -> Result<(), RemoteError>
    where
        F: FnMut(Result<Vec<Task>, RemoteError>) -> bool + Send + 'static,
    {
        self.unsubscribe();
        self.online()?;
        let collection = collection_path(&self.user_id);
        let mut snapshots = self.remote.watch_collection(&collection).await?;

        let handle = tokio::spawn(async move {
            while let Some(item) = snapshots.recv().await {
                let item = item.map(|documents| decode_documents(&documents));
                if !deliver(item) {
                    break;
                }
            }
            tracing::debug!(collection = %collection, "subscription ended");
        });
        self.subscription = Some(handle);
        Ok(())
    }

    /// Cancels the live subscription, if any.
    pub fn unsubscribe(&mut self) {
        if let Some(handle) = self.subscription.take() {
            handle.abort();
        }
    }

    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl<R> Drop for RemoteSyncClient<R> {
    fn drop(&mut self) {
        if let Some(handle) = self.subscription.take() {
            handle.abort();
        }
    }
}

/// Decodes each document independently, logging and skipping failures.
#[must_use]
pub fn decode_documents(documents: &[Document]) -> Vec<Task> {
    documents
        .iter()
        .filter_map(|doc| match decode_task(doc) {
            Ok(task) => Some(task),
            Err(e) => {
                tracing::warn!(error = %e, "skipping undecodable remote document");
                None
            }
        })
        .collect()
}
