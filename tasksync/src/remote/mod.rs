//! Remote document store access.
//!
//! [`RemoteStore`] is the byte-agnostic seam to the shared keyed document
//! store: per-path get/set/delete, one-shot collection listing and a live
//! collection watch. [`RemoteSyncClient`] binds a store to one user and
//! speaks in tasks rather than documents.
//!
//! Implementations:
//! - [`MemoryRemote`]: in-process store with failure injection (tests).
//! - [`RelayRemote`]: WebSocket client for `tasksync-relay`.

pub mod client;
pub mod memory;
pub mod relay;

use std::future::Future;

use tasksync_proto::document::Document;
use tokio::sync::mpsc;

pub use client::{RemoteSyncClient, decode_documents};
pub use memory::MemoryRemote;
pub use relay::RelayRemote;

/// A stream of full collection snapshots. The watch ends when the receiver
/// is dropped.
pub type SnapshotStream = mpsc::UnboundedReceiver<Result<Vec<Document>, RemoteError>>;

/// Errors that can occur when talking to the remote store.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The device is offline; no network call was attempted.
    #[error("offline")]
    Offline,

    /// The store could not be reached or failed the request.
    #[error("remote store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the request.
    #[error("remote store rejected request: {0}")]
    Rejected(String),

    /// The connection dropped while the request was outstanding.
    #[error("connection closed")]
    ConnectionClosed,

    /// The store did not answer in time.
    #[error("remote request timed out")]
    Timeout,

    /// The store URL is malformed or uses an unsupported scheme.
    #[error("invalid remote URL: {0}")]
    InvalidUrl(String),

    /// A frame could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

/// A keyed document collection with live change notifications.
///
/// Paths look like `users/{userId}/tasks/{taskId}`; the collection of a
/// document is its path minus the last segment.
pub trait RemoteStore: Send + Sync + 'static {
    /// Fetches the document at `path`, or `None` if absent.
    fn get_document(
        &self,
        path: &str,
    ) -> impl Future<Output = Result<Option<Document>, RemoteError>> + Send;

    /// Creates or replaces the document at `path`.
    fn set_document(
        &self,
        path: &str,
        document: Document,
    ) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Deletes the document at `path`. Deleting a missing document succeeds.
    fn delete_document(&self, path: &str) -> impl Future<Output = Result<(), RemoteError>> + Send;

    /// Lists every document in `collection` once.
    fn list_documents(
        &self,
        collection: &str,
    ) -> impl Future<Output = Result<Vec<Document>, RemoteError>> + Send;

    /// Watches `collection`. The first snapshot arrives immediately; later
    /// ones follow every change. A transport failure is delivered as an
    /// `Err` item.
    fn watch_collection(
        &self,
        collection: &str,
    ) -> impl Future<Output = Result<SnapshotStream, RemoteError>> + Send;
}
