//! Relay wire protocol for the remote document store.
//!
//! Clients send [`ClientFrame`]s and the relay answers with
//! [`ServerFrame`]s, each postcard-encoded into one WebSocket binary frame.
//! Requests carry a client-chosen `request_id` echoed in the reply.
//! Subscriptions are per collection path: the relay sends a full
//! [`ServerFrame::Snapshot`] right after `Subscribe` and again after every
//! change to that collection.

use serde::{Deserialize, Serialize};

use crate::document::Document;

/// Frames sent from a client to the relay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Create or replace the document at `path`.
    Set {
        request_id: u64,
        path: String,
        document: Document,
    },
    /// Fetch the document at `path`.
    Get { request_id: u64, path: String },
    /// Delete the document at `path`. Deleting a missing document succeeds.
    Delete { request_id: u64, path: String },
    /// Fetch every document in `collection` once.
    List { request_id: u64, collection: String },
    /// Start receiving snapshots of `collection`.
    Subscribe { collection: String },
    /// Stop receiving snapshots of `collection`.
    Unsubscribe { collection: String },
}

/// Frames sent from the relay to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// The request succeeded with no payload.
    Ack { request_id: u64 },
    /// Reply to `Get`: the document, or `None` if absent.
    Document {
        request_id: u64,
        document: Option<Document>,
    },
    /// Reply to `List`.
    Documents {
        request_id: u64,
        documents: Vec<Document>,
    },
    /// Full current contents of a subscribed collection.
    Snapshot {
        collection: String,
        documents: Vec<Document>,
    },
    /// The request failed. `request_id` is `None` for frames that could
    /// not be decoded far enough to read one.
    Error {
        request_id: Option<u64>,
        reason: String,
    },
}

impl ClientFrame {
    /// The request id, for frames that expect a reply.
    #[must_use]
    pub const fn request_id(&self) -> Option<u64> {
        match self {
            Self::Set { request_id, .. }
            | Self::Get { request_id, .. }
            | Self::Delete { request_id, .. }
            | Self::List { request_id, .. } => Some(*request_id),
            Self::Subscribe { .. } | Self::Unsubscribe { .. } => None,
        }
    }
}

impl ServerFrame {
    /// The request id this frame answers, if any.
    #[must_use]
    pub const fn request_id(&self) -> Option<u64> {
        match self {
            Self::Ack { request_id }
            | Self::Document { request_id, .. }
            | Self::Documents { request_id, .. } => Some(*request_id),
            Self::Error { request_id, .. } => *request_id,
            Self::Snapshot { .. } => None,
        }
    }
}

/// Encodes a [`ClientFrame`] into bytes using postcard.
///
/// # Errors
///
/// Returns an error string if serialization fails.
pub fn encode_client(frame: &ClientFrame) -> Result<Vec<u8>, String> {
    postcard::to_allocvec(frame).map_err(|e| format!("client frame encode error: {e}"))
}

/// Decodes a [`ClientFrame`] from bytes using postcard.
///
/// # Errors
///
/// Returns an error string if deserialization fails.
pub fn decode_client(bytes: &[u8]) -> Result<ClientFrame, String> {
    postcard::from_bytes(bytes).map_err(|e| format!("client frame decode error: {e}"))
}

/// Encodes a [`ServerFrame`] into bytes using postcard.
///
/// # Errors
///
/// Returns an error string if serialization fails.
pub fn encode_server(frame: &ServerFrame) -> Result<Vec<u8>, String> {
    postcard::to_allocvec(frame).map_err(|e| format!("server frame encode error: {e}"))
}

/// Decodes a [`ServerFrame`] from bytes using postcard.
///
/// # Errors
///
/// Returns an error string if deserialization fails.
pub fn decode_server(bytes: &[u8]) -> Result<ServerFrame, String> {
    postcard::from_bytes(bytes).map_err(|e| format!("server frame decode error: {e}"))
}
