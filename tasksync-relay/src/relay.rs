//! Relay server core: shared state, WebSocket handler, request dispatch and
//! snapshot fan-out.
//!
//! Each connection sends [`ClientFrame`]s and receives [`ServerFrame`]s.
//! Document writes go to the shared [`DocumentStore`]; after every change the
//! relay pushes a full [`ServerFrame::Snapshot`] of the affected collection to
//! every connection subscribed to it.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tasksync_proto::document::Document;
use tasksync_proto::wire::{self, ClientFrame, ServerFrame};
use tokio::sync::{Mutex, RwLock, mpsc};

use crate::store::DocumentStore;

type ConnectionId = u64;
type FrameSender = mpsc::UnboundedSender<Message>;

/// Shared relay server state: documents, live connections and
/// per-collection subscribers.
pub struct RelayState {
    /// Document storage. Held across a change and its snapshot broadcast.
    documents: Mutex<DocumentStore>,
    /// Channel senders for every live connection.
    connections: RwLock<HashMap<ConnectionId, FrameSender>>,
    /// Collection path to subscribed connections.
    subscribers: RwLock<HashMap<String, HashMap<ConnectionId, FrameSender>>>,
    next_connection_id: AtomicU64,
}

impl Default for RelayState {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayState {
    /// Creates relay state with an empty store using default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_store(DocumentStore::new())
    }

    /// Creates relay state around a pre-configured document store.
    #[must_use]
    pub fn with_store(store: DocumentStore) -> Self {
        Self {
            documents: Mutex::new(store),
            connections: RwLock::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
        }
    }

    async fn register(&self, sender: FrameSender) -> ConnectionId {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        self.connections.write().await.insert(id, sender);
        id
    }

    /// Removes a connection and all of its subscriptions.
    async fn unregister(&self, conn: ConnectionId) {
        self.connections.write().await.remove(&conn);
        let mut subs = self.subscribers.write().await;
        subs.retain(|_, conns| {
            conns.remove(&conn);
            !conns.is_empty()
        });
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Number of connections subscribed to `collection`.
    pub async fn subscriber_count(&self, collection: &str) -> usize {
        self.subscribers
            .read()
            .await
            .get(collection)
            .map_or(0, HashMap::len)
    }

    /// Current contents of `collection`.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        self.documents.lock().await.list(collection)
    }

    /// Send a WebSocket Close frame to all connected clients.
    ///
    /// This causes each connection's writer task to send a close frame, which
    /// triggers the client-side reader to detect disconnection. Useful for
    /// graceful shutdown and testing.
    pub async fn close_all_connections(&self) {
        let conns = self.connections.read().await;
        for (conn, sender) in conns.iter() {
            tracing::info!(conn, "sending close frame to client");
            let _ = sender.send(Message::Close(None));
        }
    }

    /// Sends a snapshot of `collection` to every subscriber.
    ///
    /// Must be called with the document lock held so that snapshots for the
    /// same collection are delivered in change order.
    async fn broadcast_snapshot(&self, store: &DocumentStore, collection: &str) {
        let subs = self.subscribers.read().await;
        let Some(conns) = subs.get(collection) else {
            return;
        };
        let frame = ServerFrame::Snapshot {
            collection: collection.to_string(),
            documents: store.list(collection),
        };
        let bytes = match wire::encode_server(&frame) {
            Ok(b) => b,
            Err(e) => {
                tracing::error!(error = %e, collection, "failed to encode snapshot");
                return;
            }
        };
        tracing::debug!(
            collection,
            subscribers = conns.len(),
            "broadcasting snapshot"
        );
        for sender in conns.values() {
            let _ = sender.send(Message::Binary(bytes.clone().into()));
        }
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// The connection lifecycle:
/// 1. Register the connection.
/// 2. Enter the frame loop, answering requests and managing subscriptions.
/// 3. On disconnect, drop the connection and its subscriptions.
pub async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Create a channel for sending frames to this connection's writer.
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    let conn = state.register(tx.clone()).await;
    tracing::info!(conn, "client connected");

    // Spawn a writer task that forwards frames from the channel to the WebSocket.
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(conn, "WebSocket write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    // Reader loop: process incoming frames from this client.
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_binary_message(conn, &data, &tx, &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(conn, "received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    // Wait for either task to finish, then abort the other.
    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.unregister(conn).await;
    tracing::info!(conn, "client disconnected");
}

/// Handles a binary WebSocket message from a connected client.
async fn handle_binary_message(
    conn: ConnectionId,
    data: &[u8],
    reply: &FrameSender,
    state: &Arc<RelayState>,
) {
    let frame = match wire::decode_client(data) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(conn, error = %e, "failed to decode frame");
            send_frame(
                reply,
                &ServerFrame::Error {
                    request_id: None,
                    reason: e,
                },
            );
            return;
        }
    };

    match frame {
        ClientFrame::Set {
            request_id,
            path,
            document,
        } => {
            let mut store = state.documents.lock().await;
            match store.set(&path, document) {
                Ok(collection) => {
                    tracing::debug!(conn, path = %path, "document set");
                    send_frame(reply, &ServerFrame::Ack { request_id });
                    state.broadcast_snapshot(&store, &collection).await;
                }
                Err(e) => {
                    tracing::warn!(conn, path = %path, error = %e, "set rejected");
                    send_error(reply, request_id, &e);
                }
            }
        }
        ClientFrame::Get { request_id, path } => {
            let result = state.documents.lock().await.get(&path);
            match result {
                Ok(document) => send_frame(
                    reply,
                    &ServerFrame::Document {
                        request_id,
                        document,
                    },
                ),
                Err(e) => send_error(reply, request_id, &e),
            }
        }
        ClientFrame::Delete { request_id, path } => {
            let mut store = state.documents.lock().await;
            match store.delete(&path) {
                Ok((collection, removed)) => {
                    tracing::debug!(conn, path = %path, removed, "document deleted");
                    send_frame(reply, &ServerFrame::Ack { request_id });
                    if removed {
                        state.broadcast_snapshot(&store, &collection).await;
                    }
                }
                Err(e) => send_error(reply, request_id, &e),
            }
        }
        ClientFrame::List {
            request_id,
            collection,
        } => {
            let documents = state.documents.lock().await.list(&collection);
            send_frame(
                reply,
                &ServerFrame::Documents {
                    request_id,
                    documents,
                },
            );
        }
        ClientFrame::Subscribe { collection } => {
            // Hold the store so no change slips between the initial snapshot
            // and the subscription taking effect.
            let store = state.documents.lock().await;
            state
                .subscribers
                .write()
                .await
                .entry(collection.clone())
                .or_default()
                .insert(conn, reply.clone());
            tracing::info!(conn, collection = %collection, "subscribed");
            let documents = store.list(&collection);
            send_frame(
                reply,
                &ServerFrame::Snapshot {
                    collection,
                    documents,
                },
            );
            drop(store);
        }
        ClientFrame::Unsubscribe { collection } => {
            let mut subs = state.subscribers.write().await;
            if let Some(conns) = subs.get_mut(&collection) {
                conns.remove(&conn);
                if conns.is_empty() {
                    subs.remove(&collection);
                }
            }
            tracing::info!(conn, collection = %collection, "unsubscribed");
        }
    }
}

fn send_error(reply: &FrameSender, request_id: u64, error: &impl std::fmt::Display) {
    send_frame(
        reply,
        &ServerFrame::Error {
            request_id: Some(request_id),
            reason: error.to_string(),
        },
    );
}

/// Encodes a frame and queues it on a connection's writer channel.
fn send_frame(reply: &FrameSender, frame: &ServerFrame) {
    match wire::encode_server(frame) {
        Ok(bytes) => {
            let _ = reply.send(Message::Binary(bytes.into()));
        }
        Err(e) => tracing::error!(error = %e, "failed to encode server frame"),
    }
}

/// Starts the relay server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(RelayState::new())).await
}

/// Starts the relay server with a pre-configured [`RelayState`].
///
/// Use [`RelayState::with_store`] with
/// [`crate::config::DocumentLimits::open_store`] to apply configured limits.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<RelayState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "relay server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<RelayState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
