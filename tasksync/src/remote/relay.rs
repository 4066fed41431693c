//! WebSocket [`RemoteStore`] backed by `tasksync-relay`.
//!
//! Requests carry a client-chosen id and are matched to replies by the
//! background reader task. Collection snapshots pushed by the relay are
//! fanned out to every local watcher of that collection. When the link
//! drops the reader fails outstanding requests with
//! [`RemoteError::ConnectionClosed`], notifies watchers the same way and
//! flips the shared [`ConnectivityObserver`] to disconnected.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use tasksync_proto::document::Document;
use tasksync_proto::wire::{self, ClientFrame, ServerFrame};

use super::{RemoteError, RemoteStore, SnapshotStream};
use crate::connectivity::ConnectivityObserver;

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

type Watcher = mpsc::UnboundedSender<Result<Vec<Document>, RemoteError>>;

/// Default timeout for connecting to the relay server.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a request waits for its reply before giving up.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// State shared between the handle and its reader task.
#[derive(Default)]
struct Shared {
    /// Outstanding requests by id.
    pending: SyncMutex<HashMap<u64, oneshot::Sender<ServerFrame>>>,
    /// Local watchers by collection path.
    watchers: SyncMutex<HashMap<String, Vec<Watcher>>>,
}

/// Remote store client speaking the relay's binary frame protocol.
///
/// Created via [`RelayRemote::connect`], which establishes the WebSocket
/// connection and spawns a background reader task.
pub struct RelayRemote {
    /// The relay server URL (ws:// or wss://).
    relay_url: String,
    /// Write half of the WebSocket connection (shared for concurrent sends).
    ws_sender: Arc<Mutex<WsSender>>,
    shared: Arc<Shared>,
    /// Whether the WebSocket connection to the relay is active.
    connected: Arc<AtomicBool>,
    next_request_id: AtomicU64,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl RelayRemote {
    /// Connect to a relay server.
    ///
    /// On success `connectivity` is set to connected; when the link later
    /// drops it is set to disconnected.
    ///
    /// # Errors
    ///
    /// - [`RemoteError::InvalidUrl`] if the URL is malformed or not ws/wss.
    /// - [`RemoteError::Timeout`] if the connection times out.
    /// - [`RemoteError::Unavailable`] if the relay cannot be reached.
    pub async fn connect(
        relay_url: &str,
        connectivity: ConnectivityObserver,
    ) -> Result<Self, RemoteError> {
        let parsed =
            url::Url::parse(relay_url).map_err(|e| RemoteError::InvalidUrl(e.to_string()))?;
        if !matches!(parsed.scheme(), "ws" | "wss") {
            return Err(RemoteError::InvalidUrl(format!(
                "unsupported scheme: {}",
                parsed.scheme()
            )));
        }

        let (ws_stream, _response) =
            tokio::time::timeout(CONNECT_TIMEOUT, connect_async(relay_url))
                .await
                .map_err(|_| {
                    tracing::warn!(url = relay_url, "relay WebSocket connect timed out");
                    RemoteError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url = relay_url, error = %e, "relay WebSocket connect failed");
                    map_ws_connect_error(e)
                })?;

        let (ws_sender, ws_reader) = ws_stream.split();
        let ws_sender = Arc::new(Mutex::new(ws_sender));
        let shared = Arc::new(Shared::default());
        let connected = Arc::new(AtomicBool::new(true));

        let reader_handle = tokio::spawn(reader_loop(
            ws_reader,
            Arc::clone(&ws_sender),
            Arc::clone(&shared),
            Arc::clone(&connected),
            connectivity.clone(),
        ));

        tracing::info!(url = relay_url, "connected to relay server");
        connectivity.set_connected(true);

        Ok(Self {
            relay_url: relay_url.to_string(),
            ws_sender,
            shared,
            connected,
            next_request_id: AtomicU64::new(1),
            reader_handle,
        })
    }

    /// Return the relay server URL this client is connected to.
    #[must_use]
    pub fn relay_url(&self) -> &str {
        &self.relay_url
    }

    /// Whether the WebSocket connection is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Sends `frame` and waits for the reply carrying the same request id.
    async fn request(&self, request_id: u64, frame: ClientFrame) -> Result<ServerFrame, RemoteError> {
        if !self.is_connected() {
            return Err(RemoteError::ConnectionClosed);
        }
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(request_id, tx);

        if let Err(e) = send_frame(&self.ws_sender, &frame).await {
            self.shared.pending.lock().remove(&request_id);
            if e == RemoteError::ConnectionClosed {
                self.connected.store(false, Ordering::Relaxed);
            }
            return Err(e);
        }

        let reply = match tokio::time::timeout(REQUEST_TIMEOUT, rx).await {
            Ok(Ok(reply)) => reply,
            // Sender dropped: the reader exited and failed every request.
            Ok(Err(_)) => return Err(RemoteError::ConnectionClosed),
            Err(_) => {
                self.shared.pending.lock().remove(&request_id);
                tracing::warn!(request_id, "relay request timed out");
                return Err(RemoteError::Timeout);
            }
        };

        match reply {
            ServerFrame::Error { reason, .. } => Err(RemoteError::Rejected(reason)),
            other => Ok(other),
        }
    }
}

impl Drop for RelayRemote {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

impl RemoteStore for RelayRemote {
    async fn get_document(&self, path: &str) -> Result<Option<Document>, RemoteError> {
        let request_id = self.next_id();
        let frame = ClientFrame::Get {
            request_id,
            path: path.to_string(),
        };
        match self.request(request_id, frame).await? {
            ServerFrame::Document { document, .. } => Ok(document),
            other => Err(unexpected(&other)),
        }
    }

    async fn set_document(&self, path: &str, document: Document) -> Result<(), RemoteError> {
        let request_id = self.next_id();
        let frame = ClientFrame::Set {
            request_id,
            path: path.to_string(),
            document,
        };
        match self.request(request_id, frame).await? {
            ServerFrame::Ack { .. } => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn delete_document(&self, path: &str) -> Result<(), RemoteError> {
        let request_id = self.next_id();
        let frame = ClientFrame::Delete {
            request_id,
            path: path.to_string(),
        };
        match self.request(request_id, frame).await? {
            ServerFrame::Ack { .. } => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn list_documents(&self, collection: &str) -> Result<Vec<Document>, RemoteError> {
        let request_id = self.next_id();
        let frame = ClientFrame::List {
            request_id,
            collection: collection.to_string(),
        };
        match self.request(request_id, frame).await? {
            ServerFrame::Documents { documents, .. } => Ok(documents),
            other => Err(unexpected(&other)),
        }
    }

    async fn watch_collection(&self, collection: &str) -> Result<SnapshotStream, RemoteError> {
        if !self.is_connected() {
            return Err(RemoteError::ConnectionClosed);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.shared
            .watchers
            .lock()
            .entry(collection.to_string())
            .or_default()
            .push(tx);

        // The relay answers a subscribe with the current snapshot.
        let frame = ClientFrame::Subscribe {
            collection: collection.to_string(),
        };
        send_frame(&self.ws_sender, &frame).await?;
        tracing::debug!(collection, "watching collection");
        Ok(rx)
    }
}

async fn send_frame(sender: &Mutex<WsSender>, frame: &ClientFrame) -> Result<(), RemoteError> {
    let mut sender = sender.lock().await;
    write_frame(&mut sender, frame).await
}

async fn write_frame(sender: &mut WsSender, frame: &ClientFrame) -> Result<(), RemoteError> {
    let bytes = wire::encode_client(frame).map_err(RemoteError::Codec)?;
    sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, "relay send failed");
            RemoteError::ConnectionClosed
        })
}

fn unexpected(frame: &ServerFrame) -> RemoteError {
    tracing::warn!(?frame, "unexpected relay reply");
    RemoteError::Codec("unexpected reply frame".to_string())
}

/// Background task that reads WebSocket messages and dispatches them.
///
/// Replies go to the waiting request; snapshots go to the collection's
/// watchers. Malformed frames are logged and skipped; the task does not
/// disconnect on bad data.
async fn reader_loop(
    mut ws_reader: WsReader,
    ws_sender: Arc<Mutex<WsSender>>,
    shared: Arc<Shared>,
    connected: Arc<AtomicBool>,
    connectivity: ConnectivityObserver,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => match wire::decode_server(&data) {
                Ok(ServerFrame::Snapshot {
                    collection,
                    documents,
                }) => {
                    let abandoned = deliver_snapshot(&shared, &collection, documents);
                    if abandoned {
                        let sender = Arc::clone(&ws_sender);
                        let shared = Arc::clone(&shared);
                        tokio::spawn(async move {
                            let _ = unsubscribe_abandoned(&sender, &shared, collection).await;
                        });
                    }
                }
                Ok(ServerFrame::Error {
                    request_id: None,
                    reason,
                }) => {
                    tracing::warn!(reason = %reason, "relay server error");
                }
                Ok(frame) => {
                    let waiter = frame
                        .request_id()
                        .and_then(|id| shared.pending.lock().remove(&id));
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(frame);
                        }
                        None => tracing::debug!(?frame, "reply for unknown request"),
                    }
                }
                Err(e) => {
                    tracing::warn!(error = %e, "malformed relay frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("relay WebSocket closed by server");
                break;
            }
            Ok(Message::Ping(_) | Message::Pong(_) | Message::Text(_) | Message::Frame(_)) => {}
            Err(e) => {
                tracing::warn!(error = %e, "relay WebSocket read error");
                break;
            }
        }
    }

    connected.store(false, Ordering::Relaxed);
    // Dropping the senders wakes every waiting request.
    shared.pending.lock().clear();
    for (_, list) in shared.watchers.lock().drain() {
        for tx in list {
            let _ = tx.send(Err(RemoteError::ConnectionClosed));
        }
    }
    connectivity.set_connected(false);
    tracing::info!("relay reader task exiting");
}

/// Asks the relay to stop pushing `collection` unless a watcher registered
/// again meanwhile. Returns whether the frame was sent.
///
/// The check runs under the sender lock. `watch_collection` registers its
/// watcher before taking that lock, so its `Subscribe` is never followed by
/// this `Unsubscribe`.
async fn unsubscribe_abandoned(
    sender: &Mutex<WsSender>,
    shared: &Shared,
    collection: String,
) -> Result<bool, RemoteError> {
    let mut sender = sender.lock().await;
    if shared.watchers.lock().contains_key(&collection) {
        tracing::debug!(collection, "collection watched again, keeping subscription");
        return Ok(false);
    }
    write_frame(&mut sender, &ClientFrame::Unsubscribe { collection }).await?;
    Ok(true)
}

/// Sends `documents` to every live watcher of `collection`. Returns `true`
/// when the collection has no watchers left.
fn deliver_snapshot(shared: &Shared, collection: &str, documents: Vec<Document>) -> bool {
    let mut watchers = shared.watchers.lock();
    let Some(list) = watchers.get_mut(collection) else {
        return true;
    };
    list.retain(|tx| tx.send(Ok(documents.clone())).is_ok());
    if list.is_empty() {
        watchers.remove(collection);
        return true;
    }
    false
}

/// Map a `tokio_tungstenite` connection error to a [`RemoteError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> RemoteError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => RemoteError::Unavailable(io_err.to_string()),
        WsError::Tls(_) => RemoteError::Unavailable(format!("TLS error: {err}")),
        WsError::Http(response) => {
            RemoteError::Unavailable(format!("relay HTTP error: status {}", response.status()))
        }
        WsError::Url(e) => RemoteError::InvalidUrl(e.to_string()),
        other => RemoteError::Unavailable(format!("relay connection error: {other}")),
    }
}
