//! WebSocket client of the `taskboard-server` document server.
//!
//! One connection carries every request and live query. Requests are
//! correlated by id; snapshots are routed by subscription id. A background
//! reader task owns the read half and a writer task owns the write half.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use taskboard_proto::query::{Filter, Patch};
use taskboard_proto::value::{Document, StoredDocument};
use taskboard_proto::wire::{self, ClientFrame, FailureKind, Operation, Reply, ServerFrame};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::{GatewayError, RemoteStore, SnapshotEvent, Subscription, SubscriptionHandle};

/// Read half of the server connection.
type WsReader = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;
type LiveQueries = Arc<Mutex<HashMap<u64, mpsc::UnboundedSender<SnapshotEvent>>>>;

/// Connection to a document server.
pub struct RemoteGateway {
    server_url: String,
    outgoing: mpsc::UnboundedSender<Message>,
    pending: PendingReplies,
    subscriptions: LiveQueries,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    request_timeout: Duration,
    reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for RemoteGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteGateway")
            .field("server_url", &self.server_url)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl RemoteGateway {
    /// Connects to `server_url` (e.g. `ws://127.0.0.1:9100/ws`) and opens
    /// the session.
    ///
    /// # Errors
    ///
    /// - [`GatewayError::Timeout`] if the connection or handshake times out.
    /// - [`GatewayError::Unavailable`] if the server cannot be reached.
    /// - [`GatewayError::Protocol`] if the handshake answer is unexpected.
    pub async fn connect(
        server_url: &str,
        user_id: Option<String>,
        connect_timeout: Duration,
        request_timeout: Duration,
    ) -> Result<Self, GatewayError> {
        let (ws_stream, _response) = tokio::time::timeout(connect_timeout, connect_async(server_url))
            .await
            .map_err(|_| {
                tracing::warn!(url = server_url, "WebSocket connect timed out");
                GatewayError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url = server_url, err = %e, "WebSocket connect failed");
                map_ws_connect_error(e)
            })?;

        let (mut ws_sender, mut ws_reader) = ws_stream.split();

        let hello = encode(&ClientFrame::Hello { user_id })?;
        ws_sender
            .send(Message::Binary(hello.into()))
            .await
            .map_err(|e| GatewayError::Unavailable(format!("failed to send hello: {e}")))?;

        let welcome = tokio::time::timeout(connect_timeout, ws_reader.next())
            .await
            .map_err(|_| {
                tracing::warn!(url = server_url, "welcome timed out");
                GatewayError::Timeout
            })?;
        match welcome {
            Some(Ok(Message::Binary(data))) => match wire::decode_server(&data) {
                Ok(ServerFrame::Welcome { version }) => {
                    tracing::info!(url = server_url, version, "connected to document server");
                }
                Ok(ServerFrame::Error { reason }) => {
                    tracing::warn!(reason = %reason, "session rejected");
                    return Err(GatewayError::Rejected(reason));
                }
                Ok(other) => {
                    tracing::warn!(?other, "unexpected frame during handshake");
                    return Err(GatewayError::Protocol(
                        "unexpected frame during handshake".to_string(),
                    ));
                }
                Err(e) => {
                    return Err(GatewayError::Protocol(format!("malformed welcome: {e}")));
                }
            },
            Some(Ok(Message::Close(_))) | None => return Err(GatewayError::ConnectionClosed),
            Some(Ok(_)) => {
                return Err(GatewayError::Protocol(
                    "unexpected non-binary frame during handshake".to_string(),
                ));
            }
            Some(Err(e)) => {
                return Err(GatewayError::Unavailable(format!(
                    "WebSocket error during handshake: {e}"
                )));
            }
        }

        let connected = Arc::new(AtomicBool::new(true));
        let pending = PendingReplies::default();
        let subscriptions = LiveQueries::default();

        let (outgoing, mut rx) = mpsc::unbounded_channel::<Message>();
        let writer_connected = Arc::clone(&connected);
        let writer_handle = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = ws_sender.send(msg).await {
                    tracing::warn!(err = %e, "WebSocket write failed");
                    writer_connected.store(false, Ordering::Relaxed);
                    break;
                }
            }
        });

        let reader_handle = tokio::spawn(reader_loop(
            ws_reader,
            Arc::clone(&pending),
            Arc::clone(&subscriptions),
            Arc::clone(&connected),
        ));

        Ok(Self {
            server_url: server_url.to_string(),
            outgoing,
            pending,
            subscriptions,
            next_id: AtomicU64::new(1),
            connected,
            request_timeout,
            reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// The server URL this gateway is connected to.
    #[must_use]
    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// Whether the connection is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn send_frame(&self, frame: &ClientFrame) -> Result<(), GatewayError> {
        if !self.is_connected() {
            return Err(GatewayError::ConnectionClosed);
        }
        let bytes = encode(frame)?;
        self.outgoing
            .send(Message::Binary(bytes.into()))
            .map_err(|_| GatewayError::ConnectionClosed)
    }

    /// Sends one request and waits for its reply.
    async fn request(&self, op: Operation) -> Result<Reply, GatewayError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let op_name = op.name();
        let target = target_of(&op);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if let Err(e) = self.send_frame(&ClientFrame::Request { id, op }) {
            self.pending.lock().remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(Reply::Failed { kind, reason })) => {
                tracing::debug!(request = id, op = op_name, ?kind, reason = %reason, "request failed");
                Err(map_failure(kind, reason, target))
            }
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(GatewayError::ConnectionClosed),
            Err(_) => {
                self.pending.lock().remove(&id);
                tracing::warn!(request = id, op = op_name, "request timed out");
                Err(GatewayError::Timeout)
            }
        }
    }
}

impl Drop for RemoteGateway {
    fn drop(&mut self) {
        // The writer ends on its own once every sender is gone.
        self.reader_handle.abort();
    }
}

impl RemoteStore for RemoteGateway {
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<StoredDocument>, GatewayError> {
        match self
            .request(Operation::Get {
                collection: collection.to_string(),
                id: id.to_string(),
            })
            .await?
        {
            Reply::Document(doc) => Ok(doc),
            other => Err(unexpected("get", &other)),
        }
    }

    async fn set_fields(&self, collection: &str, id: &str, patch: Patch) -> Result<u64, GatewayError> {
        match self
            .request(Operation::Update {
                collection: collection.to_string(),
                id: id.to_string(),
                patch,
            })
            .await?
        {
            Reply::Written { version } => Ok(version),
            other => Err(unexpected("update", &other)),
        }
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<u64, GatewayError> {
        match self
            .request(Operation::Delete {
                collection: collection.to_string(),
                id: id.to_string(),
            })
            .await?
        {
            Reply::Written { version } => Ok(version),
            other => Err(unexpected("delete", &other)),
        }
    }

    async fn create_document(
        &self,
        collection: &str,
        fields: Document,
    ) -> Result<(String, u64), GatewayError> {
        match self
            .request(Operation::Create {
                collection: collection.to_string(),
                fields,
            })
            .await?
        {
            Reply::Created { id, version } => Ok((id, version)),
            other => Err(unexpected("create", &other)),
        }
    }

    async fn query_where(
        &self,
        collection: &str,
        filter: Filter,
    ) -> Result<Vec<StoredDocument>, GatewayError> {
        match self
            .request(Operation::Query {
                collection: collection.to_string(),
                filter,
            })
            .await?
        {
            Reply::Documents(docs) => Ok(docs),
            other => Err(unexpected("query", &other)),
        }
    }

    async fn list_documents(&self, collection: &str) -> Result<Vec<StoredDocument>, GatewayError> {
        match self
            .request(Operation::List {
                collection: collection.to_string(),
            })
            .await?
        {
            Reply::Documents(docs) => Ok(docs),
            other => Err(unexpected("list", &other)),
        }
    }

    async fn subscribe(
        &self,
        collection: &str,
        filter: Option<Filter>,
    ) -> Result<Subscription, GatewayError> {
        let subscription = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        // Registered first: the initial snapshot precedes the reply.
        self.subscriptions.lock().insert(subscription, tx);

        let result = self
            .request(Operation::Subscribe {
                subscription,
                collection: collection.to_string(),
                filter,
            })
            .await;
        match result {
            Ok(Reply::Subscribed) => {}
            Ok(other) => {
                self.subscriptions.lock().remove(&subscription);
                return Err(unexpected("subscribe", &other));
            }
            Err(e) => {
                self.subscriptions.lock().remove(&subscription);
                return Err(e);
            }
        }
        tracing::debug!(collection, subscription, "live query opened");

        let subscriptions = Arc::clone(&self.subscriptions);
        let outgoing = self.outgoing.clone();
        let handle = SubscriptionHandle::new(move || {
            subscriptions.lock().remove(&subscription);
            match encode(&ClientFrame::Unsubscribe { subscription }) {
                Ok(bytes) => {
                    // A closed connection has already dropped the query.
                    let _ = outgoing.send(Message::Binary(bytes.into()));
                }
                Err(e) => tracing::warn!(subscription, err = %e, "failed to encode unsubscribe"),
            }
        });

        Ok(Subscription {
            snapshots: rx,
            handle,
        })
    }
}

/// Reads server frames and routes replies and snapshots.
///
/// Malformed frames are logged and skipped. When the connection ends every
/// waiting request fails and every live query receives
/// [`GatewayError::ConnectionClosed`].
async fn reader_loop(
    mut ws_reader: WsReader,
    pending: PendingReplies,
    subscriptions: LiveQueries,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg_result) = ws_reader.next().await {
        match msg_result {
            Ok(Message::Binary(data)) => match wire::decode_server(&data) {
                Ok(ServerFrame::Reply { id, reply }) => {
                    let waiter = pending.lock().remove(&id);
                    match waiter {
                        Some(tx) => {
                            let _ = tx.send(reply);
                        }
                        None => tracing::debug!(request = id, "reply for unknown request"),
                    }
                }
                Ok(ServerFrame::Snapshot {
                    subscription,
                    snapshot,
                }) => {
                    let mut subs = subscriptions.lock();
                    let delivered = subs
                        .get(&subscription)
                        .is_some_and(|tx| tx.send(Ok(snapshot)).is_ok());
                    if !delivered {
                        subs.remove(&subscription);
                        tracing::debug!(subscription, "snapshot for closed live query");
                    }
                }
                Ok(ServerFrame::SubscriptionError {
                    subscription,
                    reason,
                }) => {
                    end_live_query(&subscriptions, subscription, reason);
                }
                Ok(ServerFrame::Error { reason }) => {
                    tracing::warn!(reason = %reason, "document server error");
                }
                Ok(ServerFrame::Welcome { .. }) => {
                    tracing::debug!("duplicate welcome ignored");
                }
                Err(e) => {
                    tracing::warn!(err = %e, "malformed server frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("WebSocket closed by server");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(err = %e, "WebSocket read error");
                break;
            }
        }
    }

    connected.store(false, Ordering::Relaxed);
    pending.lock().clear();
    for (_, tx) in subscriptions.lock().drain() {
        let _ = tx.send(Err(GatewayError::ConnectionClosed));
    }
    tracing::info!("gateway reader task exiting");
}

/// Delivers a server-side query failure and closes the query's stream.
///
/// The server drops a failed query, so like a lost connection this is the
/// last event the subscriber sees: its listener reports it and stops.
fn end_live_query(subscriptions: &LiveQueries, subscription: u64, reason: String) {
    tracing::warn!(subscription, reason = %reason, "live query failed");
    if let Some(tx) = subscriptions.lock().remove(&subscription) {
        let _ = tx.send(Err(GatewayError::Rejected(reason)));
    }
}

fn encode(frame: &ClientFrame) -> Result<Vec<u8>, GatewayError> {
    wire::encode_client(frame).map_err(|e| GatewayError::Protocol(e.to_string()))
}

/// Collection and document id an operation targets, for error reporting.
fn target_of(op: &Operation) -> (String, String) {
    match op {
        Operation::Get { collection, id }
        | Operation::Update { collection, id, .. }
        | Operation::Delete { collection, id } => (collection.clone(), id.clone()),
        Operation::Create { collection, .. }
        | Operation::Query { collection, .. }
        | Operation::List { collection }
        | Operation::Subscribe { collection, .. } => (collection.clone(), String::new()),
    }
}

fn map_failure(kind: FailureKind, reason: String, target: (String, String)) -> GatewayError {
    match kind {
        FailureKind::NotFound => {
            let (collection, id) = target;
            GatewayError::NotFound { collection, id }
        }
        FailureKind::Invalid | FailureKind::Internal => GatewayError::Rejected(reason),
    }
}

fn unexpected(op: &str, reply: &Reply) -> GatewayError {
    tracing::warn!(op, ?reply, "unexpected reply");
    GatewayError::Protocol(format!("unexpected reply to {op}"))
}

/// Map a `tokio_tungstenite` connection error to a [`GatewayError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> GatewayError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err) => GatewayError::Unavailable(io_err.to_string()),
        WsError::Http(response) => {
            GatewayError::Unavailable(format!("HTTP error: status {}", response.status()))
        }
        WsError::Url(e) => GatewayError::Unavailable(format!("invalid server URL: {e}")),
        other => GatewayError::Unavailable(format!("connection error: {other}")),
    }
}
