//! Document server core: shared state, WebSocket handler, and request
//! dispatch.
//!
//! Each connection opens with `Hello`, then issues requests that are answered
//! in order. Live queries opened on a connection are closed when it drops.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use taskboard_proto::engine::EngineError;
use taskboard_proto::wire::{self, ClientFrame, FailureKind, Operation, Reply, ServerFrame};
use tokio::sync::mpsc;

use crate::documents::{DocumentStore, send_frame};

/// Default maximum allowed frame size in bytes (1 MB).
const DEFAULT_MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Shared server state.
#[derive(Debug)]
pub struct ServerState {
    /// The documents and their live queries.
    pub store: DocumentStore,
    /// Maximum allowed frame size in bytes.
    max_payload_size: usize,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    /// Creates an empty store with the default frame size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_PAYLOAD_SIZE, DocumentStore::new())
    }

    /// Creates state around a prepared store with a custom frame size limit.
    #[must_use]
    pub const fn with_config(max_payload_size: usize, store: DocumentStore) -> Self {
        Self {
            store,
            max_payload_size,
        }
    }
}

/// Live queries opened on one connection: client subscription id to store
/// watch key.
type ConnectionWatches = HashMap<u64, u64>;

/// Handles an upgraded WebSocket connection.
///
/// The connection lifecycle:
/// 1. Wait for `Hello` and answer `Welcome`.
/// 2. Answer each request in arrival order.
/// 3. On disconnect, close every live query the connection opened.
pub async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(user_id) = wait_for_hello(&mut ws_receiver).await else {
        tracing::warn!("connection closed before hello");
        return;
    };
    let user = user_id.unwrap_or_else(|| "anonymous".to_string());

    let welcome = ServerFrame::Welcome {
        version: state.store.version().await,
    };
    if let Err(e) = send_server_frame(&mut ws_sender, &welcome).await {
        tracing::error!(user = %user, error = %e, "failed to send welcome");
        return;
    }
    tracing::info!(user = %user, "client connected");

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let writer_user = user.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(user = %writer_user, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_user = user.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        let mut watches = ConnectionWatches::new();
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_binary_message(&reader_user, &data, &reader_state, &tx, &mut watches)
                        .await;
                }
                Message::Close(_) => {
                    tracing::info!(user = %reader_user, "received close frame");
                    break;
                }
                _ => {}
            }
        }
        watches
    });

    let watches = tokio::select! {
        result = &mut read_task => {
            write_task.abort();
            result.unwrap_or_default()
        }
        _ = &mut write_task => {
            read_task.abort();
            ConnectionWatches::new()
        }
    };

    for key in watches.values() {
        state.store.unwatch(*key).await;
    }
    let remaining = state.store.watch_count().await;
    tracing::info!(
        user = %user,
        closed = watches.len(),
        remaining,
        "client disconnected"
    );
}

/// Waits for the opening `Hello`. Returns the announced user (which may be
/// `None`), or `None` if the connection closes or sends anything else.
async fn wait_for_hello(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<Option<String>> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => match wire::decode_client(&data) {
                Ok(ClientFrame::Hello { user_id }) => return Some(user_id),
                Ok(other) => {
                    tracing::warn!(frame = ?other, "expected Hello, got different frame");
                    return None;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to decode hello frame");
                    return None;
                }
            },
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Handles one binary frame from a connected client.
async fn handle_binary_message(
    user: &str,
    data: &[u8],
    state: &Arc<ServerState>,
    tx: &mpsc::UnboundedSender<Message>,
    watches: &mut ConnectionWatches,
) {
    if data.len() > state.max_payload_size {
        tracing::warn!(
            user = %user,
            size = data.len(),
            max = state.max_payload_size,
            "frame exceeds size limit"
        );
        send_frame(
            tx,
            &ServerFrame::Error {
                reason: format!(
                    "payload too large: {} bytes (max {})",
                    data.len(),
                    state.max_payload_size
                ),
            },
        );
        return;
    }

    let frame = match wire::decode_client(data) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(user = %user, error = %e, "failed to decode frame");
            send_frame(
                tx,
                &ServerFrame::Error {
                    reason: format!("malformed frame: {e}"),
                },
            );
            return;
        }
    };

    match frame {
        ClientFrame::Request { id, op } => {
            tracing::debug!(user = %user, request = id, op = op.name(), "request");
            let reply = dispatch(state, op, tx, watches).await;
            if let Reply::Failed { kind, reason } = &reply {
                tracing::debug!(user = %user, request = id, ?kind, reason = %reason, "request failed");
            }
            send_frame(tx, &ServerFrame::Reply { id, reply });
        }
        ClientFrame::Unsubscribe { subscription } => {
            if let Some(key) = watches.remove(&subscription) {
                state.store.unwatch(key).await;
                tracing::debug!(user = %user, subscription, "subscription closed");
            }
        }
        ClientFrame::Hello { .. } => {
            tracing::warn!(user = %user, "received duplicate Hello");
        }
    }
}

/// Executes one operation against the store.
async fn dispatch(
    state: &Arc<ServerState>,
    op: Operation,
    tx: &mpsc::UnboundedSender<Message>,
    watches: &mut ConnectionWatches,
) -> Reply {
    let store = &state.store;
    match op {
        Operation::Get { collection, id } => Reply::Document(store.get(&collection, &id).await),
        Operation::Update {
            collection,
            id,
            patch,
        } => match store.update(&collection, &id, &patch).await {
            Ok(commit) => Reply::Written {
                version: commit.version,
            },
            Err(e @ EngineError::NotFound { .. }) => Reply::Failed {
                kind: FailureKind::NotFound,
                reason: e.to_string(),
            },
        },
        Operation::Delete { collection, id } => Reply::Written {
            version: store.delete(&collection, &id).await.version,
        },
        Operation::Create { collection, fields } => {
            let commit = store.create(&collection, fields).await;
            Reply::Created {
                id: commit.id,
                version: commit.version,
            }
        }
        Operation::Query { collection, filter } => {
            Reply::Documents(store.query(&collection, &filter).await)
        }
        Operation::List { collection } => Reply::Documents(store.list(&collection).await),
        Operation::Subscribe {
            subscription,
            collection,
            filter,
        } => {
            if watches.contains_key(&subscription) {
                return Reply::Failed {
                    kind: FailureKind::Invalid,
                    reason: format!("subscription {subscription} already open"),
                };
            }
            let key = store
                .watch(subscription, &collection, filter, tx.clone())
                .await;
            watches.insert(subscription, key);
            Reply::Subscribed
        }
    }
}

/// Encodes and sends a server frame directly on a WebSocket sender.
async fn send_server_frame(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    frame: &ServerFrame,
) -> Result<(), String> {
    let bytes = wire::encode_server(frame).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts the server on the given address with empty state and returns the
/// bound address and a join handle.
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
    start_server_with_state(addr, Arc::new(ServerState::new())).await
}

/// Starts the server with prepared [`ServerState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ServerState>,
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
            tracing::error!(error = %e, "document server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
