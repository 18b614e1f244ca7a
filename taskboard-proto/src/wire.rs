//! Wire protocol between Taskboard clients and the document server.
//!
//! Frames are postcard-encoded and carried in WebSocket binary messages.
//! A client opens with [`ClientFrame::Hello`]; the server answers with
//! [`ServerFrame::Welcome`]. Every [`ClientFrame::Request`] carries a
//! client-chosen id echoed back in exactly one [`ServerFrame::Reply`].
//! Live queries are keyed by a client-chosen subscription id so the client
//! can route a snapshot that arrives before the subscribe reply.

use serde::{Deserialize, Serialize};

use crate::engine::Snapshot;
use crate::query::{Filter, Patch};
use crate::value::{Document, StoredDocument};

/// Error type for wire encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// One operation against a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operation {
    /// Read one document.
    Get {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },
    /// Merge a patch into an existing document.
    Update {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
        /// Field updates.
        patch: Patch,
    },
    /// Delete a document.
    Delete {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },
    /// Create a document under a server-generated id.
    Create {
        /// Collection name.
        collection: String,
        /// Document body.
        fields: Document,
    },
    /// Documents matching a filter.
    Query {
        /// Collection name.
        collection: String,
        /// Filter to apply.
        filter: Filter,
    },
    /// Every document of a collection.
    List {
        /// Collection name.
        collection: String,
    },
    /// Open a live query.
    Subscribe {
        /// Client-chosen subscription id, unique per connection.
        subscription: u64,
        /// Collection name.
        collection: String,
        /// Optional filter; `None` watches the whole collection.
        filter: Option<Filter>,
    },
}

impl Operation {
    /// Short name used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::Create { .. } => "create",
            Self::Query { .. } => "query",
            Self::List { .. } => "list",
            Self::Subscribe { .. } => "subscribe",
        }
    }
}

/// Frames sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientFrame {
    /// Opens the session. Must be the first frame.
    Hello {
        /// Acting user, if signed in. Informational only.
        user_id: Option<String>,
    },
    /// A request expecting one reply.
    Request {
        /// Client-chosen request id.
        id: u64,
        /// The operation.
        op: Operation,
    },
    /// Closes a live query. Unknown ids are ignored.
    Unsubscribe {
        /// Subscription id given at subscribe time.
        subscription: u64,
    },
}

/// Why a request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// The target document does not exist.
    NotFound,
    /// The request was not acceptable (e.g. sent before `Hello`).
    Invalid,
    /// The server failed while processing the request.
    Internal,
}

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    /// Result of [`Operation::Get`].
    Document(Option<StoredDocument>),
    /// A write committed at `version`.
    Written {
        /// Store version of the commit.
        version: u64,
    },
    /// A document was created.
    Created {
        /// Generated id.
        id: String,
        /// Store version of the commit.
        version: u64,
    },
    /// Result of [`Operation::Query`] or [`Operation::List`].
    Documents(Vec<StoredDocument>),
    /// The live query is registered; its first snapshot has been sent.
    Subscribed,
    /// The request failed.
    Failed {
        /// Failure category.
        kind: FailureKind,
        /// Human-readable description.
        reason: String,
    },
}

/// Frames sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerFrame {
    /// Answer to [`ClientFrame::Hello`].
    Welcome {
        /// Store version at connect time.
        version: u64,
    },
    /// Answer to a [`ClientFrame::Request`].
    Reply {
        /// Echoed request id.
        id: u64,
        /// The outcome.
        reply: Reply,
    },
    /// Fresh result set of a live query.
    Snapshot {
        /// Subscription id.
        subscription: u64,
        /// Matching documents and the version they reflect.
        snapshot: Snapshot,
    },
    /// A live query failed and will deliver nothing more.
    SubscriptionError {
        /// Subscription id.
        subscription: u64,
        /// Human-readable description.
        reason: String,
    },
    /// Connection-level error not tied to a request.
    Error {
        /// Human-readable description.
        reason: String,
    },
}

/// Encodes a client frame using postcard.
///
/// # Errors
///
/// Returns `WireError::Serialization` if the frame cannot be serialized.
pub fn encode_client(frame: &ClientFrame) -> Result<Vec<u8>, WireError> {
    postcard::to_allocvec(frame).map_err(|e| WireError::Serialization(e.to_string()))
}

/// Decodes a client frame.
///
/// # Errors
///
/// Returns `WireError::Serialization` if the bytes are not a valid frame.
pub fn decode_client(bytes: &[u8]) -> Result<ClientFrame, WireError> {
    postcard::from_bytes(bytes).map_err(|e| WireError::Serialization(e.to_string()))
}

/// Encodes a server frame using postcard.
///
/// # Errors
///
/// Returns `WireError::Serialization` if the frame cannot be serialized.
pub fn encode_server(frame: &ServerFrame) -> Result<Vec<u8>, WireError> {
    postcard::to_allocvec(frame).map_err(|e| WireError::Serialization(e.to_string()))
}

/// Decodes a server frame.
///
/// # Errors
///
/// Returns `WireError::Serialization` if the bytes are not a valid frame.
pub fn decode_server(bytes: &[u8]) -> Result<ServerFrame, WireError> {
    postcard::from_bytes(bytes).map_err(|e| WireError::Serialization(e.to_string()))
}
