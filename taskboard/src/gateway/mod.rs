//! Remote document store abstraction.
//!
//! Defines the [`RemoteStore`] trait the task ledger, group directory and
//! activity writer persist through. Implementations:
//! - [`memory::MemoryStore`]: in-process store with fault injection
//! - [`remote::RemoteGateway`]: WebSocket client of `taskboard-server`

pub mod memory;
pub mod remote;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use taskboard_proto::engine::Snapshot;
use taskboard_proto::query::{Filter, Patch};
use taskboard_proto::value::{Document, StoredDocument};
use tokio::sync::mpsc;

/// Errors returned by remote store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    /// The target document does not exist.
    #[error("document {collection}/{id} not found")]
    NotFound {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },

    /// The store is unreachable or refused to serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The store rejected the request.
    #[error("request rejected: {0}")]
    Rejected(String),

    /// The connection to the store has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The store answered with something unexpected.
    #[error("protocol error: {0}")]
    Protocol(String),
}

/// One item delivered on a live query: a fresh result set, or an error
/// after which the query may keep running.
pub type SnapshotEvent = Result<Snapshot, GatewayError>;

/// Cancels a live query. Clones share the same cancellation state.
#[derive(Clone)]
pub struct SubscriptionHandle {
    cancelled: Arc<AtomicBool>,
    on_cancel: Arc<dyn Fn() + Send + Sync>,
}

impl fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SubscriptionHandle {
    /// Wraps the store-specific action that detaches the query.
    pub fn new(on_cancel: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            on_cancel: Arc::new(on_cancel),
        }
    }

    /// Detaches the query. Returns `false` if it was already cancelled.
    pub fn cancel(&self) -> bool {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return false;
        }
        (self.on_cancel)();
        true
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// A live query: its snapshot stream and the handle that stops it.
#[derive(Debug)]
pub struct Subscription {
    /// Snapshots in version order. The first one arrives immediately.
    pub snapshots: mpsc::UnboundedReceiver<SnapshotEvent>,
    /// Stops the query.
    pub handle: SubscriptionHandle,
}

/// Async document store with collections, partial updates, single-field
/// queries and live result sets.
///
/// Every write returns the store-wide version stamped on it; snapshots carry
/// the version they reflect, so callers can tell whether a snapshot already
/// includes a given write.
pub trait RemoteStore: Send + Sync {
    /// Reads one document; `None` if it does not exist.
    fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<Option<StoredDocument>, GatewayError>> + Send;

    /// Atomically merges `patch` into an existing document.
    ///
    /// Fails with [`GatewayError::NotFound`] if the document is missing.
    fn set_fields(
        &self,
        collection: &str,
        id: &str,
        patch: Patch,
    ) -> impl Future<Output = Result<u64, GatewayError>> + Send;

    /// Deletes a document. Deleting a missing document succeeds.
    fn delete_document(
        &self,
        collection: &str,
        id: &str,
    ) -> impl Future<Output = Result<u64, GatewayError>> + Send;

    /// Creates a document under a store-generated id.
    fn create_document(
        &self,
        collection: &str,
        fields: Document,
    ) -> impl Future<Output = Result<(String, u64), GatewayError>> + Send;

    /// Documents matching a single-field filter.
    fn query_where(
        &self,
        collection: &str,
        filter: Filter,
    ) -> impl Future<Output = Result<Vec<StoredDocument>, GatewayError>> + Send;

    /// Every document of a collection.
    fn list_documents(
        &self,
        collection: &str,
    ) -> impl Future<Output = Result<Vec<StoredDocument>, GatewayError>> + Send;

    /// Opens a live query over a collection.
    fn subscribe(
        &self,
        collection: &str,
        filter: Option<Filter>,
    ) -> impl Future<Output = Result<Subscription, GatewayError>> + Send;
}
