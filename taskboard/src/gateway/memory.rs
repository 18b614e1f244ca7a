//! In-process [`RemoteStore`] backed by the shared document engine.
//!
//! Used by tests and by embedders that want an in-process store. Faults
//! can be injected per collection to exercise rollback paths, and writes
//! can be held open to observe optimistic state while a write is in flight.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use taskboard_proto::engine::{DocumentEngine, EngineError, Snapshot};
use taskboard_proto::query::{Filter, Patch};
use taskboard_proto::value::{Document, StoredDocument};
use tokio::sync::{mpsc, watch};

use super::{GatewayError, RemoteStore, SnapshotEvent, Subscription, SubscriptionHandle};

/// Which operations an injected fault applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultScope {
    /// Writes only (update, delete, create).
    Writes,
    /// Every operation, including reads and subscribe.
    All,
}

#[derive(Debug, Clone)]
struct Fault {
    scope: FaultScope,
    reason: String,
}

#[derive(Debug)]
struct Watcher {
    collection: String,
    sender: mpsc::UnboundedSender<SnapshotEvent>,
}

#[derive(Debug, Default)]
struct Inner {
    engine: DocumentEngine,
    watchers: HashMap<u64, Watcher>,
    next_key: u64,
    faults: HashMap<String, Fault>,
}

impl Inner {
    fn check(&self, collection: &str, write: bool) -> Result<(), GatewayError> {
        match self.faults.get(collection) {
            Some(fault) if write || fault.scope == FaultScope::All => {
                Err(GatewayError::Unavailable(fault.reason.clone()))
            }
            _ => Ok(()),
        }
    }

    fn deliver(&mut self, notify: Vec<(u64, Snapshot)>) {
        for (key, snapshot) in notify {
            let delivered = self
                .watchers
                .get(&key)
                .is_some_and(|w| w.sender.send(Ok(snapshot)).is_ok());
            if !delivered {
                // Receiver dropped without cancelling.
                self.watchers.remove(&key);
                self.engine.unwatch(key);
            }
        }
    }
}

/// In-memory document store.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    writes_open: watch::Sender<bool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Creates an empty store at version 0.
    #[must_use]
    pub fn new() -> Self {
        let (writes_open, _) = watch::channel(true);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            writes_open,
        }
    }

    /// Writes a document under a chosen id, bypassing faults and holds.
    /// Returns the commit version.
    pub fn seed(&self, collection: &str, id: &str, fields: Document) -> u64 {
        let mut inner = self.inner.lock();
        let commit = inner.engine.put(collection, id, fields);
        inner.deliver(commit.notify);
        commit.version
    }

    /// Reads a document, bypassing faults.
    #[must_use]
    pub fn document(&self, collection: &str, id: &str) -> Option<StoredDocument> {
        self.inner.lock().engine.get(collection, id)
    }

    /// Lists a collection, bypassing faults.
    #[must_use]
    pub fn documents(&self, collection: &str) -> Vec<StoredDocument> {
        self.inner.lock().engine.list(collection)
    }

    /// Current store version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.lock().engine.version()
    }

    /// Number of open live queries.
    #[must_use]
    pub fn watch_count(&self) -> usize {
        self.inner.lock().watchers.len()
    }

    /// Makes operations on `collection` fail with
    /// [`GatewayError::Unavailable`].
    pub fn inject_fault(&self, collection: &str, scope: FaultScope, reason: impl Into<String>) {
        self.inner.lock().faults.insert(
            collection.to_string(),
            Fault {
                scope,
                reason: reason.into(),
            },
        );
    }

    /// Removes every injected fault.
    pub fn clear_faults(&self) {
        self.inner.lock().faults.clear();
    }

    /// Pushes an error event to every live query on `collection`.
    pub fn fail_subscriptions(&self, collection: &str, reason: &str) {
        let inner = self.inner.lock();
        for watcher in inner.watchers.values().filter(|w| w.collection == collection) {
            let _ = watcher
                .sender
                .send(Err(GatewayError::Unavailable(reason.to_string())));
        }
    }

    /// Holds every subsequent write until [`release_writes`](Self::release_writes).
    pub fn hold_writes(&self) {
        self.writes_open.send_replace(false);
    }

    /// Lets held writes proceed.
    pub fn release_writes(&self) {
        self.writes_open.send_replace(true);
    }

    async fn write_gate(&self) {
        let mut open = self.writes_open.subscribe();
        // The sender lives in `self`, so the wait cannot fail.
        let _ = open.wait_for(|open| *open).await;
    }
}

impl RemoteStore for MemoryStore {
    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<StoredDocument>, GatewayError> {
        let inner = self.inner.lock();
        inner.check(collection, false)?;
        Ok(inner.engine.get(collection, id))
    }

    async fn set_fields(&self, collection: &str, id: &str, patch: Patch) -> Result<u64, GatewayError> {
        self.write_gate().await;
        let mut inner = self.inner.lock();
        inner.check(collection, true)?;
        let commit = inner
            .engine
            .update(collection, id, &patch)
            .map_err(|e| match e {
                EngineError::NotFound { collection, id } => GatewayError::NotFound { collection, id },
            })?;
        inner.deliver(commit.notify);
        Ok(commit.version)
    }

    async fn delete_document(&self, collection: &str, id: &str) -> Result<u64, GatewayError> {
        self.write_gate().await;
        let mut inner = self.inner.lock();
        inner.check(collection, true)?;
        let commit = inner.engine.delete(collection, id);
        inner.deliver(commit.notify);
        Ok(commit.version)
    }

    async fn create_document(
        &self,
        collection: &str,
        fields: Document,
    ) -> Result<(String, u64), GatewayError> {
        self.write_gate().await;
        let mut inner = self.inner.lock();
        inner.check(collection, true)?;
        let commit = inner.engine.create(collection, fields);
        inner.deliver(commit.notify);
        Ok((commit.id, commit.version))
    }

    async fn query_where(
        &self,
        collection: &str,
        filter: Filter,
    ) -> Result<Vec<StoredDocument>, GatewayError> {
        let inner = self.inner.lock();
        inner.check(collection, false)?;
        Ok(inner.engine.query(collection, &filter))
    }

    async fn list_documents(&self, collection: &str) -> Result<Vec<StoredDocument>, GatewayError> {
        let inner = self.inner.lock();
        inner.check(collection, false)?;
        Ok(inner.engine.list(collection))
    }

    async fn subscribe(
        &self,
        collection: &str,
        filter: Option<Filter>,
    ) -> Result<Subscription, GatewayError> {
        let mut inner = self.inner.lock();
        inner.check(collection, false)?;

        let key = inner.next_key;
        inner.next_key += 1;
        let (tx, rx) = mpsc::unbounded_channel();
        let initial = inner.engine.watch(key, collection, filter);
        let _ = tx.send(Ok(initial));
        inner.watchers.insert(
            key,
            Watcher {
                collection: collection.to_string(),
                sender: tx,
            },
        );
        drop(inner);

        let shared = Arc::clone(&self.inner);
        let handle = SubscriptionHandle::new(move || {
            let mut inner = shared.lock();
            inner.watchers.remove(&key);
            inner.engine.unwatch(key);
        });
        tracing::debug!(collection, key, "memory subscription opened");
        Ok(Subscription {
            snapshots: rx,
            handle,
        })
    }
}
