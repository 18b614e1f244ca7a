//! Shared document store for the server: collections, writes, and live
//! query fan-out.
//!
//! [`DocumentStore`] wraps a [`DocumentEngine`] together with the senders of
//! every live subscription. Writes and snapshot delivery happen under the
//! same lock, so each subscriber observes snapshots in version order.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::Message;
use taskboard_proto::engine::{Commit, DocumentEngine, EngineError, Snapshot};
use taskboard_proto::query::{Filter, Patch};
use taskboard_proto::value::{self, Document, StoredDocument};
use taskboard_proto::wire::{self, ServerFrame};
use tokio::sync::{RwLock, mpsc};

/// Errors raised while loading seed data.
#[derive(Debug, thiserror::Error)]
pub enum DocumentError {
    /// Failed to read the seed file.
    #[error("failed to read seed file {path}: {source}")]
    ReadSeed {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The seed file is not valid JSON.
    #[error("failed to parse seed file: {0}")]
    ParseSeed(#[from] serde_json::Error),

    /// The seed file is JSON but not shaped as collections of documents.
    #[error("invalid seed data: {0}")]
    InvalidSeed(String),
}

/// Where snapshots for one live query are delivered.
#[derive(Debug)]
struct Watcher {
    subscription: u64,
    sender: mpsc::UnboundedSender<Message>,
}

#[derive(Debug, Default)]
struct Inner {
    engine: DocumentEngine,
    watchers: HashMap<u64, Watcher>,
}

impl Inner {
    /// Sends each owed snapshot to its watcher. A closed channel only means
    /// the connection is going away; its cleanup removes the watch.
    fn deliver(&self, notify: Vec<(u64, Snapshot)>) {
        for (key, snapshot) in notify {
            if let Some(watcher) = self.watchers.get(&key) {
                send_frame(
                    &watcher.sender,
                    &ServerFrame::Snapshot {
                        subscription: watcher.subscription,
                        snapshot,
                    },
                );
            }
        }
    }
}

/// Encodes a frame and queues it on a connection's writer channel.
pub(crate) fn send_frame(sender: &mpsc::UnboundedSender<Message>, frame: &ServerFrame) {
    match wire::encode_server(frame) {
        Ok(bytes) => {
            let _ = sender.send(Message::Binary(bytes.into()));
        }
        Err(e) => tracing::error!(error = %e, "failed to encode server frame"),
    }
}

/// Thread-safe document store with live query fan-out.
#[derive(Debug, Default)]
pub struct DocumentStore {
    inner: RwLock<Inner>,
    next_watch_key: AtomicU64,
}

impl DocumentStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current store version.
    pub async fn version(&self) -> u64 {
        self.inner.read().await.engine.version()
    }

    /// Number of live subscriptions across all connections.
    pub async fn watch_count(&self) -> usize {
        self.inner.read().await.watchers.len()
    }

    /// Reads one document.
    pub async fn get(&self, collection: &str, id: &str) -> Option<StoredDocument> {
        self.inner.read().await.engine.get(collection, id)
    }

    /// Lists a collection.
    pub async fn list(&self, collection: &str) -> Vec<StoredDocument> {
        self.inner.read().await.engine.list(collection)
    }

    /// Runs a single-field query.
    pub async fn query(&self, collection: &str, filter: &Filter) -> Vec<StoredDocument> {
        self.inner.read().await.engine.query(collection, filter)
    }

    /// Creates a document and notifies affected subscriptions.
    pub async fn create(&self, collection: &str, fields: Document) -> Commit {
        let mut inner = self.inner.write().await;
        let mut commit = inner.engine.create(collection, fields);
        inner.deliver(std::mem::take(&mut commit.notify));
        commit
    }

    /// Writes a whole document under a chosen id.
    pub async fn put(&self, collection: &str, id: &str, fields: Document) -> Commit {
        let mut inner = self.inner.write().await;
        let mut commit = inner.engine.put(collection, id, fields);
        inner.deliver(std::mem::take(&mut commit.notify));
        commit
    }

    /// Merges a patch into an existing document.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the document does not exist.
    pub async fn update(&self, collection: &str, id: &str, patch: &Patch) -> Result<Commit, EngineError> {
        let mut inner = self.inner.write().await;
        let mut commit = inner.engine.update(collection, id, patch)?;
        inner.deliver(std::mem::take(&mut commit.notify));
        Ok(commit)
    }

    /// Deletes a document.
    pub async fn delete(&self, collection: &str, id: &str) -> Commit {
        let mut inner = self.inner.write().await;
        let mut commit = inner.engine.delete(collection, id);
        inner.deliver(std::mem::take(&mut commit.notify));
        commit
    }

    /// Opens a live query. The initial snapshot is queued on `sender` before
    /// this returns. Returns the store-wide watch key used to close it.
    pub async fn watch(
        &self,
        subscription: u64,
        collection: &str,
        filter: Option<Filter>,
        sender: mpsc::UnboundedSender<Message>,
    ) -> u64 {
        let key = self.next_watch_key.fetch_add(1, Ordering::Relaxed);
        let mut inner = self.inner.write().await;
        let snapshot = inner.engine.watch(key, collection, filter);
        send_frame(
            &sender,
            &ServerFrame::Snapshot {
                subscription,
                snapshot,
            },
        );
        inner.watchers.insert(
            key,
            Watcher {
                subscription,
                sender,
            },
        );
        key
    }

    /// Closes a live query. Returns `false` if the key was unknown.
    pub async fn unwatch(&self, key: u64) -> bool {
        let mut inner = self.inner.write().await;
        inner.watchers.remove(&key);
        inner.engine.unwatch(key)
    }

    /// Loads a JSON seed file shaped as
    /// `{ "<collection>": { "<id>": { ...fields } } }`.
    ///
    /// Returns the number of documents written.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError`] if the file cannot be read or is not shaped
    /// as collections of documents.
    pub async fn load_seed(&self, path: &Path) -> Result<usize, DocumentError> {
        let contents = std::fs::read_to_string(path).map_err(|e| DocumentError::ReadSeed {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.load_seed_str(&contents).await
    }

    /// Loads seed data from a JSON string. See [`DocumentStore::load_seed`].
    ///
    /// # Errors
    ///
    /// Returns [`DocumentError`] if the JSON is malformed or mis-shaped.
    pub async fn load_seed_str(&self, json: &str) -> Result<usize, DocumentError> {
        let root: serde_json::Value = serde_json::from_str(json)?;
        let serde_json::Value::Object(collections) = root else {
            return Err(DocumentError::InvalidSeed(
                "top level must be an object of collections".into(),
            ));
        };

        let mut count = 0;
        for (collection, documents) in collections {
            let serde_json::Value::Object(documents) = documents else {
                return Err(DocumentError::InvalidSeed(format!(
                    "collection {collection} must be an object of documents"
                )));
            };
            for (id, fields) in documents {
                let fields = value::document_from_json(fields).ok_or_else(|| {
                    DocumentError::InvalidSeed(format!("document {collection}/{id} must be an object"))
                })?;
                self.put(&collection, &id, fields).await;
                count += 1;
            }
        }
        Ok(count)
    }
}
