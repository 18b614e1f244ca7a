//! In-memory document engine shared by the document server and the
//! in-process client store.
//!
//! The engine owns named collections of documents, stamps every committed
//! write with a store-wide monotonically increasing version, and tracks live
//! watches. Each write returns a [`Commit`] that lists the fresh
//! [`Snapshot`]s owed to the watches it affected; the caller delivers them
//! over whatever channel it owns. The engine itself does no I/O.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::query::{Filter, Patch};
use crate::value::{Document, StoredDocument};

/// Errors returned by engine writes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// A partial update targeted a document that does not exist.
    #[error("document {collection}/{id} not found")]
    NotFound {
        /// Collection name.
        collection: String,
        /// Document id.
        id: String,
    },
}

/// A point-in-time copy of the documents matched by a watch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Store version at which the snapshot was taken.
    pub version: u64,
    /// Matching documents, ordered by id.
    pub documents: Vec<StoredDocument>,
}

/// Result of a committed write.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    /// Version stamped on this write.
    pub version: u64,
    /// Id of the written document.
    pub id: String,
    /// Snapshots owed to affected watches, keyed by watch key.
    pub notify: Vec<(u64, Snapshot)>,
}

#[derive(Debug, Clone)]
struct Watch {
    collection: String,
    filter: Option<Filter>,
}

impl Watch {
    fn selects(&self, doc: &Document) -> bool {
        self.filter.as_ref().is_none_or(|f| f.matches(doc))
    }
}

/// Collections of documents plus the live watches over them.
#[derive(Debug, Default)]
pub struct DocumentEngine {
    collections: HashMap<String, BTreeMap<String, Document>>,
    version: u64,
    watches: HashMap<u64, Watch>,
}

impl DocumentEngine {
    /// Creates an empty engine at version 0.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current store version (the version of the latest commit).
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Number of live watches.
    #[must_use]
    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    /// Reads one document.
    #[must_use]
    pub fn get(&self, collection: &str, id: &str) -> Option<StoredDocument> {
        self.collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| StoredDocument::new(id, fields.clone()))
    }

    /// Lists every document of a collection, ordered by id.
    #[must_use]
    pub fn list(&self, collection: &str) -> Vec<StoredDocument> {
        self.select(collection, None)
    }

    /// Lists the documents matching `filter`, ordered by id.
    #[must_use]
    pub fn query(&self, collection: &str, filter: &Filter) -> Vec<StoredDocument> {
        self.select(collection, Some(filter))
    }

    /// Creates a document under a freshly generated id.
    pub fn create(&mut self, collection: &str, fields: Document) -> Commit {
        let id = Uuid::now_v7().simple().to_string();
        self.put(collection, &id, fields)
    }

    /// Writes a whole document under a caller-chosen id, replacing any
    /// previous body.
    pub fn put(&mut self, collection: &str, id: &str, fields: Document) -> Commit {
        let before = self
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), fields.clone());
        self.commit(collection, id, before.as_ref(), Some(&fields))
    }

    /// Merges `patch` into an existing document.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotFound`] if the document does not exist.
    pub fn update(&mut self, collection: &str, id: &str, patch: &Patch) -> Result<Commit, EngineError> {
        let doc = self
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| EngineError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
        let before = doc.clone();
        patch.apply_to(doc);
        let after = doc.clone();
        Ok(self.commit(collection, id, Some(&before), Some(&after)))
    }

    /// Deletes a document. Deleting a missing document still commits.
    pub fn delete(&mut self, collection: &str, id: &str) -> Commit {
        let before = self
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.remove(id));
        self.commit(collection, id, before.as_ref(), None)
    }

    /// Registers a watch and returns its initial snapshot.
    ///
    /// Re-using a key replaces the previous watch.
    pub fn watch(&mut self, key: u64, collection: &str, filter: Option<Filter>) -> Snapshot {
        let watch = Watch {
            collection: collection.to_string(),
            filter,
        };
        let snapshot = self.snapshot_for(&watch);
        self.watches.insert(key, watch);
        snapshot
    }

    /// Removes a watch. Returns `false` if the key was unknown.
    pub fn unwatch(&mut self, key: u64) -> bool {
        self.watches.remove(&key).is_some()
    }

    fn select(&self, collection: &str, filter: Option<&Filter>) -> Vec<StoredDocument> {
        self.collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, fields)| filter.is_none_or(|f| f.matches(fields)))
                    .map(|(id, fields)| StoredDocument::new(id.clone(), fields.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn snapshot_for(&self, watch: &Watch) -> Snapshot {
        Snapshot {
            version: self.version,
            documents: self.select(&watch.collection, watch.filter.as_ref()),
        }
    }

    fn commit(
        &mut self,
        collection: &str,
        id: &str,
        before: Option<&Document>,
        after: Option<&Document>,
    ) -> Commit {
        self.version += 1;
        let affected: Vec<u64> = self
            .watches
            .iter()
            .filter(|(_, w)| {
                w.collection == collection
                    && (before.is_some_and(|d| w.selects(d)) || after.is_some_and(|d| w.selects(d)))
            })
            .map(|(key, _)| *key)
            .collect();
        let notify = affected
            .into_iter()
            .filter_map(|key| {
                self.watches
                    .get(&key)
                    .map(|w| (key, self.snapshot_for(w)))
            })
            .collect();
        Commit {
            version: self.version,
            id: id.to_string(),
            notify,
        }
    }
}
