//! Integration tests for the activity log writer.
//!
//! Uses a recording store to check append order and the non-blocking queue,
//! and a full session to check that shutdown drains pending entries.
//!
//! Verification command: `cargo test --test activity_log`

use std::sync::Arc;

use parking_lot::Mutex;

use taskboard::activity::ActivityLog;
use taskboard::gateway::memory::MemoryStore;
use taskboard::gateway::{GatewayError, RemoteStore, Subscription};
use taskboard::identity::StaticIdentity;
use taskboard::notice::Notifier;
use taskboard::session::{Session, SessionOptions};
use taskboard_proto::activity::{ActivityLogEntry, ChangeType};
use taskboard_proto::query::{Filter, Patch};
use taskboard_proto::task::TaskId;
use taskboard_proto::value::{Document, FieldValue, StoredDocument};
use taskboard_proto::{ACTIVITY_LOGS, TASKS};

// =============================================================================
// Recording store
// =============================================================================

/// Accepts creates and remembers them in arrival order; everything else is
/// unsupported.
#[derive(Debug, Default)]
struct RecordingStore {
    created: Mutex<Vec<(String, Document)>>,
}

impl RecordingStore {
    fn entries(&self) -> Vec<ActivityLogEntry> {
        self.created
            .lock()
            .iter()
            .filter(|(collection, _)| collection == ACTIVITY_LOGS)
            .filter_map(|(_, doc)| ActivityLogEntry::from_document(doc))
            .collect()
    }
}

fn unsupported() -> GatewayError {
    GatewayError::Unavailable("unsupported".into())
}

impl RemoteStore for RecordingStore {
    async fn get_document(
        &self,
        _collection: &str,
        _id: &str,
    ) -> Result<Option<StoredDocument>, GatewayError> {
        Err(unsupported())
    }

    async fn set_fields(&self, _collection: &str, _id: &str, _patch: Patch) -> Result<u64, GatewayError> {
        Err(unsupported())
    }

    async fn delete_document(&self, _collection: &str, _id: &str) -> Result<u64, GatewayError> {
        Err(unsupported())
    }

    async fn create_document(
        &self,
        collection: &str,
        fields: Document,
    ) -> Result<(String, u64), GatewayError> {
        let mut created = self.created.lock();
        created.push((collection.to_string(), fields));
        let version = created.len() as u64;
        Ok((format!("log-{version}"), version))
    }

    async fn query_where(
        &self,
        _collection: &str,
        _filter: Filter,
    ) -> Result<Vec<StoredDocument>, GatewayError> {
        Err(unsupported())
    }

    async fn list_documents(&self, _collection: &str) -> Result<Vec<StoredDocument>, GatewayError> {
        Err(unsupported())
    }

    async fn subscribe(
        &self,
        _collection: &str,
        _filter: Option<Filter>,
    ) -> Result<Subscription, GatewayError> {
        Err(unsupported())
    }
}

fn entry(task: &str, change: ChangeType) -> ActivityLogEntry {
    ActivityLogEntry {
        task_id: TaskId::new(task),
        change_type: change,
        old_value: FieldValue::Null,
        new_value: FieldValue::from(task),
        user_id: Some("u1".into()),
        timestamp: "2026-03-01T09:00:00.000Z".into(),
        group_code: Some("G1".into()),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[tokio::test]
async fn entries_reach_the_store_in_record_order() {
    let store = Arc::new(RecordingStore::default());
    let (sink, _writer) = ActivityLog::spawn(Arc::clone(&store), Notifier::disabled(), 16);

    let ids: Vec<String> = (0..10).map(|n| format!("t{n}")).collect();
    for (n, id) in ids.iter().enumerate() {
        let change = ChangeType::ALL[n % ChangeType::ALL.len()];
        sink.record(entry(id, change));
    }
    sink.flush().await;

    let logged: Vec<String> = store
        .entries()
        .iter()
        .map(|e| e.task_id.as_str().to_string())
        .collect();
    assert_eq!(logged, ids);
}

#[tokio::test]
async fn full_queue_drops_without_blocking() {
    let store = Arc::new(RecordingStore::default());
    let (sink, _writer) = ActivityLog::spawn(Arc::clone(&store), Notifier::disabled(), 2);

    // The writer cannot run between these calls on a current-thread
    // runtime, so only the first two fit.
    for n in 0..5 {
        sink.record(entry(&format!("t{n}"), ChangeType::NameChange));
    }
    sink.flush().await;

    let logged: Vec<String> = store
        .entries()
        .iter()
        .map(|e| e.task_id.as_str().to_string())
        .collect();
    assert_eq!(logged, vec!["t0", "t1"]);
}

#[tokio::test]
async fn record_after_writer_stopped_is_ignored() {
    let store = Arc::new(RecordingStore::default());
    let (sink, writer) = ActivityLog::spawn(Arc::clone(&store), Notifier::disabled(), 4);
    writer.abort();
    let _ = writer.await;

    sink.record(entry("t1", ChangeType::FavoriteChange));
    sink.flush().await;
    assert!(store.entries().is_empty());
}

#[tokio::test]
async fn session_shutdown_drains_pending_entries() {
    let store = Arc::new(MemoryStore::new());
    let mut doc = Document::new();
    doc.insert("name".into(), "Plan".into());
    doc.insert("groupCode".into(), "G1".into());
    store.seed(TASKS, "t1", doc);

    let session = Session::start(
        Arc::clone(&store),
        Arc::new(StaticIdentity::signed_in("u1")),
        SessionOptions::default(),
    );
    session.ledger().subscribe("G1").await.unwrap();
    session.ledger().wait_for_snapshot(store.version()).await;
    let id = TaskId::new("t1");
    session.ledger().set_favorite(&id, true).await.unwrap();
    session.ledger().set_priority(&id, Some("High")).await.unwrap();
    session.ledger().set_assignee(&id, None).await.unwrap();

    let notices = session.shutdown().await;
    assert!(notices.is_empty());
    assert_eq!(store.documents(ACTIVITY_LOGS).len(), 3);
    assert_eq!(store.watch_count(), 0);
}
