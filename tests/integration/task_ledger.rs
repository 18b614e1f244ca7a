//! Integration tests for the task ledger over the in-process store.
//!
//! Covers optimistic edits and rollback, completion rules, deletion,
//! task creation, the activity trail each mutation leaves behind, and how
//! live snapshots interact with edits still in flight.
//!
//! Verification command: `cargo test --test task_ledger`

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use taskboard::activity::{ActivityLog, ActivitySink};
use taskboard::gateway::GatewayError;
use taskboard::gateway::memory::{FaultScope, MemoryStore};
use taskboard::identity::StaticIdentity;
use taskboard::notice::{Notice, NoticeLevel, Notifier};
use taskboard::tasks::{Applied, LedgerOptions, NewTask, Rejection, TaskError, TaskLedger};
use taskboard_proto::activity::{ActivityLogEntry, ChangeType};
use taskboard_proto::task::{Task, TaskId};
use taskboard_proto::value::{Document, FieldValue};
use taskboard_proto::{ACTIVITY_LOGS, TASKS};

// =============================================================================
// Helpers
// =============================================================================

const GROUP: &str = "G1";

type Ledger = TaskLedger<MemoryStore, StaticIdentity>;

struct Board {
    store: Arc<MemoryStore>,
    ledger: Arc<Ledger>,
    activity: ActivitySink,
    notices: mpsc::Receiver<Notice>,
}

impl Board {
    async fn open(store: Arc<MemoryStore>, identity: StaticIdentity) -> Self {
        let (notifier, notices) = Notifier::channel(32);
        let (activity, _writer) = ActivityLog::spawn(Arc::clone(&store), notifier.clone(), 64);
        let ledger = TaskLedger::new(
            Arc::clone(&store),
            Arc::new(identity),
            activity.clone(),
            notifier,
            LedgerOptions::default(),
        );
        ledger.subscribe(GROUP).await.unwrap();
        ledger.wait_for_snapshot(store.version()).await;
        Self {
            store,
            ledger: Arc::new(ledger),
            activity,
            notices,
        }
    }

    async fn signed_in(store: Arc<MemoryStore>) -> Self {
        Self::open(store, StaticIdentity::signed_in("u1")).await
    }

    async fn entries(&self) -> Vec<ActivityLogEntry> {
        self.activity.flush().await;
        self.store
            .documents(ACTIVITY_LOGS)
            .iter()
            .filter_map(|doc| ActivityLogEntry::from_document(&doc.fields))
            .collect()
    }

    async fn next_notice(&mut self) -> Notice {
        tokio::time::timeout(Duration::from_secs(2), self.notices.recv())
            .await
            .expect("timed out waiting for a notice")
            .expect("notice channel closed")
    }
}

fn task_doc(name: &str, status: &str, completion: i64, group: &str) -> Document {
    let mut doc = Document::new();
    doc.insert("name".into(), name.into());
    doc.insert("status".into(), status.into());
    doc.insert("completion".into(), completion.into());
    doc.insert("groupCode".into(), group.into());
    doc
}

fn seeded(tasks: &[(&str, &str, &str, i64)]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for (id, name, status, completion) in tasks {
        store.seed(TASKS, id, task_doc(name, status, *completion, GROUP));
    }
    store
}

fn t(id: &str) -> TaskId {
    TaskId::new(id)
}

/// Runs one mutation of the given kind with fixed arguments.
async fn apply(ledger: &Ledger, id: &TaskId, change: ChangeType) -> Result<Applied, TaskError> {
    match change {
        ChangeType::StatusChange => ledger.set_status(id, "In Progress").await,
        ChangeType::PriorityChange => ledger.set_priority(id, Some("High")).await,
        ChangeType::NameChange => ledger.rename(id, "Final").await,
        ChangeType::FavoriteChange => ledger.set_favorite(id, true).await,
        ChangeType::AssignmentChange => ledger.set_assignee(id, Some("u2")).await,
        ChangeType::CompletionUpdate => ledger.set_completion(id, 60).await,
        ChangeType::TaskDeleted => ledger.delete(id).await,
    }
}

/// The fields a user can edit.
fn editable(task: &Task) -> (String, String, Option<String>, bool, Option<String>, u8) {
    (
        task.name.clone(),
        task.status.clone(),
        task.priority.clone(),
        task.is_favorite,
        task.assigned_to.clone(),
        task.completion,
    )
}

// =============================================================================
// Completion rules
// =============================================================================

#[tokio::test]
async fn completion_accepts_bounds_and_rejects_out_of_range() {
    let mut board = Board::signed_in(seeded(&[("t1", "Report", "In Progress", 40)])).await;

    board.ledger.set_completion(&t("t1"), 0).await.unwrap();
    let applied = board.ledger.set_completion(&t("t1"), 100).await.unwrap();
    board.ledger.wait_for_snapshot(applied.version).await;
    let task = board.ledger.task(&t("t1")).unwrap();
    assert_eq!(task.completion, 100);
    assert_eq!(task.status, "In Progress", "unlinked ledger leaves the status alone");

    let version = board.store.version();
    for bad in [-1, 101, i64::MAX] {
        let err = board.ledger.set_completion(&t("t1"), bad).await.unwrap_err();
        assert_eq!(err, TaskError::Rejected(Rejection::CompletionOutOfRange(bad)));
        let notice = board.next_notice().await;
        assert_eq!(notice.level, NoticeLevel::Warning);
        assert_eq!(notice.message, "Completion percentage must be between 0 and 100");
    }
    assert_eq!(board.store.version(), version, "rejected values never reach the store");
    assert_eq!(board.ledger.task(&t("t1")).unwrap().completion, 100);
}

#[tokio::test]
async fn completed_task_only_accepts_full_completion() {
    let mut board = Board::signed_in(seeded(&[("t1", "Ship", "Completed", 100)])).await;

    let err = board.ledger.set_completion(&t("t1"), 50).await.unwrap_err();
    assert_eq!(err, TaskError::Rejected(Rejection::CompletedTaskLocked));
    let notice = board.next_notice().await;
    assert_eq!(notice.level, NoticeLevel::Info);
    assert_eq!(
        notice.message,
        "Tasks in 'Completed' status are already 100% complete."
    );
    assert_eq!(board.ledger.task(&t("t1")).unwrap().completion, 100);

    board.ledger.set_completion(&t("t1"), 100).await.unwrap();
}

#[tokio::test]
async fn completing_by_status_keeps_percentage_and_logs_status_change() {
    let board = Board::signed_in(seeded(&[("t1", "Report", "In Progress", 40)])).await;

    let applied = board.ledger.set_status(&t("t1"), "Completed").await.unwrap();
    assert_eq!(applied.change, ChangeType::StatusChange);
    board.ledger.wait_for_snapshot(applied.version).await;

    let task = board.ledger.task(&t("t1")).unwrap();
    assert_eq!(task.status, "Completed");
    assert_eq!(task.completion, 40);

    let entries = board.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].change_type, ChangeType::StatusChange);
    assert_eq!(entries[0].old_value, FieldValue::from("In Progress"));
    assert_eq!(entries[0].new_value, FieldValue::from("Completed"));
    assert_eq!(entries[0].user_id.as_deref(), Some("u1"));
    assert_eq!(entries[0].group_code.as_deref(), Some(GROUP));
}

// =============================================================================
// Rollback
// =============================================================================

#[tokio::test]
async fn failed_write_rolls_back_and_reports() {
    let store = seeded(&[("t1", "Draft", "To Do", 0)]);
    let mut board = Board::signed_in(Arc::clone(&store)).await;
    let id = t("t1");
    let before = editable(&board.ledger.task(&id).unwrap());
    store.inject_fault(TASKS, FaultScope::Writes, "offline");

    let expected = [
        (ChangeType::StatusChange, "Error updating task"),
        (ChangeType::PriorityChange, "Error updating task priority"),
        (ChangeType::NameChange, "Error updating task name"),
        (ChangeType::FavoriteChange, "Error updating task favorite status"),
        (ChangeType::AssignmentChange, "Error updating task assignment"),
        (ChangeType::CompletionUpdate, "Failed to update task completion"),
        (ChangeType::TaskDeleted, "Error deleting task"),
    ];
    for (change, message) in expected {
        let err = apply(&board.ledger, &id, change).await.unwrap_err();
        assert_eq!(
            err,
            TaskError::Remote(GatewayError::Unavailable("offline".into())),
            "{change}"
        );
        assert_eq!(editable(&board.ledger.task(&id).unwrap()), before, "{change}");

        let notice = board.next_notice().await;
        assert_eq!(notice.level, NoticeLevel::Error, "{change}");
        assert_eq!(notice.message, message, "{change}");
    }
    assert_eq!(board.ledger.tasks().len(), 1);
    assert!(board.entries().await.is_empty(), "failed edits leave no trail");
}

#[tokio::test]
async fn abandoned_edit_is_rolled_back() {
    let store = seeded(&[("t1", "Draft", "To Do", 0)]);
    let board = Board::signed_in(Arc::clone(&store)).await;
    store.hold_writes();

    let abandoned =
        tokio::time::timeout(Duration::from_millis(50), board.ledger.rename(&t("t1"), "Ghost")).await;
    assert!(abandoned.is_err(), "held write should not complete");
    assert_eq!(board.ledger.task(&t("t1")).unwrap().name, "Draft");

    store.release_writes();
    let version = store.seed(TASKS, "t2", task_doc("Later", "To Do", 0, GROUP));
    board.ledger.wait_for_snapshot(version).await;
    assert_eq!(
        store.document(TASKS, "t1").unwrap().get("name"),
        Some(&FieldValue::from("Draft"))
    );
    assert_eq!(board.ledger.task(&t("t1")).unwrap().name, "Draft");
    assert_eq!(board.ledger.tasks().len(), 2);
}

#[tokio::test]
async fn failed_delete_keeps_the_task() {
    let store = seeded(&[("t1", "Draft", "To Do", 0)]);
    let mut board = Board::signed_in(Arc::clone(&store)).await;
    store.inject_fault(TASKS, FaultScope::Writes, "offline");

    assert!(matches!(
        board.ledger.delete(&t("t1")).await,
        Err(TaskError::Remote(_))
    ));
    assert!(board.ledger.task(&t("t1")).is_some());
    assert_eq!(board.next_notice().await.message, "Error deleting task");
    assert!(store.document(TASKS, "t1").is_some());
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let board = Board::signed_in(seeded(&[])).await;
    assert_eq!(
        board.ledger.rename(&t("ghost"), "x").await.unwrap_err(),
        TaskError::NotFound(t("ghost"))
    );
    assert_eq!(
        board.ledger.delete(&t("ghost")).await.unwrap_err(),
        TaskError::NotFound(t("ghost"))
    );
}

// =============================================================================
// Activity trail
// =============================================================================

#[tokio::test]
async fn every_mutation_leaves_one_entry() {
    let board = Board::signed_in(seeded(&[("t1", "Draft", "To Do", 0)])).await;
    let id = t("t1");

    let expected = [
        (ChangeType::StatusChange, FieldValue::from("To Do"), FieldValue::from("In Progress")),
        (ChangeType::PriorityChange, FieldValue::Null, FieldValue::from("High")),
        (ChangeType::NameChange, FieldValue::from("Draft"), FieldValue::from("Final")),
        (ChangeType::FavoriteChange, FieldValue::from(false), FieldValue::from(true)),
        (ChangeType::AssignmentChange, FieldValue::Null, FieldValue::from("u2")),
        (ChangeType::CompletionUpdate, FieldValue::from(0u8), FieldValue::from(60u8)),
    ];
    for (change, _, _) in &expected {
        let applied = apply(&board.ledger, &id, *change).await.unwrap();
        assert_eq!(applied.change, *change);
    }
    apply(&board.ledger, &id, ChangeType::TaskDeleted).await.unwrap();

    let entries = board.entries().await;
    assert_eq!(entries.len(), ChangeType::ALL.len());
    for (change, old_value, new_value) in expected {
        let found: Vec<&ActivityLogEntry> =
            entries.iter().filter(|e| e.change_type == change).collect();
        assert_eq!(found.len(), 1, "{change}");
        assert_eq!(found[0].old_value, old_value, "{change}");
        assert_eq!(found[0].new_value, new_value, "{change}");
        assert_eq!(found[0].task_id, id);
        assert_eq!(found[0].user_id.as_deref(), Some("u1"));
    }

    let deleted = entries
        .iter()
        .find(|e| e.change_type == ChangeType::TaskDeleted)
        .unwrap();
    assert_eq!(deleted.new_value, FieldValue::Null);
    let old = deleted.old_value.as_map().unwrap();
    assert_eq!(old.get("id"), Some(&FieldValue::from("t1")));
    assert_eq!(old.get("name"), Some(&FieldValue::from("Final")));
    assert_eq!(old.get("assignedTo"), Some(&FieldValue::from("u2")));
}

#[tokio::test]
async fn activity_failure_does_not_fail_the_edit() {
    let store = seeded(&[("t1", "Draft", "To Do", 0)]);
    let mut board = Board::signed_in(Arc::clone(&store)).await;
    store.inject_fault(ACTIVITY_LOGS, FaultScope::Writes, "log store down");

    let applied = board.ledger.rename(&t("t1"), "Final").await.unwrap();
    assert_eq!(applied.change, ChangeType::NameChange);
    assert!(board.entries().await.is_empty());

    let notice = board.next_notice().await;
    assert_eq!(notice.level, NoticeLevel::Warning);
    assert_eq!(
        notice.message,
        "Change saved but could not be added to the activity log"
    );
    assert_eq!(
        store.document(TASKS, "t1").unwrap().get("name"),
        Some(&FieldValue::from("Final"))
    );
}

// =============================================================================
// Live snapshots
// =============================================================================

#[tokio::test]
async fn remote_changes_replace_the_cache() {
    let store = seeded(&[("t1", "Draft", "To Do", 0)]);
    let board = Board::signed_in(Arc::clone(&store)).await;

    let version = store.seed(TASKS, "t2", task_doc("From elsewhere", "To Do", 0, GROUP));
    board.ledger.wait_for_snapshot(version).await;
    assert_eq!(board.ledger.tasks().len(), 2);

    // Tasks of other groups never show up.
    let version = store.seed(TASKS, "t3", task_doc("Other team", "To Do", 0, "G2"));
    store.seed(TASKS, "t4", task_doc("Mine again", "To Do", 0, GROUP));
    board.ledger.wait_for_snapshot(version + 1).await;
    let ids: Vec<String> = board
        .ledger
        .tasks()
        .iter()
        .map(|t| t.id.as_str().to_string())
        .collect();
    assert!(ids.contains(&"t4".to_string()));
    assert!(!ids.contains(&"t3".to_string()));
}

#[tokio::test]
async fn in_flight_edit_survives_a_stale_snapshot() {
    let store = seeded(&[("t1", "Draft", "To Do", 0)]);
    let board = Board::signed_in(Arc::clone(&store)).await;
    store.hold_writes();

    let ledger = Arc::clone(&board.ledger);
    let pending = tokio::spawn(async move { ledger.rename(&TaskId::new("t1"), "Final").await });

    tokio::time::timeout(Duration::from_secs(2), async {
        while board.ledger.task(&t("t1")).map(|t| t.name) != Some("Final".to_string()) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("optimistic value never became visible");

    // A snapshot taken before the write landed still carries the old name.
    let stale = store.seed(TASKS, "t2", task_doc("Unrelated", "To Do", 0, GROUP));
    board.ledger.wait_for_snapshot(stale).await;
    assert_eq!(board.ledger.task(&t("t1")).unwrap().name, "Final");

    store.release_writes();
    let applied = pending.await.unwrap().unwrap();
    board.ledger.wait_for_snapshot(applied.version).await;
    assert_eq!(board.ledger.task(&t("t1")).unwrap().name, "Final");
}

#[tokio::test]
async fn subscription_error_is_reported_and_cache_kept() {
    let store = seeded(&[("t1", "Draft", "To Do", 0)]);
    let mut board = Board::signed_in(Arc::clone(&store)).await;

    store.fail_subscriptions(TASKS, "listener failed");
    let notice = board.next_notice().await;
    assert_eq!(notice.level, NoticeLevel::Warning);
    assert_eq!(notice.message, "Error fetching tasks");
    assert_eq!(board.ledger.tasks().len(), 1);
}

#[tokio::test]
async fn resubscribing_switches_groups() {
    let store = seeded(&[("t1", "Mine", "To Do", 0)]);
    store.seed(TASKS, "x1", task_doc("Theirs", "To Do", 0, "G2"));
    let board = Board::signed_in(Arc::clone(&store)).await;
    assert_eq!(board.ledger.tasks().len(), 1);

    board.ledger.subscribe("G2").await.unwrap();
    board.ledger.wait_for_snapshot(store.version()).await;
    let tasks = board.ledger.tasks();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].id, t("x1"));
    assert_eq!(board.ledger.group_code().as_deref(), Some("G2"));
    assert_eq!(store.watch_count(), 1);
}

// =============================================================================
// Creation
// =============================================================================

#[tokio::test]
async fn create_task_fills_defaults() {
    let store = seeded(&[]);
    let board = Board::signed_in(Arc::clone(&store)).await;

    let id = board
        .ledger
        .create_task(NewTask {
            name: "  ".into(),
            priority: Some("Low".into()),
            ..NewTask::default()
        })
        .await
        .unwrap();
    board.ledger.wait_for_snapshot(store.version()).await;

    let task = board.ledger.task(&id).unwrap();
    assert_eq!(task.name, "Unnamed Task");
    assert_eq!(task.status, "To Do");
    assert_eq!(task.group_code, GROUP);
    assert_eq!(task.created_by, "u1");
    assert_eq!(task.priority.as_deref(), Some("Low"));
    assert_eq!(task.completion, 0);
    assert!(!task.is_favorite);
}

#[tokio::test]
async fn create_task_needs_a_signed_in_user() {
    let store = seeded(&[]);
    let board = Board::open(Arc::clone(&store), StaticIdentity::anonymous()).await;
    let err = board
        .ledger
        .create_task(NewTask {
            name: "Nope".into(),
            ..NewTask::default()
        })
        .await
        .unwrap_err();
    assert_eq!(err, TaskError::Unauthenticated);
    assert!(store.documents(TASKS).is_empty());
}
