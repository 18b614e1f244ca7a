//! Integration tests for the group directory over the in-process store.
//!
//! Tests group listing (full scan and query variants), membership changes
//! with their notices, join requests, status vocabulary updates and the
//! signed-out behaviour.
//!
//! Verification command: `cargo test --test group_directory`

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::mpsc;

use taskboard::gateway::memory::{FaultScope, MemoryStore};
use taskboard::groups::GroupDirectory;
use taskboard::identity::StaticIdentity;
use taskboard::notice::{Notice, NoticeLevel, Notifier};
use taskboard_proto::GROUPS;
use taskboard_proto::group::{Group, Member};
use taskboard_proto::value::FieldValue;

// =============================================================================
// Helpers
// =============================================================================

type Directory = GroupDirectory<MemoryStore, StaticIdentity>;

fn open(store: &Arc<MemoryStore>, identity: StaticIdentity) -> (Directory, mpsc::Receiver<Notice>) {
    let (notifier, notices) = Notifier::channel(32);
    let directory = GroupDirectory::new(Arc::clone(store), Arc::new(identity), notifier);
    (directory, notices)
}

fn object_member(uid: &str) -> Member {
    let mut map = BTreeMap::new();
    map.insert("uid".to_string(), FieldValue::from(uid));
    map.insert("role".to_string(), FieldValue::from("member"));
    Member::Object(map)
}

/// Four groups as seen by `u1`: owns `OWN`, belongs to `RAW` (bare id) and
/// `OBJ` (member object), and has nothing to do with `FAR`.
fn seeded() -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());

    let mut own = Group::new("OWN", "Mine", "u1");
    own.members = vec![Member::Id("u1".into()), Member::Id("u3".into())];
    own.pending_members = vec!["u2".into(), "u4".into()];
    store.seed(GROUPS, "OWN", own.to_document());

    let mut raw = Group::new("RAW", "Raw ids", "u9");
    raw.members = vec![Member::Id("u9".into()), Member::Id("u1".into())];
    store.seed(GROUPS, "RAW", raw.to_document());

    let mut obj = Group::new("OBJ", "Objects", "u8");
    obj.members = vec![object_member("u1")];
    obj.statuses_order = Some(vec!["Backlog".into(), "Doing".into(), "Done".into()]);
    store.seed(GROUPS, "OBJ", obj.to_document());

    store.seed(GROUPS, "FAR", Group::new("FAR", "Elsewhere", "u7").to_document());
    store
}

fn codes(groups: &[Group]) -> Vec<String> {
    let mut codes: Vec<String> = groups.iter().map(|g| g.code.clone()).collect();
    codes.sort();
    codes
}

fn stored_group(store: &MemoryStore, code: &str) -> Group {
    Group::from_document(&store.document(GROUPS, code).unwrap())
}

// =============================================================================
// Listing
// =============================================================================

#[tokio::test]
async fn scan_and_query_agree_on_the_partition() {
    let store = seeded();
    let (scan, _) = open(&store, StaticIdentity::signed_in("u1"));
    let (query, _) = open(&store, StaticIdentity::signed_in("u1"));

    scan.fetch_groups().await;
    query.fetch_groups_with_query().await;

    assert_eq!(codes(&scan.owned_groups()), vec!["OWN"]);
    assert_eq!(codes(&scan.joined_groups()), vec!["OBJ", "RAW"]);
    assert_eq!(codes(&query.owned_groups()), codes(&scan.owned_groups()));
    assert_eq!(codes(&query.joined_groups()), codes(&scan.joined_groups()));
}

#[tokio::test]
async fn signed_out_user_changes_nothing() {
    let store = seeded();
    let (directory, mut notices) = open(&store, StaticIdentity::anonymous());
    let version = store.version();

    directory.fetch_groups().await;
    directory.fetch_groups_with_query().await;
    directory.leave_group("RAW").await;
    directory.request_to_join("FAR").await;

    assert!(directory.owned_groups().is_empty());
    assert!(directory.joined_groups().is_empty());
    assert_eq!(store.version(), version);
    assert!(notices.try_recv().is_err());
}

#[tokio::test]
async fn unreadable_groups_keep_previous_listing() {
    let store = seeded();
    let (directory, _) = open(&store, StaticIdentity::signed_in("u1"));
    directory.fetch_groups().await;

    store.inject_fault(GROUPS, FaultScope::All, "offline");
    directory.fetch_groups().await;
    directory.fetch_groups_with_query().await;
    assert_eq!(codes(&directory.owned_groups()), vec!["OWN"]);
    assert_eq!(directory.joined_groups().len(), 2);
}

// =============================================================================
// Membership
// =============================================================================

#[tokio::test]
async fn accepting_moves_pending_into_members() {
    let store = seeded();
    let (directory, mut notices) = open(&store, StaticIdentity::signed_in("u1"));

    directory.accept_member("OWN", "u2").await;
    let group = stored_group(&store, "OWN");
    assert!(group.has_member("u2"));
    assert_eq!(group.pending_members, vec!["u4"]);

    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.level, NoticeLevel::Success);
    assert_eq!(notice.message, "User has been added");

    // The listing is refreshed after the change.
    let owned = directory.owned_groups();
    assert_eq!(owned.len(), 1);
    assert!(owned[0].has_member("u2"));
}

#[tokio::test]
async fn rejecting_and_removing_members() {
    let store = seeded();
    let (directory, mut notices) = open(&store, StaticIdentity::signed_in("u1"));

    directory.reject_member("OWN", "u4").await;
    assert_eq!(stored_group(&store, "OWN").pending_members, vec!["u2"]);
    assert_eq!(notices.recv().await.unwrap().message, "User has been rejected");

    directory.remove_member("OWN", "u3").await;
    assert!(!stored_group(&store, "OWN").has_member("u3"));
    assert_eq!(notices.recv().await.unwrap().message, "User has been deleted");
}

#[tokio::test]
async fn failed_membership_change_reports_error() {
    let store = seeded();
    let (directory, mut notices) = open(&store, StaticIdentity::signed_in("u1"));
    store.inject_fault(GROUPS, FaultScope::Writes, "offline");

    directory.accept_member("OWN", "u2").await;
    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.level, NoticeLevel::Error);
    assert_eq!(notice.message, "Error accepting member");
    assert_eq!(stored_group(&store, "OWN").pending_members, vec!["u2", "u4"]);
}

#[tokio::test]
async fn leaving_drops_the_group_from_joined() {
    let store = seeded();
    let (directory, mut notices) = open(&store, StaticIdentity::signed_in("u1"));
    directory.fetch_groups().await;

    directory.leave_group("RAW").await;
    assert!(!stored_group(&store, "RAW").has_member("u1"));
    assert_eq!(codes(&directory.joined_groups()), vec!["OBJ"]);
    assert_eq!(notices.recv().await.unwrap().message, "You have left the group.");
}

#[tokio::test]
async fn join_request_lands_in_pending() {
    let store = seeded();
    let (directory, mut notices) = open(&store, StaticIdentity::signed_in("u1"));

    directory.request_to_join("FAR").await;
    assert_eq!(stored_group(&store, "FAR").pending_members, vec!["u1"]);
    assert_eq!(notices.recv().await.unwrap().message, "Join request sent");

    // Asking twice keeps a single pending entry.
    directory.request_to_join("FAR").await;
    assert_eq!(stored_group(&store, "FAR").pending_members, vec!["u1"]);

    directory.request_to_join("NOPE").await;
    let _ = notices.recv().await.unwrap();
    let notice = notices.recv().await.unwrap();
    assert_eq!(notice.level, NoticeLevel::Warning);
    assert_eq!(notice.message, "Group not found!");
    assert!(store.document(GROUPS, "NOPE").is_none());
}

// =============================================================================
// Status vocabulary
// =============================================================================

#[tokio::test]
async fn groups_without_vocabulary_use_defaults() {
    let store = seeded();
    let (directory, _) = open(&store, StaticIdentity::signed_in("u1"));
    let loaded = directory
        .set_selected_group(stored_group(&store, "RAW"))
        .await
        .unwrap();
    assert_eq!(
        loaded,
        Some(vec!["To Do".into(), "In Progress".into(), "Completed".into()])
    );
    assert_eq!(directory.statuses(), vec!["To Do", "In Progress", "Completed"]);
}

#[tokio::test]
async fn stale_selection_load_is_discarded() {
    let store = seeded();
    let (directory, _) = open(&store, StaticIdentity::signed_in("u1"));

    let first = directory.set_selected_group(stored_group(&store, "OBJ"));
    let second = directory.set_selected_group(stored_group(&store, "RAW"));
    first.await.unwrap();
    second.await.unwrap();

    assert_eq!(directory.selected_group().unwrap().code, "RAW");
    assert_eq!(directory.statuses(), vec!["To Do", "In Progress", "Completed"]);
}

#[tokio::test]
async fn vocabulary_changes_only_after_the_store_accepts() {
    let store = seeded();
    let (directory, mut notices) = open(&store, StaticIdentity::signed_in("u1"));
    directory
        .set_selected_group(stored_group(&store, "OBJ"))
        .await
        .unwrap();

    store.inject_fault(GROUPS, FaultScope::Writes, "offline");
    directory.update_statuses(vec!["Only".into()]).await;
    assert_eq!(directory.statuses(), vec!["Backlog", "Doing", "Done"]);
    assert_eq!(notices.recv().await.unwrap().message, "Error updating statuses");

    store.clear_faults();
    let next = vec!["Ideas".to_string(), "Shipped".to_string()];
    directory.update_statuses(next.clone()).await;
    assert_eq!(directory.statuses(), next);
    assert_eq!(stored_group(&store, "OBJ").statuses_order, Some(next.clone()));
    assert_eq!(directory.selected_group().unwrap().statuses_order, Some(next));
}
