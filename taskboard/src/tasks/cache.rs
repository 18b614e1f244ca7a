//! Confirmed task set plus optimistic overlays.
//!
//! The confirmed set is whatever the latest accepted snapshot said. Local
//! edits sit on top as overlays until the store confirms them: an overlay
//! acknowledged at write version `v` is dropped once a snapshot at version
//! `v` or later arrives, because that snapshot already contains the write.
//! Until then a stale snapshot cannot hide the edit.

use taskboard_proto::task::{Task, TaskId, TaskPatch};

/// Identifies one overlay.
pub type OverlayToken = u64;

#[derive(Debug, Clone)]
enum OverlayKind {
    Patch(TaskPatch),
    Tombstone,
}

#[derive(Debug, Clone)]
struct Overlay {
    token: OverlayToken,
    task_id: TaskId,
    kind: OverlayKind,
    acked: Option<u64>,
}

/// Tasks of one group as the user should currently see them.
#[derive(Debug, Default)]
pub struct TaskCache {
    group_code: Option<String>,
    epoch: u64,
    confirmed: Vec<Task>,
    snapshot_version: Option<u64>,
    overlays: Vec<Overlay>,
    next_token: OverlayToken,
}

impl TaskCache {
    /// Creates an empty cache bound to no group.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Clears everything and binds the cache to `group_code`.
    ///
    /// Returns the new epoch; snapshots tagged with an older epoch are
    /// ignored from now on.
    pub fn reset(&mut self, group_code: &str) -> u64 {
        self.epoch += 1;
        self.group_code = Some(group_code.to_string());
        self.confirmed.clear();
        self.snapshot_version = None;
        self.overlays.clear();
        self.epoch
    }

    /// Group the cache is bound to.
    #[must_use]
    pub fn group_code(&self) -> Option<&str> {
        self.group_code.as_deref()
    }

    /// Version of the last accepted snapshot.
    #[must_use]
    pub const fn version(&self) -> Option<u64> {
        self.snapshot_version
    }

    /// Number of overlays not yet covered by a snapshot.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.overlays.len()
    }

    /// Replaces the confirmed set with a snapshot.
    ///
    /// Returns `false` (and changes nothing) if the snapshot belongs to an
    /// earlier epoch or is older than the one already held.
    pub fn apply_snapshot(&mut self, epoch: u64, version: u64, tasks: Vec<Task>) -> bool {
        if epoch != self.epoch {
            return false;
        }
        if self.snapshot_version.is_some_and(|held| version < held) {
            return false;
        }
        self.confirmed = tasks;
        self.snapshot_version = Some(version);
        self.overlays
            .retain(|o| o.acked.is_none_or(|acked| acked > version));
        true
    }

    /// Layers an optimistic edit over a task.
    pub fn push_patch(&mut self, task_id: &TaskId, patch: TaskPatch) -> OverlayToken {
        self.push(task_id, OverlayKind::Patch(patch), None)
    }

    /// Marks an overlay as written at `version`.
    pub fn ack(&mut self, token: OverlayToken, version: u64) {
        if self.snapshot_version.is_some_and(|held| held >= version) {
            self.overlays.retain(|o| o.token != token);
            return;
        }
        if let Some(overlay) = self.overlays.iter_mut().find(|o| o.token == token) {
            overlay.acked = Some(version);
        }
    }

    /// Drops an overlay whose write failed.
    pub fn rollback(&mut self, token: OverlayToken) -> bool {
        let before = self.overlays.len();
        self.overlays.retain(|o| o.token != token);
        self.overlays.len() != before
    }

    /// Hides a task deleted at `version` until a snapshot confirms it.
    pub fn remove_confirmed(&mut self, task_id: &TaskId, version: u64) {
        if self.snapshot_version.is_some_and(|held| held >= version) {
            return;
        }
        self.push(task_id, OverlayKind::Tombstone, Some(version));
    }

    /// Visible tasks in snapshot order, with overlays applied.
    #[must_use]
    pub fn visible(&self) -> Vec<Task> {
        self.confirmed
            .iter()
            .filter_map(|task| self.overlaid(task))
            .collect()
    }

    /// One visible task.
    #[must_use]
    pub fn get(&self, task_id: &TaskId) -> Option<Task> {
        self.confirmed
            .iter()
            .find(|t| &t.id == task_id)
            .and_then(|task| self.overlaid(task))
    }

    fn overlaid(&self, task: &Task) -> Option<Task> {
        let mut view = task.clone();
        for overlay in self.overlays.iter().filter(|o| o.task_id == task.id) {
            match &overlay.kind {
                OverlayKind::Patch(patch) => patch.apply(&mut view),
                OverlayKind::Tombstone => return None,
            }
        }
        Some(view)
    }

    fn push(&mut self, task_id: &TaskId, kind: OverlayKind, acked: Option<u64>) -> OverlayToken {
        let token = self.next_token;
        self.next_token += 1;
        self.overlays.push(Overlay {
            token,
            task_id: task_id.clone(),
            kind,
            acked,
        });
        token
    }
}
