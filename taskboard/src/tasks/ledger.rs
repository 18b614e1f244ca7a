//! The task ledger: one group's tasks, kept live and edited optimistically.

use std::sync::Arc;

use parking_lot::Mutex;
use taskboard_proto::TASKS;
use taskboard_proto::activity::{ActivityLogEntry, ChangeType};
use taskboard_proto::query::Filter;
use taskboard_proto::task::{
    self, DecodeDefaults, MAX_COMPLETION, STATUS_COMPLETED, STATUS_TODO, Task, TaskId, TaskPatch,
};
use taskboard_proto::value::FieldValue;
use tokio::sync::watch;
use tokio::task::AbortHandle;

use super::cache::{OverlayToken, TaskCache};
use super::{Applied, Rejection, TaskError};
use crate::activity::ActivitySink;
use crate::gateway::{GatewayError, RemoteStore, SnapshotEvent};
use crate::identity::Identity;
use crate::notice::Notifier;
use crate::time;

/// Behaviour switches for a [`TaskLedger`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerOptions {
    /// When set, completion 100 also moves the task to "Completed", and
    /// moving to "Completed" also sets completion 100.
    pub link_completion_and_status: bool,
}

/// Fields for a new task. Unset fields take the usual defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewTask {
    /// Display name.
    pub name: String,
    /// Initial status; "To Do" when `None`.
    pub status: Option<String>,
    /// Priority label.
    pub priority: Option<String>,
    /// Assigned user.
    pub assigned_to: Option<String>,
}

/// Detaches a ledger's live query. Clones share state; cancelling twice is a
/// no-op.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    subscription: crate::gateway::SubscriptionHandle,
    task: AbortHandle,
}

impl ListenerHandle {
    /// Stops the listener. Returns `false` if it was already stopped.
    pub fn cancel(&self) -> bool {
        if !self.subscription.cancel() {
            return false;
        }
        self.task.abort();
        true
    }

    /// Whether the listener has been stopped.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.subscription.is_cancelled()
    }
}

/// Live, optimistically edited view of one group's tasks.
pub struct TaskLedger<S, I> {
    store: Arc<S>,
    identity: Arc<I>,
    activity: ActivitySink,
    notifier: Notifier,
    options: LedgerOptions,
    cache: Arc<Mutex<TaskCache>>,
    listener: Mutex<Option<ListenerHandle>>,
    versions: Arc<watch::Sender<Option<u64>>>,
}

impl<S, I> std::fmt::Debug for TaskLedger<S, I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cache = self.cache.lock();
        f.debug_struct("TaskLedger")
            .field("group_code", &cache.group_code())
            .field("version", &cache.version())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl<S, I> TaskLedger<S, I>
where
    S: RemoteStore + 'static,
    I: Identity + 'static,
{
    /// Creates a ledger bound to no group.
    pub fn new(
        store: Arc<S>,
        identity: Arc<I>,
        activity: ActivitySink,
        notifier: Notifier,
        options: LedgerOptions,
    ) -> Self {
        let (versions, _) = watch::channel(None);
        Self {
            store,
            identity,
            activity,
            notifier,
            options,
            cache: Arc::new(Mutex::new(TaskCache::new())),
            listener: Mutex::new(None),
            versions: Arc::new(versions),
        }
    }

    /// Starts following the tasks of `group_code`, replacing any previous
    /// listener. The cache is cleared and refilled by the first snapshot.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::Remote`] if the live query cannot be opened.
    pub async fn subscribe(&self, group_code: &str) -> Result<ListenerHandle, TaskError> {
        if let Some(previous) = self.listener.lock().take() {
            previous.cancel();
        }
        let epoch = self.cache.lock().reset(group_code);
        self.versions.send_replace(None);

        let filter = Filter::eq(task::fields::GROUP_CODE, group_code);
        let subscription = self.store.subscribe(TASKS, Some(filter)).await.map_err(|e| {
            tracing::warn!(group = group_code, error = %e, "failed to open task listener");
            self.notifier.error("Error fetching tasks");
            TaskError::Remote(e)
        })?;
        tracing::info!(group = group_code, "fetching tasks for group");

        let listener = tokio::spawn(listen(
            subscription.snapshots,
            epoch,
            group_code.to_string(),
            Arc::clone(&self.cache),
            Arc::clone(&self.identity),
            Arc::clone(&self.versions),
            self.notifier.clone(),
        ));
        let handle = ListenerHandle {
            subscription: subscription.handle,
            task: listener.abort_handle(),
        };
        *self.listener.lock() = Some(handle.clone());
        Ok(handle)
    }

    /// Waits until a snapshot at `min_version` or later has been applied.
    pub async fn wait_for_snapshot(&self, min_version: u64) {
        let mut rx = self.versions.subscribe();
        let _ = rx
            .wait_for(|v| v.is_some_and(|v| v >= min_version))
            .await;
    }

    /// Visible tasks in snapshot order.
    #[must_use]
    pub fn tasks(&self) -> Vec<Task> {
        self.cache.lock().visible()
    }

    /// One visible task.
    #[must_use]
    pub fn task(&self, task_id: &TaskId) -> Option<Task> {
        self.cache.lock().get(task_id)
    }

    /// Group currently followed.
    #[must_use]
    pub fn group_code(&self) -> Option<String> {
        self.cache.lock().group_code().map(str::to_string)
    }

    /// Version of the last applied snapshot.
    #[must_use]
    pub fn snapshot_version(&self) -> Option<u64> {
        self.cache.lock().version()
    }

    /// Moves a task to another status and refreshes `statusUpdatedAt`.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] or [`TaskError::Remote`].
    pub async fn set_status(&self, task_id: &TaskId, status: &str) -> Result<Applied, TaskError> {
        let link = self.options.link_completion_and_status;
        self.mutate(task_id, ChangeType::StatusChange, |task, now| {
            let mut patch = TaskPatch {
                status: Some(status.to_string()),
                updated_at: Some(now.to_string()),
                status_updated_at: Some(now.to_string()),
                ..TaskPatch::default()
            };
            if link && status == STATUS_COMPLETED && task.completion != MAX_COMPLETION {
                patch.completion = Some(MAX_COMPLETION);
            }
            (patch, task.status.clone().into(), status.into())
        })
        .await
    }

    /// Sets or clears the priority label.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] or [`TaskError::Remote`].
    pub async fn set_priority(
        &self,
        task_id: &TaskId,
        priority: Option<&str>,
    ) -> Result<Applied, TaskError> {
        let priority = priority.map(str::to_string);
        self.mutate(task_id, ChangeType::PriorityChange, |task, now| {
            let patch = TaskPatch {
                priority: Some(priority.clone()),
                updated_at: Some(now.to_string()),
                ..TaskPatch::default()
            };
            (patch, task.priority.clone().into(), priority.into())
        })
        .await
    }

    /// Renames a task.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] or [`TaskError::Remote`].
    pub async fn rename(&self, task_id: &TaskId, name: &str) -> Result<Applied, TaskError> {
        self.mutate(task_id, ChangeType::NameChange, |task, now| {
            let patch = TaskPatch {
                name: Some(name.to_string()),
                updated_at: Some(now.to_string()),
                ..TaskPatch::default()
            };
            (patch, task.name.clone().into(), name.into())
        })
        .await
    }

    /// Stars or unstars a task.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] or [`TaskError::Remote`].
    pub async fn set_favorite(&self, task_id: &TaskId, favorite: bool) -> Result<Applied, TaskError> {
        self.mutate(task_id, ChangeType::FavoriteChange, |task, now| {
            let patch = TaskPatch {
                is_favorite: Some(favorite),
                updated_at: Some(now.to_string()),
                ..TaskPatch::default()
            };
            (patch, task.is_favorite.into(), favorite.into())
        })
        .await
    }

    /// Assigns a task to a user, or unassigns it with `None`.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] or [`TaskError::Remote`].
    pub async fn set_assignee(
        &self,
        task_id: &TaskId,
        user_id: Option<&str>,
    ) -> Result<Applied, TaskError> {
        let assignee = user_id.map(str::to_string);
        self.mutate(task_id, ChangeType::AssignmentChange, |task, now| {
            let patch = TaskPatch {
                assigned_to: Some(assignee.clone()),
                updated_at: Some(now.to_string()),
                ..TaskPatch::default()
            };
            (patch, task.assigned_to.clone().into(), assignee.into())
        })
        .await
    }

    /// Sets the completion percentage.
    ///
    /// # Errors
    ///
    /// - [`Rejection::CompletionOutOfRange`] outside 0 to 100.
    /// - [`Rejection::CompletedTaskLocked`] on a completed task unless the
    ///   value is 100.
    /// - [`TaskError::NotFound`] or [`TaskError::Remote`].
    pub async fn set_completion(&self, task_id: &TaskId, completion: i64) -> Result<Applied, TaskError> {
        let Some(value) = u8::try_from(completion)
            .ok()
            .filter(|v| *v <= MAX_COMPLETION)
        else {
            tracing::warn!(task = %task_id, completion, "completion must be between 0 and 100");
            self.notifier
                .warning("Completion percentage must be between 0 and 100");
            return Err(Rejection::CompletionOutOfRange(completion).into());
        };

        let current = self.require(task_id)?;
        if current.is_completed() && value != MAX_COMPLETION {
            self.notifier
                .info("Tasks in 'Completed' status are already 100% complete.");
            return Err(Rejection::CompletedTaskLocked.into());
        }

        let link = self.options.link_completion_and_status;
        self.mutate(task_id, ChangeType::CompletionUpdate, |task, now| {
            let mut patch = TaskPatch {
                completion: Some(value),
                updated_at: Some(now.to_string()),
                ..TaskPatch::default()
            };
            if link && value == MAX_COMPLETION && !task.is_completed() {
                patch.status = Some(STATUS_COMPLETED.to_string());
                patch.status_updated_at = Some(now.to_string());
            }
            (patch, task.completion.into(), value.into())
        })
        .await
    }

    /// Deletes a task. The cache drops it only after the store confirms.
    ///
    /// # Errors
    ///
    /// [`TaskError::NotFound`] or [`TaskError::Remote`].
    pub async fn delete(&self, task_id: &TaskId) -> Result<Applied, TaskError> {
        let task = self.require(task_id)?;
        let version = match self.store.delete_document(TASKS, task_id.as_str()).await {
            Ok(version) => version,
            Err(e) => {
                tracing::warn!(task = %task_id, error = %e, "error deleting task");
                self.notifier.error("Error deleting task");
                return Err(TaskError::Remote(e));
            }
        };
        self.cache.lock().remove_confirmed(task_id, version);

        let mut old = task.to_document();
        old.insert("id".to_string(), task_id.as_str().into());
        self.log(&task, ChangeType::TaskDeleted, FieldValue::Map(old), FieldValue::Null);
        tracing::info!(task = %task_id, version, "task deleted");
        Ok(Applied {
            task_id: task_id.clone(),
            change: ChangeType::TaskDeleted,
            version,
        })
    }

    /// Creates a task in the followed group. It appears in the cache when
    /// the listener delivers it.
    ///
    /// # Errors
    ///
    /// - [`TaskError::Unauthenticated`] when nobody is signed in or no group
    ///   is followed.
    /// - [`TaskError::Remote`] if the write fails.
    pub async fn create_task(&self, new_task: NewTask) -> Result<TaskId, TaskError> {
        let Some(user) = self.identity.current_user() else {
            return Err(TaskError::Unauthenticated);
        };
        let Some(group_code) = self.group_code() else {
            tracing::warn!("create_task called before subscribing to a group");
            return Err(TaskError::Unauthenticated);
        };

        let now = time::now_iso();
        let name = if new_task.name.trim().is_empty() {
            task::DEFAULT_TASK_NAME.to_string()
        } else {
            new_task.name
        };
        let draft = Task {
            id: TaskId::new(""),
            name,
            status: new_task.status.unwrap_or_else(|| STATUS_TODO.to_string()),
            date: time::today(),
            group_code,
            assigned_to: new_task.assigned_to,
            is_favorite: false,
            priority: new_task.priority,
            completion: 0,
            created_at: now.clone(),
            updated_at: now.clone(),
            status_updated_at: now,
            created_by: user.as_str().to_string(),
        };

        match self.store.create_document(TASKS, draft.to_document()).await {
            Ok((id, version)) => {
                tracing::info!(task = %id, group = %draft.group_code, version, "task created");
                Ok(TaskId::new(id))
            }
            Err(e) => {
                tracing::warn!(group = %draft.group_code, error = %e, "error creating task");
                self.notifier.error("Error creating task");
                Err(TaskError::Remote(e))
            }
        }
    }

    fn require(&self, task_id: &TaskId) -> Result<Task, TaskError> {
        self.task(task_id).ok_or_else(|| {
            tracing::warn!(task = %task_id, "task not found");
            TaskError::NotFound(task_id.clone())
        })
    }

    /// Optimistic write-through: overlay, persist, then ack or roll back.
    async fn mutate<F>(&self, task_id: &TaskId, change: ChangeType, build: F) -> Result<Applied, TaskError>
    where
        F: FnOnce(&Task, &str) -> (TaskPatch, FieldValue, FieldValue),
    {
        let task = self.require(task_id)?;
        let now = time::now_iso();
        let (patch, old_value, new_value) = build(&task, &now);
        let remote = patch.to_patch();
        let edit = PendingEdit::push(&self.cache, task_id, patch);

        match self.store.set_fields(TASKS, task_id.as_str(), remote).await {
            Ok(version) => {
                edit.ack(version);
                self.log(&task, change, old_value, new_value);
                tracing::info!(task = %task_id, %change, version, "task updated");
                Ok(Applied {
                    task_id: task_id.clone(),
                    change,
                    version,
                })
            }
            Err(e) => {
                drop(edit);
                tracing::warn!(task = %task_id, %change, error = %e, "task update failed, rolled back");
                self.notifier.error(failure_message(change));
                Err(TaskError::Remote(e))
            }
        }
    }

    fn log(&self, task: &Task, change: ChangeType, old_value: FieldValue, new_value: FieldValue) {
        self.activity.record(ActivityLogEntry {
            task_id: task.id.clone(),
            change_type: change,
            old_value,
            new_value,
            user_id: self.identity.current_user().map(|u| u.as_str().to_string()),
            timestamp: time::now_iso(),
            group_code: Some(task.group_code.clone()),
        });
    }
}

impl<S, I> Drop for TaskLedger<S, I> {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.lock().take() {
            listener.cancel();
        }
    }
}

/// An optimistic overlay whose write has not been acknowledged yet.
///
/// Dropping it rolls the overlay back, so a mutation abandoned mid-write
/// (timed out, raced in a `select!`) leaves the cache as it found it.
struct PendingEdit<'a> {
    cache: &'a Mutex<TaskCache>,
    token: Option<OverlayToken>,
}

impl<'a> PendingEdit<'a> {
    fn push(cache: &'a Mutex<TaskCache>, task_id: &TaskId, patch: TaskPatch) -> Self {
        let token = cache.lock().push_patch(task_id, patch);
        Self {
            cache,
            token: Some(token),
        }
    }

    fn ack(mut self, version: u64) {
        if let Some(token) = self.token.take() {
            self.cache.lock().ack(token, version);
        }
    }
}

impl Drop for PendingEdit<'_> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.cache.lock().rollback(token);
        }
    }
}

const fn failure_message(change: ChangeType) -> &'static str {
    match change {
        ChangeType::StatusChange => "Error updating task",
        ChangeType::PriorityChange => "Error updating task priority",
        ChangeType::NameChange => "Error updating task name",
        ChangeType::FavoriteChange => "Error updating task favorite status",
        ChangeType::AssignmentChange => "Error updating task assignment",
        ChangeType::CompletionUpdate => "Failed to update task completion",
        ChangeType::TaskDeleted => "Error deleting task",
    }
}

/// Applies each snapshot of the group's live query to the cache.
///
/// Snapshot errors are reported and the loop carries on. It ends when the
/// stream closes: a lost connection, or a query the server has given up on.
async fn listen<I: Identity>(
    mut snapshots: tokio::sync::mpsc::UnboundedReceiver<SnapshotEvent>,
    epoch: u64,
    group_code: String,
    cache: Arc<Mutex<TaskCache>>,
    identity: Arc<I>,
    versions: Arc<watch::Sender<Option<u64>>>,
    notifier: Notifier,
) {
    while let Some(event) = snapshots.recv().await {
        match event {
            Ok(snapshot) => {
                let user = identity.current_user();
                let now = time::now_iso();
                let today = time::today();
                let defaults = DecodeDefaults {
                    group_code: &group_code,
                    acting_user: user.as_ref().map(crate::identity::UserId::as_str),
                    now: &now,
                    today: &today,
                };
                let count = snapshot.documents.len();
                let tasks = snapshot
                    .documents
                    .iter()
                    .map(|doc| Task::from_document(doc, &defaults))
                    .collect();
                let applied = cache.lock().apply_snapshot(epoch, snapshot.version, tasks);
                if applied {
                    tracing::debug!(group = %group_code, version = snapshot.version, count, "task snapshot applied");
                    versions.send_replace(Some(snapshot.version));
                } else {
                    tracing::debug!(group = %group_code, version = snapshot.version, "stale task snapshot ignored");
                }
            }
            Err(GatewayError::ConnectionClosed) => {
                tracing::warn!(group = %group_code, "task listener lost its connection");
                notifier.warning("Lost connection to task updates");
                break;
            }
            Err(e) => {
                tracing::warn!(group = %group_code, error = %e, "error fetching tasks");
                notifier.warning("Error fetching tasks");
            }
        }
    }
    tracing::debug!(group = %group_code, "task listener exiting");
}
