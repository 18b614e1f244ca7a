//! Group-scoped task cache with optimistic, write-through mutations.
//!
//! [`TaskLedger`] subscribes to one group's tasks, applies edits locally
//! before persisting them, rolls back on failure and queues an activity
//! entry on success. [`TaskCache`] holds the confirmed server set plus the
//! pending optimistic overlays.

pub mod cache;
pub mod ledger;

pub use cache::TaskCache;
pub use ledger::{LedgerOptions, ListenerHandle, NewTask, TaskLedger};

use taskboard_proto::activity::ChangeType;
use taskboard_proto::task::TaskId;
use thiserror::Error;

use crate::gateway::GatewayError;

/// Why a mutation was refused before anything was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Completion must lie in 0 to 100.
    #[error("completion {0} is outside 0..=100")]
    CompletionOutOfRange(i64),
    /// Completed tasks only accept completion 100.
    #[error("tasks in 'Completed' status are already 100% complete")]
    CompletedTaskLocked,
}

/// Errors returned by task mutations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task is not in the cache. Nothing was written.
    #[error("task not found: {0}")]
    NotFound(TaskId),
    /// The change was refused locally. Nothing was written.
    #[error("change rejected: {0}")]
    Rejected(#[from] Rejection),
    /// The remote write failed. The optimistic change has been rolled back.
    #[error("remote write failed: {0}")]
    Remote(#[from] GatewayError),
    /// The operation needs a signed-in user.
    #[error("not signed in")]
    Unauthenticated,
}

/// A mutation that reached the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    /// The task changed.
    pub task_id: TaskId,
    /// What kind of change it was.
    pub change: ChangeType,
    /// Store version stamped on the write.
    pub version: u64,
}
