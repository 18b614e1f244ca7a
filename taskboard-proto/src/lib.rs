//! Shared data model and wire format for `Taskboard`.

pub mod activity;
pub mod engine;
pub mod group;
pub mod query;
pub mod task;
pub mod value;
pub mod wire;

/// Collection holding task documents.
pub const TASKS: &str = "tasks";

/// Collection holding group documents (document id = join code).
pub const GROUPS: &str = "groups";

/// Append-only collection of activity log entries.
pub const ACTIVITY_LOGS: &str = "activity_logs";
