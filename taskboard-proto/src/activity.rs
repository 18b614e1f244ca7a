//! Activity log entries: the append-only audit trail of task changes.

use serde::{Deserialize, Serialize};

use crate::task::TaskId;
use crate::value::{Document, FieldValue};

/// Kind of change recorded by an activity entry.
///
/// The string forms are persisted and read by other clients; they must not
/// change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeType {
    /// Status label changed.
    StatusChange,
    /// Priority changed.
    PriorityChange,
    /// Task renamed.
    NameChange,
    /// Favorite flag toggled.
    FavoriteChange,
    /// Assignee changed.
    AssignmentChange,
    /// Completion percentage changed.
    CompletionUpdate,
    /// Task deleted.
    TaskDeleted,
}

impl ChangeType {
    /// Every change type, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::StatusChange,
        Self::PriorityChange,
        Self::NameChange,
        Self::FavoriteChange,
        Self::AssignmentChange,
        Self::CompletionUpdate,
        Self::TaskDeleted,
    ];

    /// The persisted string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::StatusChange => "status_change",
            Self::PriorityChange => "priority_change",
            Self::NameChange => "name_change",
            Self::FavoriteChange => "favorite_change",
            Self::AssignmentChange => "assignment_change",
            Self::CompletionUpdate => "completion_update",
            Self::TaskDeleted => "task_deleted",
        }
    }

    /// Parses the persisted string form.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == value)
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    /// Task the change applied to.
    pub task_id: TaskId,
    /// What changed.
    pub change_type: ChangeType,
    /// Value before the change.
    pub old_value: FieldValue,
    /// Value after the change.
    pub new_value: FieldValue,
    /// Acting user, if one was signed in.
    pub user_id: Option<String>,
    /// ISO-8601 instant the entry was stamped.
    pub timestamp: String,
    /// Group of the task when the entry was stamped.
    pub group_code: Option<String>,
}

impl ActivityLogEntry {
    /// Renders the entry as an `activity_logs` document.
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert("taskId".into(), self.task_id.as_str().into());
        doc.insert("changeType".into(), self.change_type.as_str().into());
        doc.insert("oldValue".into(), self.old_value.clone());
        doc.insert("newValue".into(), self.new_value.clone());
        doc.insert("userId".into(), self.user_id.clone().into());
        doc.insert("timestamp".into(), self.timestamp.clone().into());
        doc.insert("groupCode".into(), self.group_code.clone().into());
        doc
    }

    /// Reads an entry back from an `activity_logs` document.
    ///
    /// Returns `None` if the task id or change type is missing or unknown.
    #[must_use]
    pub fn from_document(doc: &Document) -> Option<Self> {
        let text = |field: &str| doc.get(field).and_then(FieldValue::as_str).map(str::to_string);
        Some(Self {
            task_id: TaskId::new(text("taskId")?),
            change_type: ChangeType::parse(&text("changeType")?)?,
            old_value: doc.get("oldValue").cloned().unwrap_or_default(),
            new_value: doc.get("newValue").cloned().unwrap_or_default(),
            user_id: text("userId"),
            timestamp: text("timestamp").unwrap_or_default(),
            group_code: text("groupCode"),
        })
    }
}
