//! Task model and its document mapping.
//!
//! Task documents are loosely typed: any field may be missing or hold an
//! unexpected type. [`Task::from_document`] substitutes defaults for every
//! absent field so the rest of the system works with a fully populated
//! [`Task`]. [`TaskPatch`] describes the subset of fields one mutation
//! changes and knows how to apply itself locally and how to render itself
//! as a remote [`Patch`].

use serde::{Deserialize, Serialize};

use crate::query::Patch;
use crate::value::{Document, FieldValue, StoredDocument};

/// Persisted field names of a task document.
pub mod fields {
    /// Task display name.
    pub const NAME: &str = "name";
    /// Status label.
    pub const STATUS: &str = "status";
    /// Creation date string.
    pub const DATE: &str = "date";
    /// Owning group's code.
    pub const GROUP_CODE: &str = "groupCode";
    /// Assignee user id.
    pub const ASSIGNED_TO: &str = "assignedTo";
    /// Assignee field written by older clients; read-only fallback.
    pub const LEGACY_ASSIGNED_USER_ID: &str = "assignedUserId";
    /// Favorite flag.
    pub const IS_FAVORITE: &str = "isFavorite";
    /// Priority label.
    pub const PRIORITY: &str = "priority";
    /// Completion percentage.
    pub const COMPLETION: &str = "completion";
    /// Creation instant.
    pub const CREATED_AT: &str = "createdAt";
    /// Last modification instant.
    pub const UPDATED_AT: &str = "updatedAt";
    /// Last status change instant.
    pub const STATUS_UPDATED_AT: &str = "statusUpdatedAt";
    /// Creator user id.
    pub const CREATED_BY: &str = "createdBy";
}

/// Status given to tasks whose document has none.
pub const STATUS_TODO: &str = "To Do";

/// Status label that locks completion at 100.
pub const STATUS_COMPLETED: &str = "Completed";

/// Name given to tasks whose document has none.
pub const DEFAULT_TASK_NAME: &str = "Unnamed Task";

/// Highest completion percentage.
pub const MAX_COMPLETION: u8 = 100;

/// Identifier of a task document, assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Wraps a store-assigned document id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A task belonging to one group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Store-assigned id.
    pub id: TaskId,
    /// Display name.
    pub name: String,
    /// Free-form status label, validated against the group's vocabulary
    /// only by the UI.
    pub status: String,
    /// Creation date string.
    pub date: String,
    /// Code of the owning group.
    pub group_code: String,
    /// Assigned user id.
    pub assigned_to: Option<String>,
    /// Whether the task is starred.
    pub is_favorite: bool,
    /// Priority label.
    pub priority: Option<String>,
    /// Completion percentage, 0 to 100.
    pub completion: u8,
    /// ISO-8601 creation instant.
    pub created_at: String,
    /// ISO-8601 last modification instant.
    pub updated_at: String,
    /// ISO-8601 instant of the last status change.
    pub status_updated_at: String,
    /// User id of the creator.
    pub created_by: String,
}

/// Values substituted for fields missing from a task document.
#[derive(Debug, Clone, Copy)]
pub struct DecodeDefaults<'a> {
    /// Group code used when the document has none.
    pub group_code: &'a str,
    /// Acting user, used when `createdBy` is missing.
    pub acting_user: Option<&'a str>,
    /// Current instant (ISO-8601).
    pub now: &'a str,
    /// Current date string.
    pub today: &'a str,
}

fn text(doc: &Document, field: &str) -> Option<String> {
    doc.get(field)
        .filter(|v| v.is_truthy())
        .and_then(FieldValue::as_str)
        .map(str::to_string)
}

impl Task {
    /// Decodes a task document, filling in defaults for absent fields.
    ///
    /// A field counts as absent when it is missing, null, `false`, zero or
    /// an empty string. Timestamps fall back along a chain: `createdAt` and
    /// `updatedAt` to `date`, `statusUpdatedAt` to `updatedAt`, and finally
    /// to the current instant.
    #[must_use]
    pub fn from_document(doc: &StoredDocument, defaults: &DecodeDefaults<'_>) -> Self {
        let f = &doc.fields;
        let date = text(f, fields::DATE);
        let updated_raw = text(f, fields::UPDATED_AT);

        let completion = f
            .get(fields::COMPLETION)
            .and_then(FieldValue::as_i64)
            .map_or(0, |n| u8::try_from(n.clamp(0, i64::from(MAX_COMPLETION))).unwrap_or(0));

        Self {
            id: TaskId::new(doc.id.clone()),
            name: text(f, fields::NAME).unwrap_or_else(|| DEFAULT_TASK_NAME.to_string()),
            status: text(f, fields::STATUS).unwrap_or_else(|| STATUS_TODO.to_string()),
            date: date.clone().unwrap_or_else(|| defaults.today.to_string()),
            group_code: text(f, fields::GROUP_CODE)
                .unwrap_or_else(|| defaults.group_code.to_string()),
            assigned_to: text(f, fields::ASSIGNED_TO)
                .or_else(|| text(f, fields::LEGACY_ASSIGNED_USER_ID)),
            is_favorite: f
                .get(fields::IS_FAVORITE)
                .and_then(FieldValue::as_bool)
                .unwrap_or(false),
            priority: text(f, fields::PRIORITY),
            completion,
            created_at: text(f, fields::CREATED_AT)
                .or_else(|| date.clone())
                .unwrap_or_else(|| defaults.now.to_string()),
            updated_at: updated_raw
                .clone()
                .or_else(|| date.clone())
                .unwrap_or_else(|| defaults.now.to_string()),
            status_updated_at: text(f, fields::STATUS_UPDATED_AT)
                .or(updated_raw)
                .unwrap_or_else(|| defaults.now.to_string()),
            created_by: text(f, fields::CREATED_BY)
                .unwrap_or_else(|| defaults.acting_user.unwrap_or_default().to_string()),
        }
    }

    /// Renders the full document body (without the id).
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(fields::NAME.into(), self.name.clone().into());
        doc.insert(fields::STATUS.into(), self.status.clone().into());
        doc.insert(fields::DATE.into(), self.date.clone().into());
        doc.insert(fields::GROUP_CODE.into(), self.group_code.clone().into());
        doc.insert(fields::ASSIGNED_TO.into(), self.assigned_to.clone().into());
        doc.insert(fields::IS_FAVORITE.into(), self.is_favorite.into());
        doc.insert(fields::PRIORITY.into(), self.priority.clone().into());
        doc.insert(fields::COMPLETION.into(), self.completion.into());
        doc.insert(fields::CREATED_AT.into(), self.created_at.clone().into());
        doc.insert(fields::UPDATED_AT.into(), self.updated_at.clone().into());
        doc.insert(
            fields::STATUS_UPDATED_AT.into(),
            self.status_updated_at.clone().into(),
        );
        doc.insert(fields::CREATED_BY.into(), self.created_by.clone().into());
        doc
    }

    /// Whether the task sits in the completed status.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.status == STATUS_COMPLETED
    }
}

/// The fields changed by one task mutation.
///
/// `None` means "unchanged". For the nullable fields the inner `Option` is
/// the new value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskPatch {
    /// New name.
    pub name: Option<String>,
    /// New status.
    pub status: Option<String>,
    /// New priority.
    pub priority: Option<Option<String>>,
    /// New assignee.
    pub assigned_to: Option<Option<String>>,
    /// New favorite flag.
    pub is_favorite: Option<bool>,
    /// New completion percentage.
    pub completion: Option<u8>,
    /// New modification instant.
    pub updated_at: Option<String>,
    /// New status change instant.
    pub status_updated_at: Option<String>,
}

impl TaskPatch {
    /// Applies the changed fields to a cached task.
    pub fn apply(&self, task: &mut Task) {
        if let Some(name) = &self.name {
            task.name.clone_from(name);
        }
        if let Some(status) = &self.status {
            task.status.clone_from(status);
        }
        if let Some(priority) = &self.priority {
            task.priority.clone_from(priority);
        }
        if let Some(assigned_to) = &self.assigned_to {
            task.assigned_to.clone_from(assigned_to);
        }
        if let Some(is_favorite) = self.is_favorite {
            task.is_favorite = is_favorite;
        }
        if let Some(completion) = self.completion {
            task.completion = completion;
        }
        if let Some(updated_at) = &self.updated_at {
            task.updated_at.clone_from(updated_at);
        }
        if let Some(status_updated_at) = &self.status_updated_at {
            task.status_updated_at.clone_from(status_updated_at);
        }
    }

    /// Renders exactly the changed fields as a remote partial update.
    #[must_use]
    pub fn to_patch(&self) -> Patch {
        let mut patch = Patch::new();
        if let Some(name) = &self.name {
            patch = patch.set(fields::NAME, name.clone());
        }
        if let Some(status) = &self.status {
            patch = patch.set(fields::STATUS, status.clone());
        }
        if let Some(priority) = &self.priority {
            patch = patch.set(fields::PRIORITY, priority.clone());
        }
        if let Some(assigned_to) = &self.assigned_to {
            patch = patch.set(fields::ASSIGNED_TO, assigned_to.clone());
        }
        if let Some(is_favorite) = self.is_favorite {
            patch = patch.set(fields::IS_FAVORITE, is_favorite);
        }
        if let Some(completion) = self.completion {
            patch = patch.set(fields::COMPLETION, completion);
        }
        if let Some(updated_at) = &self.updated_at {
            patch = patch.set(fields::UPDATED_AT, updated_at.clone());
        }
        if let Some(status_updated_at) = &self.status_updated_at {
            patch = patch.set(fields::STATUS_UPDATED_AT, status_updated_at.clone());
        }
        patch
    }
}
