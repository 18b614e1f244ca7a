//! Group model and its document mapping.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::{Document, FieldValue, StoredDocument};

/// Persisted field names of a group document.
pub mod fields {
    /// Display name.
    pub const NAME: &str = "name";
    /// Owner user id.
    pub const OWNER: &str = "owner";
    /// Member list (raw ids or `{uid, ...}` objects).
    pub const MEMBERS: &str = "members";
    /// User ids awaiting approval.
    pub const PENDING_MEMBERS: &str = "pendingMembers";
    /// Auxiliary per-member data.
    pub const MEMBER_DETAILS: &str = "memberDetails";
    /// Ordered status vocabulary.
    pub const STATUSES_ORDER: &str = "statusesOrder";
}

/// Status vocabulary used when a group defines none.
pub const DEFAULT_STATUSES: [&str; 3] = ["To Do", "In Progress", "Completed"];

/// Returns [`DEFAULT_STATUSES`] as owned strings.
#[must_use]
pub fn default_statuses() -> Vec<String> {
    DEFAULT_STATUSES.iter().map(|s| (*s).to_string()).collect()
}

/// One entry of a group's member list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Member {
    /// A bare user id.
    Id(String),
    /// A member object; its `uid` field (if any) identifies the user.
    Object(BTreeMap<String, FieldValue>),
}

impl Member {
    /// The user id this entry refers to.
    #[must_use]
    pub fn uid(&self) -> Option<&str> {
        match self {
            Self::Id(id) => Some(id),
            Self::Object(map) => map.get("uid").and_then(FieldValue::as_str),
        }
    }

    fn from_value(value: &FieldValue) -> Option<Self> {
        match value {
            FieldValue::String(id) => Some(Self::Id(id.clone())),
            FieldValue::Map(map) => Some(Self::Object(map.clone())),
            _ => None,
        }
    }

    /// Renders the entry as a document value.
    #[must_use]
    pub fn to_value(&self) -> FieldValue {
        match self {
            Self::Id(id) => FieldValue::String(id.clone()),
            Self::Object(map) => FieldValue::Map(map.clone()),
        }
    }
}

/// A group of users sharing a task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Document id, also the join code.
    pub code: String,
    /// Display name.
    pub name: String,
    /// Owner user id.
    pub owner: String,
    /// Members, in stored order (duplicates are kept).
    pub members: Vec<Member>,
    /// User ids awaiting approval.
    pub pending_members: Vec<String>,
    /// Auxiliary per-member data, passed through untouched.
    pub member_details: Document,
    /// Ordered status vocabulary, if the group defines one.
    pub statuses_order: Option<Vec<String>>,
}

fn string_list(value: Option<&FieldValue>) -> Option<Vec<String>> {
    value.and_then(FieldValue::as_array).map(|items| {
        items
            .iter()
            .filter_map(FieldValue::as_str)
            .map(str::to_string)
            .collect()
    })
}

impl Group {
    /// Creates a group with no members and no custom vocabulary.
    pub fn new(code: impl Into<String>, name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            owner: owner.into(),
            members: Vec::new(),
            pending_members: Vec::new(),
            member_details: Document::new(),
            statuses_order: None,
        }
    }

    /// Decodes a group document. Non-list member fields become empty lists.
    #[must_use]
    pub fn from_document(doc: &StoredDocument) -> Self {
        let f = &doc.fields;
        Self {
            code: doc.id.clone(),
            name: f
                .get(fields::NAME)
                .and_then(FieldValue::as_str)
                .unwrap_or_default()
                .to_string(),
            owner: f
                .get(fields::OWNER)
                .and_then(FieldValue::as_str)
                .unwrap_or_default()
                .to_string(),
            members: f
                .get(fields::MEMBERS)
                .and_then(FieldValue::as_array)
                .map(|items| items.iter().filter_map(Member::from_value).collect())
                .unwrap_or_default(),
            pending_members: string_list(f.get(fields::PENDING_MEMBERS)).unwrap_or_default(),
            member_details: f
                .get(fields::MEMBER_DETAILS)
                .and_then(FieldValue::as_map)
                .cloned()
                .unwrap_or_default(),
            statuses_order: string_list(f.get(fields::STATUSES_ORDER)),
        }
    }

    /// Renders the full document body (without the id).
    #[must_use]
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.insert(fields::NAME.into(), self.name.clone().into());
        doc.insert(fields::OWNER.into(), self.owner.clone().into());
        doc.insert(
            fields::MEMBERS.into(),
            FieldValue::Array(self.members.iter().map(Member::to_value).collect()),
        );
        doc.insert(
            fields::PENDING_MEMBERS.into(),
            self.pending_members.clone().into(),
        );
        doc.insert(
            fields::MEMBER_DETAILS.into(),
            FieldValue::Map(self.member_details.clone()),
        );
        if let Some(statuses) = &self.statuses_order {
            doc.insert(fields::STATUSES_ORDER.into(), statuses.clone().into());
        }
        doc
    }

    /// Whether `uid` owns the group.
    #[must_use]
    pub fn is_owned_by(&self, uid: &str) -> bool {
        self.owner == uid
    }

    /// Whether `uid` appears in the member list, as a raw id or an object.
    #[must_use]
    pub fn has_member(&self, uid: &str) -> bool {
        self.members.iter().any(|m| m.uid() == Some(uid))
    }

    /// The group's status vocabulary, or [`DEFAULT_STATUSES`].
    #[must_use]
    pub fn statuses(&self) -> Vec<String> {
        self.statuses_order.clone().unwrap_or_else(default_statuses)
    }
}
