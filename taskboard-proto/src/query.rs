//! Query filters and partial-update patches.
//!
//! A [`Filter`] selects documents by comparing one field; a [`Patch`] is an
//! ordered list of per-field updates merged atomically into an existing
//! document. Both are evaluated by the [`engine`](crate::engine) on whichever
//! side owns the data.

use serde::{Deserialize, Serialize};

use crate::value::{Document, FieldValue};

/// Comparison applied by a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueryOp {
    /// Field equals the value.
    Eq,
    /// Field is an array containing an element equal to the value.
    ArrayContains,
    /// Field is an array containing the value as an id: either a string
    /// equal to it, or a map whose `uid` field equals it.
    ArrayContainsId,
}

/// A single-field filter, e.g. `groupCode == "ABC123"`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    /// Field name to inspect.
    pub field: String,
    /// Comparison to apply.
    pub op: QueryOp,
    /// Operand.
    pub value: FieldValue,
}

impl Filter {
    /// `field == value`.
    pub fn eq(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self {
            field: field.into(),
            op: QueryOp::Eq,
            value: value.into(),
        }
    }

    /// `field array-contains value`.
    pub fn array_contains(field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Self {
            field: field.into(),
            op: QueryOp::ArrayContains,
            value: value.into(),
        }
    }

    /// `field` contains `id` either as a raw string or as `{uid: id}`.
    pub fn array_contains_id(field: impl Into<String>, id: &str) -> Self {
        Self {
            field: field.into(),
            op: QueryOp::ArrayContainsId,
            value: FieldValue::from(id),
        }
    }

    /// Whether the document satisfies this filter. Missing fields never match.
    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        let Some(field) = doc.get(&self.field) else {
            return false;
        };
        match self.op {
            QueryOp::Eq => *field == self.value,
            QueryOp::ArrayContains => field
                .as_array()
                .is_some_and(|items| items.contains(&self.value)),
            QueryOp::ArrayContainsId => {
                let Some(wanted) = self.value.as_str() else {
                    return false;
                };
                field
                    .as_array()
                    .is_some_and(|items| items.iter().any(|item| id_of(item) == Some(wanted)))
            }
        }
    }
}

/// Returns the id carried by an array element: the string itself, or the
/// `uid` field of a map.
#[must_use]
pub fn id_of(value: &FieldValue) -> Option<&str> {
    match value {
        FieldValue::String(s) => Some(s),
        FieldValue::Map(map) => map.get("uid").and_then(FieldValue::as_str),
        _ => None,
    }
}

/// How a single field is changed by a [`Patch`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldUpdate {
    /// Overwrite the field.
    Set(FieldValue),
    /// Append each element not already present. A non-array field is
    /// replaced by an array.
    ArrayUnion(Vec<FieldValue>),
    /// Remove every element equal to one of these. A non-array field is
    /// replaced by an empty array.
    ArrayRemove(Vec<FieldValue>),
}

/// An ordered set of field updates applied as one atomic merge.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Patch {
    updates: Vec<(String, FieldUpdate)>,
}

impl Patch {
    /// Creates an empty patch.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            updates: Vec::new(),
        }
    }

    /// Adds a `Set` update.
    #[must_use]
    pub fn set(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.updates
            .push((field.into(), FieldUpdate::Set(value.into())));
        self
    }

    /// Adds an `ArrayUnion` update.
    #[must_use]
    pub fn array_union(mut self, field: impl Into<String>, values: Vec<FieldValue>) -> Self {
        self.updates
            .push((field.into(), FieldUpdate::ArrayUnion(values)));
        self
    }

    /// Adds an `ArrayRemove` update.
    #[must_use]
    pub fn array_remove(mut self, field: impl Into<String>, values: Vec<FieldValue>) -> Self {
        self.updates
            .push((field.into(), FieldUpdate::ArrayRemove(values)));
        self
    }

    /// Whether the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty()
    }

    /// Iterates the updates in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &FieldUpdate)> {
        self.updates.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Names of the fields this patch touches, in order.
    #[must_use]
    pub fn fields(&self) -> Vec<&str> {
        self.updates.iter().map(|(k, _)| k.as_str()).collect()
    }

    /// Returns the value of a `Set` update for `field`, if any.
    #[must_use]
    pub fn get_set(&self, field: &str) -> Option<&FieldValue> {
        self.updates.iter().rev().find_map(|(k, u)| match u {
            FieldUpdate::Set(v) if k == field => Some(v),
            _ => None,
        })
    }

    /// Merges this patch into `doc`.
    pub fn apply_to(&self, doc: &mut Document) {
        for (field, update) in &self.updates {
            match update {
                FieldUpdate::Set(value) => {
                    doc.insert(field.clone(), value.clone());
                }
                FieldUpdate::ArrayUnion(values) => {
                    let mut items = match doc.remove(field) {
                        Some(FieldValue::Array(items)) => items,
                        _ => Vec::new(),
                    };
                    for value in values {
                        if !items.contains(value) {
                            items.push(value.clone());
                        }
                    }
                    doc.insert(field.clone(), FieldValue::Array(items));
                }
                FieldUpdate::ArrayRemove(values) => {
                    let mut items = match doc.remove(field) {
                        Some(FieldValue::Array(items)) => items,
                        _ => Vec::new(),
                    };
                    items.retain(|item| !values.contains(item));
                    doc.insert(field.clone(), FieldValue::Array(items));
                }
            }
        }
    }
}
