//! Tagged field values.
//!
//! The remote source only distinguishes references from plain strings by a
//! reserved prefix. That decision is made exactly once, when a raw row is
//! ingested, and is carried from then on by the [`FieldValue`] variant.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::Record;
use crate::RecordId;

/// Prefix the hosted spreadsheet backend uses for record identifiers.
pub const DEFAULT_REFERENCE_PREFIX: &str = "rec";

/// A plain scalar carried in a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl Scalar {
    /// Render back into the JSON shape the source delivered.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::Text(s) => Value::String(s.clone()),
        }
    }

    /// Borrow the text if this is a text scalar.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => Some(Self::Number(n.clone())),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Scalar {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

/// Value of a single record field.
///
/// `Reference` and `ReferenceList` hold bare identifiers as delivered by the
/// source. `Linked` and `LinkedList` only appear after the link resolver has
/// replaced those identifiers with the records they point at.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Scalar(Scalar),
    ScalarList(Vec<Scalar>),
    Reference(RecordId),
    ReferenceList(Vec<RecordId>),
    Linked(Box<Record>),
    LinkedList(Vec<Record>),
    /// Structured values (objects, mixed lists) passed through untouched.
    Opaque(Value),
}

impl FieldValue {
    /// Shorthand for a text scalar.
    pub fn text(s: impl Into<String>) -> Self {
        Self::Scalar(Scalar::Text(s.into()))
    }

    /// Shorthand for a single reference.
    pub fn reference(id: impl Into<RecordId>) -> Self {
        Self::Reference(id.into())
    }

    /// Shorthand for a reference list.
    pub fn references<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<RecordId>,
    {
        Self::ReferenceList(ids.into_iter().map(Into::into).collect())
    }

    /// True for values that still hold unresolved identifiers.
    pub fn is_reference(&self) -> bool {
        matches!(self, Self::Reference(_) | Self::ReferenceList(_))
    }

    /// True for values produced by link resolution.
    pub fn is_linked(&self) -> bool {
        matches!(self, Self::Linked(_) | Self::LinkedList(_))
    }

    /// Borrow the text if this is a text scalar.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Scalar(s) => s.as_text(),
            _ => None,
        }
    }

    /// Render into the flat JSON shape consumers expect, with linked records
    /// rendered as nested objects.
    pub fn to_json(&self) -> Value {
        match self {
            Self::Scalar(s) => s.to_json(),
            Self::ScalarList(items) => Value::Array(items.iter().map(Scalar::to_json).collect()),
            Self::Reference(id) => Value::String(id.clone()),
            Self::ReferenceList(ids) => {
                Value::Array(ids.iter().cloned().map(Value::String).collect())
            }
            Self::Linked(record) => record.to_json(),
            Self::LinkedList(records) => Value::Array(records.iter().map(Record::to_json).collect()),
            Self::Opaque(value) => value.clone(),
        }
    }
}

/// Decides whether a string is a cross-table reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceMarker {
    prefix: String,
}

impl Default for ReferenceMarker {
    fn default() -> Self {
        Self::new(DEFAULT_REFERENCE_PREFIX)
    }
}

impl ReferenceMarker {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// An empty prefix never matches.
    pub fn is_reference(&self, s: &str) -> bool {
        !self.prefix.is_empty() && s.starts_with(&self.prefix)
    }

    /// Classify a raw JSON value into a [`FieldValue`].
    ///
    /// A list counts as a reference list only when it is non-empty and every
    /// element carries the marker; anything else that is a list of scalars is
    /// a scalar list, and nested structures stay opaque.
    pub fn classify(&self, value: Value) -> FieldValue {
        match value {
            Value::String(s) if self.is_reference(&s) => FieldValue::Reference(s),
            Value::Array(items) => {
                let all_refs = !items.is_empty()
                    && items
                        .iter()
                        .all(|item| item.as_str().is_some_and(|s| self.is_reference(s)));
                if all_refs {
                    let ids = items
                        .into_iter()
                        .filter_map(|item| match item {
                            Value::String(s) => Some(s),
                            _ => None,
                        })
                        .collect();
                    return FieldValue::ReferenceList(ids);
                }

                let scalars: Option<Vec<Scalar>> = items.iter().map(Scalar::from_json).collect();
                match scalars {
                    Some(scalars) => FieldValue::ScalarList(scalars),
                    None => FieldValue::Opaque(Value::Array(items)),
                }
            }
            Value::Object(_) => FieldValue::Opaque(value),
            other => match Scalar::from_json(&other) {
                Some(scalar) => FieldValue::Scalar(scalar),
                None => FieldValue::Opaque(other),
            },
        }
    }
}
