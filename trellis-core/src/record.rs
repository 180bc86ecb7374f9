//! Records as delivered by the source and as held by the cache.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::value::{FieldValue, ReferenceMarker};
use crate::RecordId;

/// A row exactly as the table reader hands it over: an id plus untyped fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRow {
    pub id: RecordId,
    #[serde(default)]
    pub fields: Map<String, Value>,
}

impl RawRow {
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            fields: Map::new(),
        }
    }

    /// Add a field, builder style.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }
}

/// A record with typed fields.
///
/// The same type serves before and after link resolution: resolving a record
/// replaces its reference fields in place with [`FieldValue::Linked`] or
/// [`FieldValue::LinkedList`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(id: impl Into<RecordId>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    /// Ingest a raw row, classifying every field once.
    pub fn from_row(row: RawRow, marker: &ReferenceMarker) -> Self {
        let fields = row
            .fields
            .into_iter()
            .map(|(name, value)| (name, marker.classify(value)))
            .collect();
        Self { id: row.id, fields }
    }

    /// Add a field, builder style.
    pub fn with_field(mut self, name: impl Into<String>, value: FieldValue) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.fields.insert(name.into(), value)
    }

    pub fn remove(&mut self, name: &str) -> Option<FieldValue> {
        self.fields.remove(name)
    }

    /// True if any field holds resolved records.
    pub fn has_linked_fields(&self) -> bool {
        self.fields.values().any(FieldValue::is_linked)
    }

    /// Flat JSON object: `{"id": .., "<field>": ..}`.
    ///
    /// The record id always wins over a field that happens to be called `id`.
    pub fn to_json(&self) -> Value {
        let mut object = Map::with_capacity(self.fields.len() + 1);
        for (name, value) in &self.fields {
            object.insert(name.clone(), value.to_json());
        }
        object.insert("id".to_string(), Value::String(self.id.clone()));
        Value::Object(object)
    }
}
