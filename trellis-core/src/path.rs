//! Dotted field paths into resolved record trees.
//!
//! `0.lessons[1].display_name` walks the first record of a table, its
//! `lessons` list, the second lesson, and finally that lesson's display name.
//! A non-numeric key applied to a list of records selects the record with
//! that id, so `recC1.lessons` also works.

use std::fmt;
use std::str::FromStr;

use serde_json::Value;

use crate::error::PathError;
use crate::record::Record;
use crate::value::{FieldValue, Scalar};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let invalid = |reason: &str| PathError::InvalidPath {
            path: path.to_string(),
            reason: reason.to_string(),
        };

        if path.trim().is_empty() {
            return Err(invalid("path is empty"));
        }

        let mut segments = Vec::new();
        for part in path.split('.') {
            let (key, mut rest) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };

            if key.is_empty() && rest.is_empty() {
                return Err(invalid("empty segment"));
            }
            if !key.is_empty() {
                segments.push(match key.parse::<usize>() {
                    Ok(index) => PathSegment::Index(index),
                    Err(_) => PathSegment::Key(key.to_string()),
                });
            }

            while !rest.is_empty() {
                let close = rest
                    .find(']')
                    .ok_or_else(|| invalid("unclosed index bracket"))?;
                if !rest.starts_with('[') {
                    return Err(invalid("unexpected text after index"));
                }
                let index = rest[1..close]
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| invalid("index must be a non-negative integer"))?;
                segments.push(PathSegment::Index(index));
                rest = &rest[close + 1..];
            }
        }

        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Walk the path starting at a table's record list.
    pub fn evaluate(&self, records: &[Record]) -> Option<Value> {
        let mut cursor = Cursor::Records(records);
        for segment in &self.segments {
            cursor = cursor.step(segment)?;
        }
        Some(cursor.to_json())
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if i == 0 => write!(f, "{key}")?,
                PathSegment::Key(key) => write!(f, ".{key}")?,
                PathSegment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum Cursor<'a> {
    Records(&'a [Record]),
    Record(&'a Record),
    Field(&'a FieldValue),
    Scalar(&'a Scalar),
    Id(&'a str),
    Json(&'a Value),
}

impl<'a> Cursor<'a> {
    fn step(self, segment: &PathSegment) -> Option<Cursor<'a>> {
        match (self, segment) {
            (Cursor::Records(records), PathSegment::Index(i)) => {
                records.get(*i).map(Cursor::Record)
            }
            (Cursor::Records(records), PathSegment::Key(id)) => {
                records.iter().find(|r| &r.id == id).map(Cursor::Record)
            }
            (Cursor::Record(record), PathSegment::Key(key)) => match record.get(key) {
                Some(value) => Some(Cursor::Field(value)),
                None if key == "id" => Some(Cursor::Id(record.id.as_str())),
                None => None,
            },
            (Cursor::Field(value), _) => match (value, segment) {
                (FieldValue::Linked(record), _) => Cursor::Record(record.as_ref()).step(segment),
                (FieldValue::LinkedList(records), _) => {
                    Cursor::Records(records.as_slice()).step(segment)
                }
                (FieldValue::ScalarList(items), PathSegment::Index(i)) => {
                    items.get(*i).map(Cursor::Scalar)
                }
                (FieldValue::ReferenceList(ids), PathSegment::Index(i)) => {
                    ids.get(*i).map(|id| Cursor::Id(id.as_str()))
                }
                (FieldValue::Opaque(json), _) => Cursor::Json(json).step(segment),
                _ => None,
            },
            (Cursor::Json(json), PathSegment::Key(key)) => json.get(key.as_str()).map(Cursor::Json),
            (Cursor::Json(json), PathSegment::Index(i)) => json.get(*i).map(Cursor::Json),
            _ => None,
        }
    }

    fn to_json(self) -> Value {
        match self {
            Cursor::Records(records) => Value::Array(records.iter().map(Record::to_json).collect()),
            Cursor::Record(record) => record.to_json(),
            Cursor::Field(value) => value.to_json(),
            Cursor::Scalar(scalar) => scalar.to_json(),
            Cursor::Id(id) => Value::String(id.to_string()),
            Cursor::Json(json) => json.clone(),
        }
    }
}
