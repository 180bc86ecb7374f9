//! Trellis Test Utilities
//!
//! Shared test infrastructure for the Trellis workspace:
//! - A scriptable in-memory table reader
//! - Proptest generators for rows and linked datasets
//! - Fixtures for the language-course catalog
//! - Assertions over resolved record trees

pub use trellis_core::{
    FetchError, FieldValue, RawRow, Record, ReaderError, ReferenceMarker, RelationshipGraph,
    TableReader, TrellisConfig,
};

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

// ============================================================================
// MOCK READER
// ============================================================================

/// In-memory table reader with call counting and scripted failures.
#[derive(Debug, Default)]
pub struct MockTableReader {
    tables: RwLock<HashMap<String, Vec<RawRow>>>,
    failing: RwLock<HashSet<String>>,
    calls: Mutex<HashMap<String, u64>>,
    latency: Option<Duration>,
}

impl MockTableReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `rows` for `table`.
    pub fn with_table(self, table: impl Into<String>, rows: Vec<RawRow>) -> Self {
        self.insert_table(table, rows);
        self
    }

    /// Delay every fetch so concurrent callers overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Replace the rows served for `table`.
    pub fn insert_table(&self, table: impl Into<String>, rows: Vec<RawRow>) {
        self.tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.into(), rows);
    }

    /// Make every fetch of `table` fail with a transport error.
    pub fn fail_table(&self, table: impl Into<String>) {
        self.failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.into());
    }

    /// Undo [`fail_table`](Self::fail_table).
    pub fn heal_table(&self, table: &str) {
        self.failing
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(table);
    }

    /// Fetches issued for `table`, including failed ones.
    pub fn calls(&self, table: &str) -> u64 {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_calls(&self) -> u64 {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .sum()
    }
}

#[async_trait]
impl TableReader for MockTableReader {
    async fn fetch_all(&self, table: &str) -> Result<Vec<RawRow>, ReaderError> {
        *self
            .calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(table.to_string())
            .or_default() += 1;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        if self
            .failing
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(table)
        {
            return Err(ReaderError::Transport {
                reason: format!("scripted failure for {table}"),
            });
        }

        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
            .ok_or_else(|| ReaderError::TableNotFound {
                table: table.to_string(),
            })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for rows and linked datasets.

    use super::*;
    use proptest::prelude::*;

    /// Generate a record id carrying the default reference prefix.
    pub fn arb_record_id() -> impl Strategy<Value = String> {
        "[A-Za-z0-9]{1,10}".prop_map(|suffix| format!("rec{suffix}"))
    }

    /// Generate a scalar JSON value that never looks like a reference.
    pub fn arb_scalar_json() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            "[A-Z][a-z ]{0,11}".prop_map(Value::String),
        ]
    }

    /// Generate a row of scalar fields.
    pub fn arb_raw_row() -> impl Strategy<Value = RawRow> {
        (
            arb_record_id(),
            prop::collection::btree_map("[a-z_]{1,8}", arb_scalar_json(), 0..5),
        )
            .prop_map(|(id, fields)| {
                fields
                    .into_iter()
                    .fold(RawRow::new(id), |row, (name, value)| row.with_field(name, value))
            })
    }

    /// Generate three fully interlinked tables with random, possibly cyclic
    /// and possibly dangling references.
    pub fn arb_linked_dataset() -> impl Strategy<Value = LinkedDataset> {
        prop::array::uniform3(1usize..=4).prop_flat_map(|sizes| {
            let tables: Vec<_> = sizes
                .iter()
                .map(|&rows| {
                    let row_links: Vec<_> = sizes
                        .iter()
                        .map(|&target| prop::collection::vec(0..=target, 0..3))
                        .collect();
                    prop::collection::vec(row_links, rows)
                })
                .collect();
            tables.prop_map(move |links| LinkedDataset::build(&sizes, links))
        })
    }
}

/// A generated set of interlinked tables named `t0`, `t1`, ...
///
/// Every table links to every table, itself included. The field linking into
/// table `tN` is named `tN`. Index values equal to a table's size become ids
/// that do not exist.
#[derive(Debug, Clone)]
pub struct LinkedDataset {
    pub tables: Vec<(String, Vec<RawRow>)>,
}

impl LinkedDataset {
    fn build(sizes: &[usize], links: Vec<Vec<Vec<Vec<usize>>>>) -> Self {
        let tables = links
            .into_iter()
            .enumerate()
            .map(|(t, rows)| {
                let rows = rows
                    .into_iter()
                    .enumerate()
                    .map(|(r, targets)| {
                        let mut row = RawRow::new(format!("rect{t}r{r}"))
                            .with_field("label", json!(format!("T{t}R{r}")));
                        for (u, indices) in targets.into_iter().enumerate() {
                            if indices.is_empty() {
                                continue;
                            }
                            let ids: Vec<Value> = indices
                                .into_iter()
                                .map(|k| {
                                    if k < sizes[u] {
                                        json!(format!("rect{u}r{k}"))
                                    } else {
                                        json!(format!("rect{u}missing"))
                                    }
                                })
                                .collect();
                            row = row.with_field(format!("t{u}"), Value::Array(ids));
                        }
                        row
                    })
                    .collect();
                (format!("t{t}"), rows)
            })
            .collect();
        Self { tables }
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Configuration anchored at `t0` with every table linked to every table.
    pub fn config(&self) -> TrellisConfig {
        let names = self.table_names();
        TrellisConfig::new(
            "t0",
            names
                .iter()
                .map(|name| (name.clone(), names.clone()))
                .collect::<Vec<_>>(),
        )
    }

    pub fn reader(&self) -> MockTableReader {
        self.tables
            .iter()
            .fold(MockTableReader::new(), |reader, (name, rows)| {
                reader.with_table(name.clone(), rows.clone())
            })
    }

    /// Rows of `table` ingested with the default reference marker.
    pub fn records(&self, table: &str) -> Vec<Record> {
        let marker = ReferenceMarker::default();
        self.tables
            .iter()
            .find(|(name, _)| name == table)
            .map(|(_, rows)| {
                rows.iter()
                    .cloned()
                    .map(|row| Record::from_row(row, &marker))
                    .collect()
            })
            .unwrap_or_default()
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for the language-course catalog.

    use super::*;

    /// The catalog relationship layout. `constituents` is declared but not
    /// reachable from `courses`.
    pub fn catalog_config() -> TrellisConfig {
        TrellisConfig::new(
            "courses",
            [
                ("courses", vec!["lessons"]),
                (
                    "lessons",
                    vec![
                        "courses",
                        "sentence_structures",
                        "tense_markers",
                        "verbs",
                        "pronouns",
                    ],
                ),
                ("sentence_structures", vec![]),
                ("tense_markers", vec![]),
                ("verbs", vec![]),
                ("pronouns", vec![]),
                ("constituents", vec![]),
            ],
        )
    }

    /// Rows for every catalog table.
    pub fn catalog_reader() -> MockTableReader {
        MockTableReader::new()
            .with_table(
                "courses",
                vec![RawRow::new("recCourse1")
                    .with_field("course_name", json!("Beginner Spanish"))
                    .with_field("lessons", json!(["recLesson1", "recLesson2"]))],
            )
            .with_table(
                "lessons",
                vec![
                    RawRow::new("recLesson1")
                        .with_field("lesson_name", json!("Greetings"))
                        .with_field("display_name", json!("Lesson 1"))
                        .with_field("courses", json!(["recCourse1"]))
                        .with_field("verbs", json!(["recVerbSer", "recVerbEstar"]))
                        .with_field("pronouns", json!(["recPronYo", "recPronTu"]))
                        .with_field("sentence_structures", json!(["recSsBasic"]))
                        .with_field("tense_markers", json!(["recTmPresent"])),
                    RawRow::new("recLesson2")
                        .with_field("lesson_name", json!("Possession"))
                        .with_field("display_name", json!("Lesson 2"))
                        .with_field("courses", json!(["recCourse1"]))
                        .with_field("verbs", json!(["recVerbTener"]))
                        .with_field("pronouns", json!(["recPronYo"])),
                ],
            )
            .with_table(
                "verbs",
                vec![
                    RawRow::new("recVerbSer").with_field("infinitive", json!("ser")),
                    RawRow::new("recVerbEstar").with_field("infinitive", json!("estar")),
                    RawRow::new("recVerbTener").with_field("infinitive", json!("tener")),
                ],
            )
            .with_table(
                "pronouns",
                vec![
                    RawRow::new("recPronYo").with_field("text", json!("yo")),
                    RawRow::new("recPronTu").with_field("text", json!("tú")),
                ],
            )
            .with_table(
                "sentence_structures",
                vec![RawRow::new("recSsBasic")
                    .with_field("pattern", json!("subject verb object"))
                    .with_field("slots", json!(["subject", "verb", "object"]))],
            )
            .with_table(
                "tense_markers",
                vec![RawRow::new("recTmPresent").with_field("tense", json!("present"))],
            )
            .with_table(
                "constituents",
                vec![RawRow::new("recConst1").with_field("role", json!("subject"))],
            )
    }

    /// One course with two lessons and nothing else.
    pub fn course_lessons_config() -> TrellisConfig {
        TrellisConfig::new("courses", [("courses", vec!["lessons"]), ("lessons", vec![])])
    }

    pub fn course_lessons_reader() -> MockTableReader {
        MockTableReader::new()
            .with_table(
                "courses",
                vec![RawRow::new("recC1").with_field("lessons", json!(["recL1", "recL2"]))],
            )
            .with_table(
                "lessons",
                vec![
                    RawRow::new("recL1").with_field("name", json!("Intro")),
                    RawRow::new("recL2").with_field("name", json!("Basics")),
                ],
            )
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions over resolved record trees.

    use super::*;

    /// Deepest chain of linked records below `record`.
    pub fn linked_depth(record: &Record) -> usize {
        record
            .fields
            .values()
            .map(|value| match value {
                FieldValue::Linked(child) => 1 + linked_depth(child),
                FieldValue::LinkedList(children) => {
                    1 + children.iter().map(linked_depth).max().unwrap_or(0)
                }
                _ => 0,
            })
            .max()
            .unwrap_or(0)
    }

    /// Assert that `field` holds resolved records.
    #[track_caller]
    pub fn assert_linked(record: &Record, field: &str) {
        match record.get(field) {
            Some(value) if value.is_linked() => {}
            other => panic!("Expected {field} to be linked, got: {other:?}"),
        }
    }

    /// Assert that `field` was removed.
    #[track_caller]
    pub fn assert_absent(record: &Record, field: &str) {
        assert!(
            record.get(field).is_none(),
            "Expected {field} to be absent, got: {:?}",
            record.get(field)
        );
    }

    /// Assert that no resolved child of `table` still carries a field that
    /// links back to its parent's table.
    #[track_caller]
    pub fn assert_no_back_references(record: &Record, table: &str, graph: &RelationshipGraph) {
        for (field, value) in &record.fields {
            let children: Vec<&Record> = match value {
                FieldValue::Linked(child) => vec![child.as_ref()],
                FieldValue::LinkedList(children) => children.iter().collect(),
                _ => continue,
            };
            for child in children {
                if graph.is_link(field, table) {
                    assert!(
                        child.get(table).is_none(),
                        "Child {} of {table} still links back via {table}",
                        child.id
                    );
                }
                assert_no_back_references(child, field, graph);
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
