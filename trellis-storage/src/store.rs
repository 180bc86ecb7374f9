//! The authoritative in-memory table map and its persisted mirror.
//!
//! Readers only ever see whole tables: a commit swaps the entire record list
//! for a table in one step. Every commit is mirrored to the snapshot backend
//! before the committing call returns. Backend failures are logged and
//! counted but never undo the in-memory commit.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use trellis_core::{Record, RecordId, RelationshipGraph, StoreError, TableName};

use crate::backend::{SnapshotBackend, SnapshotSlot};

/// Why a persisted snapshot was discarded at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum InvalidationReason {
    /// The backend could not be read.
    ReadFailed(String),
    /// One of the slots did not parse.
    Corrupt(String),
    /// The snapshot was written under a different relationship graph.
    SchemaChanged,
    /// Tables the anchor depends on are absent from the snapshot.
    MissingTables(Vec<TableName>),
}

/// What `CacheStore::open` found in the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RestoreOutcome {
    /// Every declared table was restored.
    Restored {
        tables: usize,
        written_at: DateTime<Utc>,
    },
    /// Nothing was persisted.
    Empty,
    /// A snapshot existed but was discarded and cleared.
    Invalidated { reason: InvalidationReason },
}

impl RestoreOutcome {
    pub fn is_restored(&self) -> bool {
        matches!(self, Self::Restored { .. })
    }
}

/// Result of a generation-checked commit.
#[derive(Debug, Clone)]
pub struct CommitOutcome {
    /// The table as stored, after duplicate ids were dropped.
    pub records: Arc<Vec<Record>>,
    /// False when the store was cleared after the caller captured its generation.
    pub committed: bool,
}

#[derive(Debug, Clone)]
struct TableEntry {
    records: Arc<Vec<Record>>,
    index: HashMap<RecordId, usize>,
}

impl TableEntry {
    /// Index records by id. The first occurrence of an id wins.
    fn build(table: &str, records: Vec<Record>) -> Self {
        let mut index = HashMap::with_capacity(records.len());
        let mut kept = Vec::with_capacity(records.len());
        let mut dropped = 0usize;

        for record in records {
            if index.contains_key(&record.id) {
                dropped += 1;
                continue;
            }
            index.insert(record.id.clone(), kept.len());
            kept.push(record);
        }

        if dropped > 0 {
            warn!(table, dropped, "Dropped records with duplicate ids");
        }

        Self {
            records: Arc::new(kept),
            index,
        }
    }

    fn get(&self, id: &str) -> Option<&Record> {
        self.index.get(id).and_then(|&i| self.records.get(i))
    }
}

#[derive(Debug, Default)]
struct StoreState {
    tables: HashMap<TableName, TableEntry>,
    /// Bumped by every clear. Fetches started under an older generation
    /// must not commit.
    generation: u64,
}

/// In-memory table map mirrored to a snapshot backend.
pub struct CacheStore {
    state: RwLock<StoreState>,
    graph: Arc<RelationshipGraph>,
    /// Tables a restored snapshot must contain.
    required: Vec<TableName>,
    backend: Arc<dyn SnapshotBackend>,
    /// Serializes snapshot writes and clears so the backend always holds the
    /// latest in-memory state.
    persist_lock: Mutex<()>,
    persist_failures: AtomicU64,
}

impl CacheStore {
    /// Create a store and restore whatever the backend holds.
    ///
    /// A snapshot that cannot be read, does not parse, was written under a
    /// different graph, or lacks one of the `required` tables is discarded:
    /// both slots are cleared and the store starts empty.
    pub async fn open(
        backend: Arc<dyn SnapshotBackend>,
        graph: Arc<RelationshipGraph>,
        required: Vec<TableName>,
    ) -> (Self, RestoreOutcome) {
        let store = Self {
            state: RwLock::new(StoreState::default()),
            graph,
            required,
            backend,
            persist_lock: Mutex::new(()),
            persist_failures: AtomicU64::new(0),
        };

        let outcome = match store.load_snapshot().await {
            Ok(Some((tables, written_at))) => {
                let count = tables.len();
                {
                    let mut state = store.write_state();
                    for (table, records) in tables {
                        let entry = TableEntry::build(&table, records);
                        state.tables.insert(table, entry);
                    }
                }
                info!(tables = count, %written_at, "Restored cache snapshot");
                RestoreOutcome::Restored {
                    tables: count,
                    written_at,
                }
            }
            Ok(None) => {
                debug!("No cache snapshot to restore");
                RestoreOutcome::Empty
            }
            Err(reason) => {
                warn!(?reason, "Discarding cache snapshot");
                if let Err(e) = store.backend.clear_slots().await {
                    warn!(error = %e, "Failed to clear discarded snapshot");
                }
                RestoreOutcome::Invalidated { reason }
            }
        };

        (store, outcome)
    }

    async fn load_snapshot(
        &self,
    ) -> Result<Option<(BTreeMap<TableName, Vec<Record>>, DateTime<Utc>)>, InvalidationReason> {
        let read_failed = |e: StoreError| InvalidationReason::ReadFailed(e.to_string());

        let data = self
            .backend
            .read_slot(SnapshotSlot::Data)
            .await
            .map_err(read_failed)?;
        let schema = self
            .backend
            .read_slot(SnapshotSlot::Schema)
            .await
            .map_err(read_failed)?;

        let Some(data) = data else {
            if schema.is_some() {
                return Err(InvalidationReason::Corrupt(
                    "schema slot present without data".to_string(),
                ));
            }
            return Ok(None);
        };

        let tables: BTreeMap<TableName, Vec<Record>> = serde_json::from_slice(&data.bytes)
            .map_err(|e| InvalidationReason::Corrupt(format!("data slot: {e}")))?;

        if let Some(schema) = schema {
            let persisted: RelationshipGraph = serde_json::from_slice(&schema.bytes)
                .map_err(|e| InvalidationReason::Corrupt(format!("schema slot: {e}")))?;
            if persisted != *self.graph {
                return Err(InvalidationReason::SchemaChanged);
            }
        }

        let missing: Vec<TableName> = self
            .required
            .iter()
            .filter(|table| !tables.contains_key(table.as_str()))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(InvalidationReason::MissingTables(missing));
        }

        Ok(Some((tables, data.written_at)))
    }

    /// Current generation. Captured before a fetch and checked at commit.
    pub fn generation(&self) -> u64 {
        self.read_state().generation
    }

    /// The full record list of a table, if committed.
    pub fn read_table(&self, table: &str) -> Option<Arc<Vec<Record>>> {
        self.read_state()
            .tables
            .get(table)
            .map(|entry| Arc::clone(&entry.records))
    }

    /// A single record by id.
    pub fn record(&self, table: &str, id: &str) -> Option<Record> {
        self.read_state()
            .tables
            .get(table)
            .and_then(|entry| entry.get(id))
            .cloned()
    }

    /// Names of every committed table, sorted.
    pub fn tables(&self) -> Vec<TableName> {
        let mut tables: Vec<TableName> = self.read_state().tables.keys().cloned().collect();
        tables.sort();
        tables
    }

    pub fn is_empty(&self) -> bool {
        self.read_state().tables.is_empty()
    }

    /// Number of snapshot writes or clears that failed since open.
    pub fn persist_failures(&self) -> u64 {
        self.persist_failures.load(Ordering::Relaxed)
    }

    pub fn backend(&self) -> &Arc<dyn SnapshotBackend> {
        &self.backend
    }

    /// Replace a table unconditionally and persist.
    pub async fn commit_table(&self, table: &str, records: Vec<Record>) -> Arc<Vec<Record>> {
        self.commit(table, records, None).await.records
    }

    /// Replace a table only if no clear happened since `generation` was read.
    pub async fn commit_table_if_current(
        &self,
        table: &str,
        records: Vec<Record>,
        generation: u64,
    ) -> CommitOutcome {
        self.commit(table, records, Some(generation)).await
    }

    async fn commit(
        &self,
        table: &str,
        records: Vec<Record>,
        expected_generation: Option<u64>,
    ) -> CommitOutcome {
        let entry = TableEntry::build(table, records);
        let records = Arc::clone(&entry.records);

        let generation = {
            let mut state = self.write_state();
            if let Some(expected) = expected_generation {
                if state.generation != expected {
                    debug!(
                        table,
                        expected,
                        current = state.generation,
                        "Skipping commit from a superseded generation"
                    );
                    return CommitOutcome {
                        records,
                        committed: false,
                    };
                }
            }
            state.tables.insert(table.to_string(), entry);
            state.generation
        };

        debug!(table, records = records.len(), "Committed table");
        self.persist(generation).await;

        CommitOutcome {
            records,
            committed: true,
        }
    }

    /// Drop every table from memory and from the backend.
    ///
    /// In-flight fetches started before the clear will not commit.
    pub async fn clear_all(&self) -> Result<(), StoreError> {
        let _persist = self.persist_lock.lock().await;

        {
            let mut state = self.write_state();
            state.tables.clear();
            state.generation += 1;
            debug!(generation = state.generation, "Cleared cache");
        }

        match self.backend.clear_slots().await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.persist_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Failed to clear persisted snapshot");
                Err(e)
            }
        }
    }

    /// Mirror the current in-memory state into both slots, unless a clear
    /// ran after the commit that captured `generation`.
    async fn persist(&self, generation: u64) {
        let _persist = self.persist_lock.lock().await;

        let current = self.generation();
        if current != generation {
            debug!(generation, current, "Skipping snapshot write superseded by a clear");
            return;
        }

        let held: Vec<(TableName, Arc<Vec<Record>>)> = self
            .read_state()
            .tables
            .iter()
            .map(|(table, entry)| (table.clone(), Arc::clone(&entry.records)))
            .collect();
        let tables: BTreeMap<&str, &[Record]> = held
            .iter()
            .map(|(table, records)| (table.as_str(), records.as_slice()))
            .collect();

        let encoded = serde_json::to_vec(&tables).and_then(|data| {
            serde_json::to_vec(self.graph.as_ref()).map(|schema| (data, schema))
        });
        let (data, schema) = match encoded {
            Ok(slots) => slots,
            Err(e) => {
                self.persist_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Failed to serialize cache snapshot");
                return;
            }
        };

        let bytes = data.len() + schema.len();
        let slots = [(SnapshotSlot::Data, data), (SnapshotSlot::Schema, schema)];
        match self.backend.write_slots(&slots, Utc::now()).await {
            Ok(()) => debug!(tables = tables.len(), bytes, "Persisted cache snapshot"),
            Err(e) => {
                self.persist_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, "Failed to persist cache snapshot");
            }
        }
    }

    fn read_state(&self) -> std::sync::RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
