//! Per-table fetch deduplication.
//!
//! At most one reader call is outstanding per table. Callers that arrive
//! while a fetch is running subscribe to its outcome instead of issuing
//! their own. Outcomes are broadcast through a `watch` channel so a late
//! subscriber still sees the value sent before it subscribed.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, warn};
use trellis_core::{FetchError, Record, ReferenceMarker, TableName, TableReader};

use crate::store::CacheStore;

type FetchOutcome = Result<Arc<Vec<Record>>, FetchError>;

struct InFlight {
    ticket: u64,
    generation: u64,
    outcome: watch::Receiver<Option<FetchOutcome>>,
}

enum Claim {
    Cached(Arc<Vec<Record>>),
    Join(watch::Receiver<Option<FetchOutcome>>),
    Lead {
        ticket: u64,
        generation: u64,
        sender: watch::Sender<Option<FetchOutcome>>,
    },
}

/// Counters for fetch coordination.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    /// Calls made to the table reader.
    pub reader_calls: u64,
    /// Requests answered from the store.
    pub cache_hits: u64,
    /// Requests that waited on another caller's fetch.
    pub joined: u64,
    /// Reader calls that failed.
    pub failures: u64,
}

#[derive(Debug, Default)]
struct FetchCounters {
    reader_calls: AtomicU64,
    cache_hits: AtomicU64,
    joined: AtomicU64,
    failures: AtomicU64,
}

/// Guarantees at most one outstanding reader call per table.
pub struct FetchCoordinator {
    store: Arc<CacheStore>,
    reader: Arc<dyn TableReader>,
    marker: ReferenceMarker,
    in_flight: Mutex<HashMap<TableName, InFlight>>,
    next_ticket: AtomicU64,
    counters: FetchCounters,
}

/// Removes the in-flight entry when the leading fetch finishes or is dropped.
struct Registration<'a> {
    in_flight: &'a Mutex<HashMap<TableName, InFlight>>,
    table: &'a str,
    ticket: u64,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if in_flight
            .get(self.table)
            .is_some_and(|entry| entry.ticket == self.ticket)
        {
            in_flight.remove(self.table);
        }
    }
}

impl FetchCoordinator {
    pub fn new(
        store: Arc<CacheStore>,
        reader: Arc<dyn TableReader>,
        marker: ReferenceMarker,
    ) -> Self {
        Self {
            store,
            reader,
            marker,
            in_flight: Mutex::new(HashMap::new()),
            next_ticket: AtomicU64::new(0),
            counters: FetchCounters::default(),
        }
    }

    /// Return a table's records, fetching and committing it if absent.
    ///
    /// A failed fetch leaves the table absent; the next call retries.
    pub async fn get(&self, table: &str) -> FetchOutcome {
        if let Some(records) = self.store.read_table(table) {
            self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(records);
        }

        match self.claim(table) {
            Claim::Cached(records) => {
                self.counters.cache_hits.fetch_add(1, Ordering::Relaxed);
                Ok(records)
            }
            Claim::Join(outcome) => self.join(table, outcome).await,
            Claim::Lead {
                ticket,
                generation,
                sender,
            } => self.lead(table, ticket, generation, sender).await,
        }
    }

    /// Fetch several tables concurrently.
    pub async fn get_many(&self, tables: &[TableName]) -> Vec<(TableName, FetchOutcome)> {
        join_all(
            tables
                .iter()
                .map(|table| async move { (table.clone(), self.get(table).await) }),
        )
        .await
    }

    pub fn stats(&self) -> FetchStats {
        FetchStats {
            reader_calls: self.counters.reader_calls.load(Ordering::Relaxed),
            cache_hits: self.counters.cache_hits.load(Ordering::Relaxed),
            joined: self.counters.joined.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }

    /// Number of tables with a fetch currently outstanding.
    pub fn in_flight(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn claim(&self, table: &str) -> Claim {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let generation = self.store.generation();

        if let Some(entry) = in_flight.get(table) {
            if entry.generation == generation {
                return Claim::Join(entry.outcome.clone());
            }
        }

        // A leader commits before it deregisters, so the table may have
        // landed between the first read and taking the lock.
        if let Some(records) = self.store.read_table(table) {
            return Claim::Cached(records);
        }

        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (sender, outcome) = watch::channel(None);
        in_flight.insert(
            table.to_string(),
            InFlight {
                ticket,
                generation,
                outcome,
            },
        );
        Claim::Lead {
            ticket,
            generation,
            sender,
        }
    }

    async fn lead(
        &self,
        table: &str,
        ticket: u64,
        generation: u64,
        sender: watch::Sender<Option<FetchOutcome>>,
    ) -> FetchOutcome {
        let _registration = Registration {
            in_flight: &self.in_flight,
            table,
            ticket,
        };

        self.counters.reader_calls.fetch_add(1, Ordering::Relaxed);
        debug!(table, generation, "Fetching table");

        let outcome = match self.reader.fetch_all(table).await {
            Ok(rows) => {
                let records: Vec<Record> = rows
                    .into_iter()
                    .map(|row| Record::from_row(row, &self.marker))
                    .collect();
                let commit = self
                    .store
                    .commit_table_if_current(table, records, generation)
                    .await;
                Ok(commit.records)
            }
            Err(e) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(table, error = %e, "Table fetch failed");
                Err(FetchError::new(table, e))
            }
        };

        sender.send_replace(Some(outcome.clone()));
        outcome
    }

    async fn join(
        &self,
        table: &str,
        mut outcome: watch::Receiver<Option<FetchOutcome>>,
    ) -> FetchOutcome {
        self.counters.joined.fetch_add(1, Ordering::Relaxed);
        debug!(table, "Joining in-flight fetch");

        match outcome.wait_for(Option::is_some).await {
            Ok(value) => value
                .clone()
                .unwrap_or_else(|| Err(FetchError::abandoned(table))),
            Err(_) => Err(FetchError::abandoned(table)),
        }
    }
}
