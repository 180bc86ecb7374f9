//! Full refresh: rebuild the cache from the source starting at the anchor.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::{join, join_all};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};
use trellis_core::{Record, RefreshError, TableName};

use crate::coordinator::FetchCoordinator;
use crate::resolver::{LinkResolver, ResolveStats};
use crate::store::CacheStore;

/// Everything a refresh produced.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    /// Resolved anchor records, as committed.
    pub records: Vec<Record>,
    /// Dependent tables fetched successfully.
    pub fetched_tables: Vec<TableName>,
    /// Dependent tables whose fetch failed. Links into them were dropped.
    pub unavailable_tables: Vec<TableName>,
    pub stats: ResolveStats,
    #[serde(serialize_with = "serialize_millis")]
    pub elapsed: Duration,
}

fn serialize_millis<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u128(d.as_millis())
}

/// Drives clear, fetch, resolve and commit for the anchor table.
///
/// Refreshes are serialized: a second call waits for the first to finish
/// and then runs its own.
pub struct RefreshOrchestrator {
    store: Arc<CacheStore>,
    coordinator: Arc<FetchCoordinator>,
    resolver: Arc<LinkResolver>,
    anchor: TableName,
    dependencies: Vec<TableName>,
    running: Mutex<()>,
}

impl RefreshOrchestrator {
    pub fn new(
        store: Arc<CacheStore>,
        coordinator: Arc<FetchCoordinator>,
        resolver: Arc<LinkResolver>,
        anchor: TableName,
        dependencies: Vec<TableName>,
    ) -> Self {
        Self {
            store,
            coordinator,
            resolver,
            anchor,
            dependencies,
            running: Mutex::new(()),
        }
    }

    /// Rebuild the cache and return the resolved anchor records.
    pub async fn refresh(&self) -> Result<Vec<Record>, RefreshError> {
        self.refresh_detailed().await.map(|report| report.records)
    }

    /// Rebuild the cache.
    ///
    /// Fails only when the anchor table cannot be fetched. A failed dependent
    /// table is logged, its links are dropped from this refresh's output, and
    /// it is not fetched again until the next refresh or lazy `get`.
    pub async fn refresh_detailed(&self) -> Result<RefreshReport, RefreshError> {
        let _running = self.running.lock().await;
        let started = Instant::now();
        info!(anchor = %self.anchor, dependencies = self.dependencies.len(), "Starting refresh");

        // A failed backend clear leaves the old snapshot until the next commit.
        if let Err(e) = self.store.clear_all().await {
            warn!(error = %e, "Continuing refresh after failed snapshot clear");
        }

        let (anchor, dependents) = join(
            self.coordinator.get(&self.anchor),
            self.coordinator.get_many(&self.dependencies),
        )
        .await;

        let mut fetched_tables = Vec::new();
        let mut unavailable = HashSet::new();
        for (table, outcome) in dependents {
            match outcome {
                Ok(_) => fetched_tables.push(table),
                Err(e) => {
                    warn!(table = %table, error = %e, "Dependent table unavailable for this refresh");
                    unavailable.insert(table);
                }
            }
        }

        let anchor_records = anchor.map_err(|e| {
            warn!(anchor = %self.anchor, error = %e, "Refresh aborted");
            RefreshError::AnchorFetch(e)
        })?;

        let unavailable = Arc::new(unavailable);
        let resolved = join_all(anchor_records.iter().cloned().map(|record| {
            let unavailable = Arc::clone(&unavailable);
            async move {
                self.resolver
                    .resolve_excluding(record, &self.anchor, unavailable)
                    .await
            }
        }))
        .await;

        let mut stats = ResolveStats::default();
        let mut records = Vec::with_capacity(resolved.len());
        for (record, record_stats) in resolved {
            stats.merge(&record_stats);
            records.push(record);
        }

        self.store.commit_table(&self.anchor, records.clone()).await;

        let mut unavailable_tables: Vec<TableName> = unavailable.iter().cloned().collect();
        unavailable_tables.sort();
        let elapsed = started.elapsed();

        info!(
            anchor = %self.anchor,
            records = records.len(),
            unavailable = unavailable_tables.len(),
            links_expanded = stats.links_expanded,
            references_missing = stats.references_missing,
            elapsed_ms = elapsed.as_millis() as u64,
            "Refresh complete"
        );

        Ok(RefreshReport {
            records,
            fetched_tables,
            unavailable_tables,
            stats,
            elapsed,
        })
    }
}
