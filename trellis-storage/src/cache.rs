//! The record cache facade.
//!
//! Wires a [`CacheStore`], a [`FetchCoordinator`], a [`LinkResolver`] and a
//! [`RefreshOrchestrator`] together from a [`TrellisConfig`]. Construct one
//! per process and share it behind an `Arc`.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};
use trellis_core::{
    FetchError, FieldPath, PathError, Record, RefreshError, RelationshipGraph, StoreError,
    TableReader, TrellisConfig, TrellisResult,
};

use crate::backend::{InMemorySnapshotBackend, LmdbSnapshotBackend, SnapshotBackend};
use crate::coordinator::{FetchCoordinator, FetchStats};
use crate::refresh::{RefreshOrchestrator, RefreshReport};
use crate::resolver::{LinkResolver, ResolveOptions};
use crate::store::{CacheStore, RestoreOutcome};

/// Linked-record cache over a remote tabular source.
///
/// # Example
///
/// ```ignore
/// let cache = RecordCache::open(config, Arc::new(reader)).await?;
/// cache.ensure_warm().await?;
///
/// let courses = cache.read_table("courses");
/// let title = cache.lookup("0.lessons[1].name")?;
/// ```
pub struct RecordCache {
    config: TrellisConfig,
    graph: Arc<RelationshipGraph>,
    store: Arc<CacheStore>,
    coordinator: Arc<FetchCoordinator>,
    resolver: Arc<LinkResolver>,
    orchestrator: RefreshOrchestrator,
    restore: RestoreOutcome,
}

impl RecordCache {
    /// Open a cache with the backend named by `config.persistence`, or an
    /// in-memory backend when persistence is not configured.
    pub async fn open(config: TrellisConfig, reader: Arc<dyn TableReader>) -> TrellisResult<Self> {
        config.validate()?;

        let backend: Arc<dyn SnapshotBackend> = match &config.persistence {
            Some(persistence) => Arc::new(
                LmdbSnapshotBackend::new(&persistence.path, persistence.max_size_mb)
                    .map_err(StoreError::from)?,
            ),
            None => Arc::new(InMemorySnapshotBackend::new()),
        };

        Self::open_with_backend(config, reader, backend).await
    }

    /// Open a cache over an explicit snapshot backend.
    ///
    /// When the persisted snapshot is discarded, the cache is refreshed
    /// before this returns.
    pub async fn open_with_backend(
        config: TrellisConfig,
        reader: Arc<dyn TableReader>,
        backend: Arc<dyn SnapshotBackend>,
    ) -> TrellisResult<Self> {
        config.validate()?;

        let graph = Arc::new(config.relationship_graph());
        let dependencies = graph.reachable_from(&config.anchor_table);
        let mut required = Vec::with_capacity(dependencies.len() + 1);
        required.push(config.anchor_table.clone());
        required.extend(dependencies.iter().cloned());

        let (store, restore) = CacheStore::open(backend, Arc::clone(&graph), required).await;
        let store = Arc::new(store);

        let coordinator = Arc::new(FetchCoordinator::new(
            Arc::clone(&store),
            reader,
            config.reference_marker(),
        ));
        let resolver = Arc::new(LinkResolver::new(
            Arc::clone(&coordinator),
            Arc::clone(&store),
            Arc::clone(&graph),
            ResolveOptions {
                edge_guard: config.edge_guard,
                back_references: config.back_references,
            },
        ));
        let orchestrator = RefreshOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&coordinator),
            Arc::clone(&resolver),
            config.anchor_table.clone(),
            dependencies,
        );

        info!(
            anchor = %config.anchor_table,
            tables = config.tables.len(),
            restored = restore.is_restored(),
            "Opened record cache"
        );

        let cache = Self {
            config,
            graph,
            store,
            coordinator,
            resolver,
            orchestrator,
            restore,
        };

        // A discarded snapshot forces a full rebuild. An unreachable source
        // leaves the cache empty rather than failing the open.
        if let RestoreOutcome::Invalidated { reason } = &cache.restore {
            info!(?reason, "Rebuilding cache after discarded snapshot");
            if let Err(e) = cache.orchestrator.refresh_detailed().await {
                warn!(error = %e, "Rebuild after discarded snapshot failed");
            }
        }

        Ok(cache)
    }

    pub fn config(&self) -> &TrellisConfig {
        &self.config
    }

    pub fn graph(&self) -> &RelationshipGraph {
        &self.graph
    }

    /// What was found in the snapshot backend at open.
    pub fn restore_outcome(&self) -> &RestoreOutcome {
        &self.restore
    }

    /// Refresh if the anchor table is not in memory.
    ///
    /// Returns the refresh report when a refresh ran.
    pub async fn ensure_warm(&self) -> Result<Option<RefreshReport>, RefreshError> {
        if self.store.read_table(&self.config.anchor_table).is_some() {
            debug!(anchor = %self.config.anchor_table, "Cache already warm");
            return Ok(None);
        }
        self.orchestrator.refresh_detailed().await.map(Some)
    }

    /// Clear everything and rebuild from the anchor table.
    pub async fn refresh(&self) -> Result<Vec<Record>, RefreshError> {
        self.orchestrator.refresh().await
    }

    pub async fn refresh_detailed(&self) -> Result<RefreshReport, RefreshError> {
        self.orchestrator.refresh_detailed().await
    }

    /// Drop every table from memory and from the persisted snapshot.
    pub async fn clear_all(&self) -> Result<(), StoreError> {
        self.store.clear_all().await
    }

    /// A committed table, without fetching.
    pub fn read_table(&self, table: &str) -> Option<Arc<Vec<Record>>> {
        self.store.read_table(table)
    }

    /// A table's records, fetching it if absent.
    pub async fn get(&self, table: &str) -> Result<Arc<Vec<Record>>, FetchError> {
        self.coordinator.get(table).await
    }

    /// A single committed record by id.
    pub fn record(&self, table: &str, id: &str) -> Option<Record> {
        self.store.record(table, id)
    }

    /// Fetch `table` if needed and return `id` with its links resolved.
    pub async fn resolved_record(&self, table: &str, id: &str) -> TrellisResult<Option<Record>> {
        let records = self.coordinator.get(table).await?;
        let Some(record) = records.iter().find(|r| r.id == id).cloned() else {
            return Ok(None);
        };
        Ok(Some(self.resolver.resolve(record, table).await))
    }

    /// Evaluate a field path against the anchor table.
    pub fn lookup(&self, path: &str) -> Result<Option<Value>, PathError> {
        self.lookup_in(&self.config.anchor_table, path)
    }

    /// Evaluate a field path against a committed table.
    pub fn lookup_in(&self, table: &str, path: &str) -> Result<Option<Value>, PathError> {
        let path = FieldPath::parse(path)?;
        Ok(self
            .store
            .read_table(table)
            .and_then(|records| path.evaluate(records.as_slice())))
    }

    /// Names of every committed table.
    pub fn tables(&self) -> Vec<String> {
        self.store.tables()
    }

    pub fn fetch_stats(&self) -> FetchStats {
        self.coordinator.stats()
    }

    /// Snapshot writes or clears that failed since open.
    pub fn persist_failures(&self) -> u64 {
        self.store.persist_failures()
    }
}
