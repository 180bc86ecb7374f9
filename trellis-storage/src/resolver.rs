//! Recursive link expansion.
//!
//! A record's linked fields hold ids into the table named by the field. The
//! resolver replaces them with the referenced records, recursing into those
//! records' own linked fields. Each top-level call carries its own context:
//! a record is expanded at most once, and the edge guard limits how often a
//! relationship (in either direction) is followed: once per call by default,
//! or once per branch. Together these bound the work on cyclic graphs.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use serde::Serialize;
use tracing::{debug, warn};
use trellis_core::{
    BackReferencePolicy, EdgeGuard, FieldValue, Record, RecordId, RelationshipGraph, TableName,
};

use crate::coordinator::FetchCoordinator;
use crate::store::CacheStore;

/// Knobs for link expansion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    pub edge_guard: EdgeGuard,
    pub back_references: BackReferencePolicy,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            edge_guard: EdgeGuard::Call,
            back_references: BackReferencePolicy::Declared,
        }
    }
}

/// What a resolution did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ResolveStats {
    /// Referenced records substituted in.
    pub links_expanded: u64,
    /// Referenced ids not found in their table.
    pub references_missing: u64,
    /// Linked fields left as ids because their relationship was already followed.
    pub edges_skipped: u64,
    /// Linked fields removed because their table could not be fetched.
    pub fields_dropped: u64,
}

impl ResolveStats {
    pub fn merge(&mut self, other: &ResolveStats) {
        self.links_expanded += other.links_expanded;
        self.references_missing += other.references_missing;
        self.edges_skipped += other.edges_skipped;
        self.fields_dropped += other.fields_dropped;
    }
}

struct ResolveContext {
    visited_records: HashSet<(TableName, RecordId)>,
    /// Relationships followed so far. Under `EdgeGuard::Branch` only those
    /// open on the current branch.
    seen_edges: HashSet<(TableName, String)>,
    unavailable: Arc<HashSet<TableName>>,
    stats: ResolveStats,
}

impl ResolveContext {
    fn new(unavailable: Arc<HashSet<TableName>>) -> Self {
        Self {
            visited_records: HashSet::new(),
            seen_edges: HashSet::new(),
            unavailable,
            stats: ResolveStats::default(),
        }
    }

    fn edge_seen(&self, table: &str, field: &str) -> bool {
        self.seen_edges
            .contains(&(table.to_string(), field.to_string()))
            || self
                .seen_edges
                .contains(&(field.to_string(), table.to_string()))
    }
}

/// Expands linked fields into nested records.
pub struct LinkResolver {
    coordinator: Arc<FetchCoordinator>,
    store: Arc<CacheStore>,
    graph: Arc<RelationshipGraph>,
    options: ResolveOptions,
}

impl LinkResolver {
    pub fn new(
        coordinator: Arc<FetchCoordinator>,
        store: Arc<CacheStore>,
        graph: Arc<RelationshipGraph>,
        options: ResolveOptions,
    ) -> Self {
        Self {
            coordinator,
            store,
            graph,
            options,
        }
    }

    /// Resolve a record of `table`. Never fails: anything that cannot be
    /// resolved is dropped from the result.
    pub async fn resolve(&self, record: Record, table: &str) -> Record {
        self.resolve_with_stats(record, table).await.0
    }

    pub async fn resolve_with_stats(&self, record: Record, table: &str) -> (Record, ResolveStats) {
        self.resolve_excluding(record, table, Arc::new(HashSet::new()))
            .await
    }

    /// Resolve while treating `unavailable` tables as unfetchable. Linked
    /// fields into those tables are removed without another fetch attempt.
    pub async fn resolve_excluding(
        &self,
        record: Record,
        table: &str,
        unavailable: Arc<HashSet<TableName>>,
    ) -> (Record, ResolveStats) {
        let mut ctx = ResolveContext::new(unavailable);
        let record = self.expand(record, table, &mut ctx).await;
        (record, ctx.stats)
    }

    fn expand<'a>(
        &'a self,
        mut record: Record,
        table: &'a str,
        ctx: &'a mut ResolveContext,
    ) -> BoxFuture<'a, Record> {
        async move {
            if !ctx
                .visited_records
                .insert((table.to_string(), record.id.clone()))
            {
                return record;
            }

            let linked: Vec<String> = record
                .fields
                .iter()
                .filter(|(name, value)| value.is_reference() && self.graph.is_link(table, name))
                .map(|(name, _)| name.clone())
                .collect();

            for field in linked {
                if ctx.unavailable.contains(&field) {
                    debug!(table, field = %field, "Dropping link into unavailable table");
                    record.remove(&field);
                    ctx.stats.fields_dropped += 1;
                    continue;
                }
                if self.options.edge_guard != EdgeGuard::Off && ctx.edge_seen(table, &field) {
                    debug!(table, field = %field, "Relationship already followed");
                    ctx.stats.edges_skipped += 1;
                    continue;
                }

                let edge = (table.to_string(), field.clone());
                ctx.seen_edges.insert(edge.clone());
                self.follow(&mut record, table, &field, ctx).await;
                if self.options.edge_guard == EdgeGuard::Branch {
                    ctx.seen_edges.remove(&edge);
                }
            }

            record
        }
        .boxed()
    }

    /// Replace `field` on `record` with the records it references.
    async fn follow(
        &self,
        record: &mut Record,
        table: &str,
        field: &str,
        ctx: &mut ResolveContext,
    ) {
        let target = match self.coordinator.get(field).await {
            Ok(records) => records,
            Err(e) => {
                warn!(table, field, error = %e, "Dropping link after fetch failure");
                record.remove(field);
                ctx.stats.fields_dropped += 1;
                return;
            }
        };

        let resolved = match record.remove(field) {
            Some(FieldValue::Reference(id)) => self
                .linked_child(&id, table, field, &target, ctx)
                .await
                .map(|child| FieldValue::Linked(Box::new(child))),
            Some(FieldValue::ReferenceList(ids)) => {
                let mut children = Vec::with_capacity(ids.len());
                for id in &ids {
                    if let Some(child) = self.linked_child(id, table, field, &target, ctx).await {
                        children.push(child);
                    }
                }
                Some(FieldValue::LinkedList(children))
            }
            other => other,
        };

        if let Some(value) = resolved {
            record.insert(field, value);
        }
    }

    async fn linked_child(
        &self,
        id: &str,
        parent_table: &str,
        table: &str,
        target: &[Record],
        ctx: &mut ResolveContext,
    ) -> Option<Record> {
        let found = self
            .store
            .record(table, id)
            .or_else(|| target.iter().find(|r| r.id == id).cloned());
        let Some(child) = found else {
            warn!(table, id, "Referenced record not found");
            ctx.stats.references_missing += 1;
            return None;
        };

        let mut child = self.expand(child, table, ctx).await;
        ctx.stats.links_expanded += 1;

        if let Some(back) =
            self.graph
                .back_reference(parent_table, table, self.options.back_references)
        {
            child.remove(back);
        }
        Some(child)
    }
}
