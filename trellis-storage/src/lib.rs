//! Trellis Storage - Fetching, Resolution and Snapshots
//!
//! Keeps whole tables from a remote tabular source in memory, fetches each
//! table at most once at a time, expands linked fields into nested records,
//! and mirrors committed state to a local snapshot that is restored at
//! startup.

pub mod backend;
pub mod cache;
pub mod coordinator;
pub mod refresh;
pub mod resolver;
pub mod store;

pub use backend::{
    BackendStats, InMemorySnapshotBackend, LmdbSnapshotBackend, LmdbSnapshotError,
    SnapshotBackend, SnapshotSlot, StoredSlot,
};
pub use cache::RecordCache;
pub use coordinator::{FetchCoordinator, FetchStats};
pub use refresh::{RefreshOrchestrator, RefreshReport};
pub use resolver::{LinkResolver, ResolveOptions, ResolveStats};
pub use store::{CacheStore, CommitOutcome, InvalidationReason, RestoreOutcome};
