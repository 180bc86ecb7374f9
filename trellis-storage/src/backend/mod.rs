//! Persistent snapshot backends.
//!
//! The cache mirrors its state into two named slots of a local key-value
//! store: one holding every committed table, one holding the relationship
//! graph the tables were resolved under. Slots are read once at startup and
//! overwritten on every commit.

pub mod lmdb;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use trellis_core::StoreError;

pub use lmdb::{LmdbSnapshotBackend, LmdbSnapshotError};
pub use memory::InMemorySnapshotBackend;

/// One of the two persisted slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SnapshotSlot {
    /// Every committed table.
    Data,
    /// The relationship graph in effect when the data was written.
    Schema,
}

impl SnapshotSlot {
    pub const ALL: [SnapshotSlot; 2] = [SnapshotSlot::Data, SnapshotSlot::Schema];

    /// Key the slot is stored under.
    pub fn key(self) -> &'static str {
        match self {
            Self::Data => "trellis_data_cache",
            Self::Schema => "trellis_schema_cache",
        }
    }
}

/// A slot's payload and when it was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredSlot {
    pub bytes: Vec<u8>,
    pub written_at: DateTime<Utc>,
}

/// Backend for the persisted snapshot.
///
/// Implementations must be thread-safe. `write_slots` must apply all given
/// slots atomically: a reader sees either every new slot or none of them.
#[async_trait]
pub trait SnapshotBackend: Send + Sync {
    /// Read a slot, or `None` if it was never written or has been cleared.
    async fn read_slot(&self, slot: SnapshotSlot) -> Result<Option<StoredSlot>, StoreError>;

    /// Overwrite the given slots in one transaction.
    async fn write_slots(
        &self,
        slots: &[(SnapshotSlot, Vec<u8>)],
        written_at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Remove every slot. Returns how many slots were present.
    async fn clear_slots(&self) -> Result<u64, StoreError>;

    /// Get backend statistics.
    async fn stats(&self) -> Result<BackendStats, StoreError>;
}

/// Statistics about backend usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendStats {
    /// Number of slot reads.
    pub reads: u64,
    /// Number of write transactions.
    pub writes: u64,
    /// Number of clears.
    pub clears: u64,
    /// Total payload bytes written.
    pub bytes_written: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_keys_are_distinct() {
        assert_ne!(SnapshotSlot::Data.key(), SnapshotSlot::Schema.key());
        assert_eq!(SnapshotSlot::ALL.len(), 2);
    }
}
