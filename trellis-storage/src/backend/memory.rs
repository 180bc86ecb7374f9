//! In-memory snapshot backend.
//!
//! Used when no persistence directory is configured, and by tests that need
//! to inspect or corrupt the persisted slots directly.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use trellis_core::StoreError;

use super::{BackendStats, SnapshotBackend, SnapshotSlot, StoredSlot};

#[derive(Debug, Default)]
struct MemoryState {
    slots: HashMap<SnapshotSlot, StoredSlot>,
    stats: BackendStats,
}

/// Snapshot slots held in process memory.
#[derive(Debug, Default)]
pub struct InMemorySnapshotBackend {
    state: RwLock<MemoryState>,
}

impl InMemorySnapshotBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a slot with raw bytes, bypassing statistics.
    pub fn put_raw(&self, slot: SnapshotSlot, bytes: impl Into<Vec<u8>>) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
        state.slots.insert(
            slot,
            StoredSlot {
                bytes: bytes.into(),
                written_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Raw bytes of a slot, bypassing statistics.
    pub fn raw(&self, slot: SnapshotSlot) -> Option<Vec<u8>> {
        self.state
            .read()
            .ok()
            .and_then(|state| state.slots.get(&slot).map(|s| s.bytes.clone()))
    }
}

#[async_trait]
impl SnapshotBackend for InMemorySnapshotBackend {
    async fn read_slot(&self, slot: SnapshotSlot) -> Result<Option<StoredSlot>, StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
        state.stats.reads += 1;
        Ok(state.slots.get(&slot).cloned())
    }

    async fn write_slots(
        &self,
        slots: &[(SnapshotSlot, Vec<u8>)],
        written_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
        for (slot, bytes) in slots {
            state.stats.bytes_written += bytes.len() as u64;
            state.slots.insert(
                *slot,
                StoredSlot {
                    bytes: bytes.clone(),
                    written_at,
                },
            );
        }
        state.stats.writes += 1;
        Ok(())
    }

    async fn clear_slots(&self) -> Result<u64, StoreError> {
        let mut state = self.state.write().map_err(|_| StoreError::LockPoisoned)?;
        let deleted = state.slots.len() as u64;
        state.slots.clear();
        state.stats.clears += 1;
        Ok(deleted)
    }

    async fn stats(&self) -> Result<BackendStats, StoreError> {
        let state = self.state.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(state.stats.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_replaces_slots_together() {
        let backend = InMemorySnapshotBackend::new();
        backend
            .write_slots(
                &[
                    (SnapshotSlot::Data, b"one".to_vec()),
                    (SnapshotSlot::Schema, b"s1".to_vec()),
                ],
                Utc::now(),
            )
            .await
            .expect("write should succeed");
        backend
            .write_slots(&[(SnapshotSlot::Data, b"two".to_vec())], Utc::now())
            .await
            .expect("write should succeed");

        assert_eq!(backend.raw(SnapshotSlot::Data), Some(b"two".to_vec()));
        assert_eq!(backend.raw(SnapshotSlot::Schema), Some(b"s1".to_vec()));

        let stats = backend.stats().await.expect("stats should succeed");
        assert_eq!(stats.writes, 2);
        assert_eq!(stats.bytes_written, 8);
    }

    #[tokio::test]
    async fn test_clear_counts_present_slots() {
        let backend = InMemorySnapshotBackend::new();
        backend
            .put_raw(SnapshotSlot::Data, "garbage")
            .expect("put should succeed");
        assert_eq!(backend.clear_slots().await.expect("clear should succeed"), 1);
        assert!(backend
            .read_slot(SnapshotSlot::Data)
            .await
            .expect("read should succeed")
            .is_none());
    }
}
