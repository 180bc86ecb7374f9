//! LMDB-backed snapshot storage.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep the two snapshot
//! slots in a memory-mapped key-value store that survives restarts.
//!
//! # Layout
//!
//! Each slot is stored under its key as `[timestamp: 8 bytes LE millis][payload]`.
//! Both slots are written in a single write transaction so a restart never
//! observes data from one commit alongside a schema from another.

use std::path::Path;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions};
use trellis_core::StoreError;

use super::{BackendStats, SnapshotBackend, SnapshotSlot, StoredSlot};

const TIMESTAMP_LEN: usize = 8;

/// Error type for LMDB snapshot operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbSnapshotError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored bytes are shorter than the timestamp header.
    #[error("Slot {0} is truncated")]
    Truncated(&'static str),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbSnapshotError> for StoreError {
    fn from(e: LmdbSnapshotError) -> Self {
        match e {
            LmdbSnapshotError::EnvOpen(_) | LmdbSnapshotError::DbOpen(_) | LmdbSnapshotError::Io(_) => {
                StoreError::Open {
                    reason: e.to_string(),
                }
            }
            LmdbSnapshotError::Transaction(_) => StoreError::TransactionFailed {
                reason: e.to_string(),
            },
            LmdbSnapshotError::Truncated(_) => StoreError::Serialization {
                reason: e.to_string(),
            },
        }
    }
}

/// LMDB-backed snapshot slots.
///
/// # Example
///
/// ```ignore
/// use trellis_storage::backend::{LmdbSnapshotBackend, SnapshotBackend, SnapshotSlot};
///
/// let backend = LmdbSnapshotBackend::new("/var/lib/trellis", 64)?;
/// backend.write_slots(&[(SnapshotSlot::Data, bytes)], Utc::now()).await?;
/// let stored = backend.read_slot(SnapshotSlot::Data).await?;
/// ```
pub struct LmdbSnapshotBackend {
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Bytes, Bytes>,
    stats: RwLock<BackendStats>,
}

impl LmdbSnapshotBackend {
    /// Open or create the environment at `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the map in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be created or the LMDB
    /// environment or database cannot be opened.
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbSnapshotError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbSnapshotError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbSnapshotError::Transaction(e.to_string()))?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbSnapshotError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbSnapshotError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            stats: RwLock::new(BackendStats::default()),
        })
    }

    fn read_raw(&self, slot: SnapshotSlot) -> Result<Option<StoredSlot>, LmdbSnapshotError> {
        let rtxn = self
            .env
            .read_txn()
            .map_err(|e| LmdbSnapshotError::Transaction(e.to_string()))?;

        let Some(bytes) = self
            .db
            .get(&rtxn, slot.key().as_bytes())
            .map_err(|e| LmdbSnapshotError::Transaction(e.to_string()))?
        else {
            return Ok(None);
        };

        if bytes.len() < TIMESTAMP_LEN {
            return Err(LmdbSnapshotError::Truncated(slot.key()));
        }
        let (header, payload) = bytes.split_at(TIMESTAMP_LEN);
        let timestamp_bytes: [u8; TIMESTAMP_LEN] = header
            .try_into()
            .map_err(|_| LmdbSnapshotError::Truncated(slot.key()))?;
        let written_at = DateTime::from_timestamp_millis(i64::from_le_bytes(timestamp_bytes))
            .unwrap_or_else(Utc::now);

        Ok(Some(StoredSlot {
            bytes: payload.to_vec(),
            written_at,
        }))
    }
}

#[async_trait]
impl SnapshotBackend for LmdbSnapshotBackend {
    async fn read_slot(&self, slot: SnapshotSlot) -> Result<Option<StoredSlot>, StoreError> {
        if let Ok(mut stats) = self.stats.write() {
            stats.reads += 1;
        }
        Ok(self.read_raw(slot)?)
    }

    async fn write_slots(
        &self,
        slots: &[(SnapshotSlot, Vec<u8>)],
        written_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let timestamp_bytes = written_at.timestamp_millis().to_le_bytes();

        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbSnapshotError::Transaction(e.to_string()))?;

        let mut written = 0u64;
        for (slot, payload) in slots {
            let mut full_bytes = Vec::with_capacity(TIMESTAMP_LEN + payload.len());
            full_bytes.extend_from_slice(&timestamp_bytes);
            full_bytes.extend_from_slice(payload);

            self.db
                .put(&mut wtxn, slot.key().as_bytes(), &full_bytes)
                .map_err(|e| LmdbSnapshotError::Transaction(e.to_string()))?;
            written += full_bytes.len() as u64;
        }

        wtxn.commit()
            .map_err(|e| LmdbSnapshotError::Transaction(e.to_string()))?;

        if let Ok(mut stats) = self.stats.write() {
            stats.writes += 1;
            stats.bytes_written += written;
        }
        Ok(())
    }

    async fn clear_slots(&self) -> Result<u64, StoreError> {
        let mut wtxn = self
            .env
            .write_txn()
            .map_err(|e| LmdbSnapshotError::Transaction(e.to_string()))?;

        let mut deleted = 0u64;
        for slot in SnapshotSlot::ALL {
            let removed = self
                .db
                .delete(&mut wtxn, slot.key().as_bytes())
                .map_err(|e| LmdbSnapshotError::Transaction(e.to_string()))?;
            if removed {
                deleted += 1;
            }
        }

        wtxn.commit()
            .map_err(|e| LmdbSnapshotError::Transaction(e.to_string()))?;

        if let Ok(mut stats) = self.stats.write() {
            stats.clears += 1;
        }
        Ok(deleted)
    }

    async fn stats(&self) -> Result<BackendStats, StoreError> {
        Ok(self.stats.read().map(|s| s.clone()).unwrap_or_default())
    }
}
