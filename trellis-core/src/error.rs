//! Error types for Trellis operations

use std::fmt::Display;

use thiserror::Error;

use crate::TableName;

/// Failures reported by a table reader.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ReaderError {
    #[error("Table not found: {table}")]
    TableNotFound { table: TableName },

    #[error("Transport failure: {reason}")]
    Transport { reason: String },

    #[error("Malformed rows in {table}: {reason}")]
    Malformed { table: TableName, reason: String },
}

/// A table could not be fetched. The table stays absent from the cache and
/// the next request retries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to fetch {table}: {cause}")]
pub struct FetchError {
    pub table: TableName,
    pub cause: String,
}

impl FetchError {
    pub fn new(table: impl Into<TableName>, cause: impl Display) -> Self {
        Self {
            table: table.into(),
            cause: cause.to_string(),
        }
    }

    /// The task that owned the fetch went away before it finished.
    pub fn abandoned(table: impl Into<TableName>) -> Self {
        Self::new(table, "in-flight fetch was abandoned")
    }
}

/// A full refresh could not be completed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefreshError {
    #[error("Anchor table fetch failed: {0}")]
    AnchorFetch(#[from] FetchError),
}

/// Persistent snapshot store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Failed to open store: {reason}")]
    Open { reason: String },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Table {table} is linked from {referenced_by} but never declared")]
    UnknownTable {
        table: TableName,
        referenced_by: TableName,
    },
}

/// Field path errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("Invalid path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },
}

/// Master error type for all Trellis errors.
#[derive(Debug, Clone, Error)]
pub enum TrellisError {
    #[error("Reader error: {0}")]
    Reader(#[from] ReaderError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    #[error("Refresh error: {0}")]
    Refresh(#[from] RefreshError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Path error: {0}")]
    Path(#[from] PathError),
}

/// Result type alias for Trellis operations.
pub type TrellisResult<T> = Result<T, TrellisError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_display() {
        let err = FetchError::new(
            "verbs",
            ReaderError::Transport {
                reason: "connection reset".to_string(),
            },
        );
        let msg = err.to_string();
        assert!(msg.contains("verbs"));
        assert!(msg.contains("connection reset"));
    }

    #[test]
    fn test_refresh_error_wraps_anchor_failure() {
        let err: RefreshError = FetchError::abandoned("courses").into();
        let msg = err.to_string();
        assert!(msg.contains("Anchor table fetch failed"));
        assert!(msg.contains("courses"));
    }

    #[test]
    fn test_config_error_display_unknown_table() {
        let err = ConfigError::UnknownTable {
            table: "verbs".to_string(),
            referenced_by: "lessons".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("verbs"));
        assert!(msg.contains("lessons"));
    }

    #[test]
    fn test_trellis_error_from_conversions() {
        let err: TrellisError = StoreError::LockPoisoned.into();
        assert!(matches!(err, TrellisError::Store(StoreError::LockPoisoned)));

        let err: TrellisError = PathError::InvalidPath {
            path: "a..b".to_string(),
            reason: "empty segment".to_string(),
        }
        .into();
        assert!(err.to_string().contains("a..b"));
    }
}
