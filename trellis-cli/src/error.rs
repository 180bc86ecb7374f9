use thiserror::Error;
use trellis_core::{FetchError, PathError, RefreshError, StoreError, TrellisError};

use crate::config::ConfigError;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Trellis(#[from] TrellisError),

    #[error(transparent)]
    Refresh(#[from] RefreshError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Path(#[from] PathError),

    #[error("Table {table} is not cached (run `trellis refresh` or `trellis get {table}`)")]
    NotCached { table: String },

    #[error("No record {id} in {table}")]
    RecordNotFound { table: String, id: String },

    #[error("Nothing at path {0}")]
    NoValue(String),

    #[error("Output encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Telemetry init failed: {0}")]
    Telemetry(String),
}
