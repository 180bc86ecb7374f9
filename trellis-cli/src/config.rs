//! Configuration loading for the Trellis CLI.
//!
//! The file is TOML: top-level CLI settings plus a `[cache]` table that
//! deserializes straight into [`TrellisConfig`].

use std::path::{Path, PathBuf};

use serde::Deserialize;
use trellis_core::{TrellisConfig, TrellisError};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    /// Directory holding one `<table>.json` file per table.
    pub source_dir: PathBuf,
    #[serde(default)]
    pub log_format: LogFormat,
    pub cache: TrellisConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or TRELLIS_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error(transparent)]
    Cache(#[from] TrellisError),
}

impl CliConfig {
    /// Load and validate the file at `path`.
    pub fn load(path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_dir.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "source_dir",
                reason: "must not be empty".to_string(),
            });
        }
        self.cache.validate()?;
        Ok(())
    }
}
