//! Configuration types

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, TrellisError, TrellisResult};
use crate::schema::{BackReferencePolicy, EdgeGuard, RelationshipGraph};
use crate::value::{ReferenceMarker, DEFAULT_REFERENCE_PREFIX};
use crate::TableName;

/// Where the resolved snapshot is mirrored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PersistenceConfig {
    pub path: PathBuf,
    pub max_size_mb: usize,
}

/// Master configuration for a record cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrellisConfig {
    /// Table whose records are resolved and committed by a refresh.
    pub anchor_table: TableName,
    /// Prefix that marks a string as a record reference.
    #[serde(default = "default_reference_prefix")]
    pub reference_prefix: String,
    /// Table name to the names of its linked fields.
    pub tables: BTreeMap<TableName, Vec<String>>,
    #[serde(default)]
    pub back_references: BackReferencePolicy,
    /// Expand each relationship at most once per top-level resolution
    /// (`call`), once per branch (`branch`), or without limit (`off`).
    #[serde(default)]
    pub edge_guard: EdgeGuard,
    /// `None` keeps the snapshot in memory only.
    #[serde(default)]
    pub persistence: Option<PersistenceConfig>,
}

fn default_reference_prefix() -> String {
    DEFAULT_REFERENCE_PREFIX.to_string()
}

impl TrellisConfig {
    /// Minimal in-memory configuration around a relationship adjacency.
    pub fn new<I, T, L, S>(anchor_table: impl Into<TableName>, tables: I) -> Self
    where
        I: IntoIterator<Item = (T, L)>,
        T: Into<TableName>,
        L: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            anchor_table: anchor_table.into(),
            reference_prefix: default_reference_prefix(),
            tables: tables
                .into_iter()
                .map(|(table, links)| (table.into(), links.into_iter().map(Into::into).collect()))
                .collect(),
            back_references: BackReferencePolicy::default(),
            edge_guard: EdgeGuard::default(),
            persistence: None,
        }
    }

    pub fn relationship_graph(&self) -> RelationshipGraph {
        self.tables
            .iter()
            .fold(RelationshipGraph::new(), |graph, (table, links)| {
                graph.with_table(table.clone(), links.iter().cloned())
            })
    }

    pub fn reference_marker(&self) -> ReferenceMarker {
        ReferenceMarker::new(self.reference_prefix.clone())
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - anchor_table is non-empty and declared in tables
    /// - reference_prefix is non-empty
    /// - every linked field names a declared table
    /// - persistence.max_size_mb > 0 and persistence.path is non-empty
    pub fn validate(&self) -> TrellisResult<()> {
        if self.anchor_table.trim().is_empty() {
            return Err(TrellisError::Config(ConfigError::MissingRequired {
                field: "anchor_table".to_string(),
            }));
        }

        if !self.tables.contains_key(&self.anchor_table) {
            return Err(TrellisError::Config(ConfigError::InvalidValue {
                field: "anchor_table".to_string(),
                value: self.anchor_table.clone(),
                reason: "anchor_table must be declared in tables".to_string(),
            }));
        }

        if self.reference_prefix.is_empty() {
            return Err(TrellisError::Config(ConfigError::InvalidValue {
                field: "reference_prefix".to_string(),
                value: String::new(),
                reason: "reference_prefix must not be empty".to_string(),
            }));
        }

        self.relationship_graph().validate()?;

        if let Some(persistence) = &self.persistence {
            if persistence.path.as_os_str().is_empty() {
                return Err(TrellisError::Config(ConfigError::MissingRequired {
                    field: "persistence.path".to_string(),
                }));
            }
            if persistence.max_size_mb == 0 {
                return Err(TrellisError::Config(ConfigError::InvalidValue {
                    field: "persistence.max_size_mb".to_string(),
                    value: persistence.max_size_mb.to_string(),
                    reason: "max_size_mb must be greater than 0".to_string(),
                }));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog_config() -> TrellisConfig {
        TrellisConfig::new(
            "courses",
            [
                ("courses", vec!["lessons"]),
                ("lessons", vec!["courses", "verbs"]),
                ("verbs", vec![]),
            ],
        )
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(catalog_config().validate().is_ok());
    }

    #[test]
    fn test_defaults() {
        let config = catalog_config();
        assert_eq!(config.reference_prefix, "rec");
        assert_eq!(config.edge_guard, EdgeGuard::Call);
        assert_eq!(config.back_references, BackReferencePolicy::Declared);
        assert!(config.persistence.is_none());
    }

    #[test]
    fn test_undeclared_anchor_rejected() {
        let mut config = catalog_config();
        config.anchor_table = "units".to_string();
        let err = config.validate().expect_err("undeclared anchor should fail");
        assert!(err.to_string().contains("anchor_table"));
    }

    #[test]
    fn test_empty_prefix_rejected() {
        let mut config = catalog_config();
        config.reference_prefix.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dangling_link_rejected() {
        let mut config = catalog_config();
        config
            .tables
            .insert("lessons".to_string(), vec!["pronouns".to_string()]);
        let err = config.validate().expect_err("dangling link should fail");
        assert!(matches!(
            err,
            TrellisError::Config(ConfigError::UnknownTable { .. })
        ));
    }

    #[test]
    fn test_zero_map_size_rejected() {
        let mut config = catalog_config();
        config.persistence = Some(PersistenceConfig {
            path: PathBuf::from("/tmp/trellis"),
            max_size_mb: 0,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relationship_graph_mirrors_tables() {
        let graph = catalog_config().relationship_graph();
        assert!(graph.is_link("courses", "lessons"));
        assert!(graph.is_link("lessons", "courses"));
        assert!(!graph.is_link("verbs", "lessons"));
    }

    #[test]
    fn test_deserialize_rejects_unknown_fields() {
        let json = r#"{"anchor_table":"a","tables":{"a":[]},"bogus":1}"#;
        assert!(serde_json::from_str::<TrellisConfig>(json).is_err());
    }
}
