//! A [`TableReader`] over a directory of JSON files.

use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;
use trellis_core::{RawRow, ReaderError, TableReader};

/// Reads `<root>/<table>.json`, each file an array of `{"id", "fields"}`
/// rows.
#[derive(Debug, Clone)]
pub struct JsonDirReader {
    root: PathBuf,
}

impl JsonDirReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn table_path(&self, table: &str) -> Result<PathBuf, ReaderError> {
        let valid = !table.is_empty()
            && table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(ReaderError::TableNotFound {
                table: table.to_string(),
            });
        }
        Ok(self.root.join(format!("{table}.json")))
    }
}

#[async_trait]
impl TableReader for JsonDirReader {
    async fn fetch_all(&self, table: &str) -> Result<Vec<RawRow>, ReaderError> {
        let path = self.table_path(table)?;
        let bytes = tokio::fs::read(&path).await.map_err(|e| match e.kind() {
            ErrorKind::NotFound => ReaderError::TableNotFound {
                table: table.to_string(),
            },
            _ => ReaderError::Transport {
                reason: format!("{}: {e}", path.display()),
            },
        })?;

        let rows: Vec<RawRow> =
            serde_json::from_slice(&bytes).map_err(|e| ReaderError::Malformed {
                table: table.to_string(),
                reason: e.to_string(),
            })?;
        debug!(table, rows = rows.len(), path = %path.display(), "Read table file");
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, contents: &str) {
        std::fs::write(dir.path().join(name), contents).expect("write table file");
    }

    #[tokio::test]
    async fn test_reads_rows() {
        let dir = TempDir::new().expect("temp dir");
        write(
            &dir,
            "verbs.json",
            r#"[{"id": "recV1", "fields": {"infinitive": "ser"}}, {"id": "recV2"}]"#,
        );

        let rows = JsonDirReader::new(dir.path())
            .fetch_all("verbs")
            .await
            .expect("read verbs");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].fields.get("infinitive"), Some(&json!("ser")));
        assert!(rows[1].fields.is_empty());
    }

    #[tokio::test]
    async fn test_missing_file_is_table_not_found() {
        let dir = TempDir::new().expect("temp dir");
        let err = JsonDirReader::new(dir.path())
            .fetch_all("ghosts")
            .await
            .expect_err("no such table");
        assert_eq!(
            err,
            ReaderError::TableNotFound {
                table: "ghosts".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_malformed_file() {
        let dir = TempDir::new().expect("temp dir");
        write(&dir, "verbs.json", r#"{"id": "not-an-array"}"#);
        let err = JsonDirReader::new(dir.path())
            .fetch_all("verbs")
            .await
            .expect_err("object is not a row list");
        assert!(matches!(err, ReaderError::Malformed { ref table, .. } if table == "verbs"));
    }

    #[tokio::test]
    async fn test_rejects_path_like_table_names() {
        let dir = TempDir::new().expect("temp dir");
        let reader = JsonDirReader::new(dir.path());
        for table in ["../etc/passwd", "a/b", "", "x.json"] {
            assert!(matches!(
                reader.fetch_all(table).await,
                Err(ReaderError::TableNotFound { .. })
            ));
        }
    }
}
