//! Table relationship graph.
//!
//! The source has no schema of its own. The graph records, once, which
//! fields of each table are links and therefore which tables a traversal can
//! reach. A linked field is named after the table it points into.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::TableName;

/// What to do with a resolved child's field that points back at its parent
/// table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackReferencePolicy {
    /// Strip the parent-named field only when the graph declares the reverse
    /// link, i.e. the relationship is bidirectional.
    #[default]
    Declared,
    /// Strip any child field named after the parent table.
    ByName,
    /// Never strip.
    Keep,
}

/// How far a followed relationship suppresses further expansion of the
/// same relationship (or its reverse) within one top-level resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeGuard {
    /// Once followed anywhere in the call, a relationship is never followed
    /// again; later occurrences keep their bare ids.
    #[default]
    Call,
    /// Only relationships open on the current branch are skipped, so
    /// sibling records each expand the same relationship.
    Branch,
    /// No edge guard; the visited-record set alone bounds cycles.
    Off,
}

/// Adjacency of tables to their linked field names.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RelationshipGraph {
    tables: BTreeMap<TableName, BTreeSet<String>>,
}

impl RelationshipGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table and its linked fields, builder style.
    pub fn with_table<I, S>(mut self, table: impl Into<TableName>, links: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.add_table(table, links);
        self
    }

    /// Declare a table and its linked fields. Redeclaring a table extends its
    /// link set.
    pub fn add_table<I, S>(&mut self, table: impl Into<TableName>, links: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tables
            .entry(table.into())
            .or_default()
            .extend(links.into_iter().map(Into::into));
    }

    pub fn contains_table(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// All declared tables, in name order.
    pub fn tables(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    /// Linked fields declared for `table`.
    pub fn links<'a>(&'a self, table: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.tables
            .get(table)
            .into_iter()
            .flat_map(|links| links.iter().map(String::as_str))
    }

    /// True when `field` on `table` is a declared link into a known table.
    pub fn is_link(&self, table: &str, field: &str) -> bool {
        self.contains_table(field)
            && self
                .tables
                .get(table)
                .is_some_and(|links| links.contains(field))
    }

    /// Every table reachable from `anchor` by following links, excluding the
    /// anchor itself, in breadth-first order.
    pub fn reachable_from(&self, anchor: &str) -> Vec<TableName> {
        let mut seen: BTreeSet<&str> = BTreeSet::new();
        let mut order = Vec::new();
        let mut queue = VecDeque::new();
        seen.insert(anchor);
        queue.push_back(anchor);

        while let Some(table) = queue.pop_front() {
            for link in self.links(table) {
                if self.contains_table(link) && seen.insert(link) {
                    order.push(link.to_string());
                    queue.push_back(link);
                }
            }
        }
        order
    }

    /// The field to strip from a child of `child_table` resolved under a
    /// parent of `parent_table`, if any.
    pub fn back_reference<'a>(
        &self,
        parent_table: &'a str,
        child_table: &str,
        policy: BackReferencePolicy,
    ) -> Option<&'a str> {
        match policy {
            BackReferencePolicy::Keep => None,
            BackReferencePolicy::ByName => Some(parent_table),
            BackReferencePolicy::Declared => self
                .is_link(child_table, parent_table)
                .then_some(parent_table),
        }
    }

    /// Every declared link must name a declared table.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (table, links) in &self.tables {
            if table.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "tables".to_string(),
                    value: table.clone(),
                    reason: "table names must not be empty".to_string(),
                });
            }
            if let Some(missing) = links.iter().find(|link| !self.contains_table(link)) {
                return Err(ConfigError::UnknownTable {
                    table: missing.clone(),
                    referenced_by: table.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> RelationshipGraph {
        RelationshipGraph::new()
            .with_table("courses", ["lessons"])
            .with_table(
                "lessons",
                ["courses", "sentence_structures", "verbs", "pronouns"],
            )
            .with_table("sentence_structures", Vec::<String>::new())
            .with_table("verbs", Vec::<String>::new())
            .with_table("pronouns", Vec::<String>::new())
    }

    #[test]
    fn test_is_link_requires_declared_target() {
        let graph = RelationshipGraph::new()
            .with_table("a", ["b", "ghost"])
            .with_table("b", Vec::<String>::new());
        assert!(graph.is_link("a", "b"));
        assert!(!graph.is_link("a", "ghost"));
        assert!(!graph.is_link("b", "a"));
    }

    #[test]
    fn test_reachable_from_is_transitive_and_excludes_anchor() {
        let reachable = catalog().reachable_from("courses");
        assert_eq!(
            reachable,
            vec!["lessons", "pronouns", "sentence_structures", "verbs"]
        );
    }

    #[test]
    fn test_reachable_from_unknown_anchor_is_empty() {
        assert!(catalog().reachable_from("nope").is_empty());
    }

    #[test]
    fn test_back_reference_policies() {
        let graph = catalog();
        assert_eq!(
            graph.back_reference("courses", "lessons", BackReferencePolicy::Declared),
            Some("courses")
        );
        // verbs does not link back to lessons
        assert_eq!(
            graph.back_reference("lessons", "verbs", BackReferencePolicy::Declared),
            None
        );
        assert_eq!(
            graph.back_reference("lessons", "verbs", BackReferencePolicy::ByName),
            Some("lessons")
        );
        assert_eq!(
            graph.back_reference("courses", "lessons", BackReferencePolicy::Keep),
            None
        );
    }

    #[test]
    fn test_validate_rejects_dangling_link() {
        let graph = RelationshipGraph::new().with_table("a", ["b"]);
        let err = graph.validate().expect_err("dangling link should fail");
        assert_eq!(
            err,
            ConfigError::UnknownTable {
                table: "b".to_string(),
                referenced_by: "a".to_string(),
            }
        );
        assert!(catalog().validate().is_ok());
    }

    #[test]
    fn test_policy_serde_names() {
        let policy: BackReferencePolicy =
            serde_json::from_str("\"by_name\"").expect("policy should parse");
        assert_eq!(policy, BackReferencePolicy::ByName);
    }
}
