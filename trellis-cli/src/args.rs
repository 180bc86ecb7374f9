//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Trellis - linked-record cache over a directory of JSON tables
#[derive(Parser, Debug)]
#[command(name = "trellis")]
#[command(
    version,
    about = "Fetch, link and cache related tables from a JSON source directory",
    after_help = "\
Examples:
  trellis --config trellis.toml refresh       Rebuild the cache from the anchor table
  trellis get verbs                           Print a table, fetching it if absent
  trellis lookup 0.lessons[1].name            Resolve a field path against the anchor
  trellis record lessons recLesson1           Print one record with its links resolved"
)]
pub struct Cli {
    /// Path to the TOML configuration file
    #[arg(long, short, global = true, env = "TRELLIS_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch, resolve and commit the anchor table
    Refresh,

    /// Drop every cached table and the snapshot
    Clear,

    /// Print a cached table without fetching
    Show {
        /// Table name
        table: String,
    },

    /// Print a table, fetching it if absent
    Get {
        /// Table name
        table: String,
    },

    /// Resolve a field path against the anchor table
    Lookup {
        /// Dot-separated path, e.g. `0.lessons[1].name`
        path: String,
    },

    /// Print one record with its links resolved
    Record {
        /// Table name
        table: String,
        /// Record id
        id: String,
    },

    /// Print cache statistics
    Stats,
}
