//! Trellis command-line client.
//!
//! Serves a linked-record cache over a directory of JSON table files.

pub mod args;
pub mod commands;
pub mod config;
pub mod error;
pub mod reader;
pub mod telemetry;

pub use args::{Cli, Command};
pub use config::{CliConfig, LogFormat};
pub use error::CliError;
pub use reader::JsonDirReader;
