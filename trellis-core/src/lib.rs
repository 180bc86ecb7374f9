//! Trellis Core - Record Types
//!
//! Pure data structures shared by every Trellis crate: records and their
//! tagged field values, the table relationship graph, field paths, the
//! table reader seam, configuration, and the error taxonomy.
//! No caching or I/O lives here.

pub mod config;
pub mod error;
pub mod path;
pub mod reader;
pub mod record;
pub mod schema;
pub mod value;

pub use config::{PersistenceConfig, TrellisConfig};
pub use error::{
    ConfigError, FetchError, PathError, ReaderError, RefreshError, StoreError, TrellisError,
    TrellisResult,
};
pub use path::{FieldPath, PathSegment};
pub use reader::TableReader;
pub use record::{RawRow, Record};
pub use schema::{BackReferencePolicy, EdgeGuard, RelationshipGraph};
pub use value::{FieldValue, ReferenceMarker, Scalar, DEFAULT_REFERENCE_PREFIX};

/// Name of a table in the remote source. By convention a linked field carries
/// the name of the table it points into.
pub type TableName = String;

/// Opaque record identifier assigned by the remote source.
pub type RecordId = String;
