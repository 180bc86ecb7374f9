//! The seam to the remote tabular source.

use async_trait::async_trait;

use crate::error::ReaderError;
use crate::record::RawRow;

/// Reads whole tables from the remote source.
///
/// Implementations own the transport; they do no caching of their own and
/// must return the complete table on success.
#[async_trait]
pub trait TableReader: Send + Sync {
    /// Fetch every row of `table`.
    async fn fetch_all(&self, table: &str) -> Result<Vec<RawRow>, ReaderError>;
}
