//! Storage-side building blocks for chunked transfers.
//!
//! - [`sanitize_filename`] reduces client-supplied names to a base name.
//! - [`ChunkReader`] splits a file into fixed-size [`Chunk`]s.
//! - [`PartialFile`] stages incoming bytes and publishes them atomically.
//! - [`list_storage`] enumerates the flat storage namespace.
//!
//! [`Chunk`]: filestream_protocol::Chunk

mod chunked;
mod listing;
mod validation;

pub use chunked::{ChunkReader, PartialFile, chunk_count, sweep_staging};
pub use listing::list_storage;
pub use validation::sanitize_filename;

pub use filestream_protocol::constants::DEFAULT_CHUNK_SIZE;

/// Name of the staging directory for in-flight writes.
///
/// Lives inside the storage root; listings skip it because it is a directory.
pub const STAGING_DIR: &str = ".partial";

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("invalid filename: {0}")]
    InvalidFilename(String),
}
