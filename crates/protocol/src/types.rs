use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One fragment of a file in flight.
///
/// Chunks carry no ordering field: order is the arrival order on the call,
/// and every chunk of one call carries the same `filename`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub filename: String,
    /// Raw bytes. Travels as the frame payload, never inside the JSON header.
    pub content: Vec<u8>,
}

impl Chunk {
    pub fn new(filename: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            content,
        }
    }

    /// Number of content bytes.
    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Terminal response to an upload call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadStatus {
    pub message: String,
    pub success: bool,
}

impl UploadStatus {
    /// A successful status with the given message.
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: true,
        }
    }
}

/// Input to a download call.
///
/// The server only honors the base name of `filename`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRequest {
    pub filename: String,
}

impl FileRequest {
    pub fn new(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
        }
    }
}

/// One stored file, produced while listing.
///
/// Both timestamps come from the modification time; `created_at` is not a
/// true creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub filename: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileInfo {
    /// Builds an entry whose timestamps both carry `modified`.
    pub fn from_modified(filename: impl Into<String>, modified: DateTime<Utc>) -> Self {
        Self {
            filename: filename.into(),
            created_at: modified,
            updated_at: modified,
        }
    }
}
