//! Protocol constants and reference policy values.
//!
//! Only the frame limits are part of the wire contract. Chunk size,
//! capacities and timeouts are deployment policy.

use std::time::Duration;

/// Default chunk size: 32 KiB.
pub const DEFAULT_CHUNK_SIZE: usize = 32 * 1024;

/// Largest payload a single frame may carry (1 MiB).
pub const MAX_PAYLOAD_SIZE: usize = 1024 * 1024;

/// Largest JSON header a single frame may carry (64 KiB).
pub const MAX_HEADER_SIZE: usize = 64 * 1024;

/// Default TCP port of the file server.
pub const DEFAULT_PORT: u16 = 50051;

/// Reference per-call budget for uploads.
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Reference per-call budget for downloads.
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15);

/// Reference per-call budget for listings.
pub const LIST_TIMEOUT: Duration = Duration::from_secs(5);

/// Reference concurrent upload capacity.
pub const UPLOAD_CAPACITY: usize = 10;

/// Reference concurrent download capacity.
pub const DOWNLOAD_CAPACITY: usize = 10;

/// Reference concurrent list capacity.
pub const LIST_CAPACITY: usize = 100;
