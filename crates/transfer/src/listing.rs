//! Storage root enumeration.

use std::path::Path;

use chrono::{DateTime, Utc};
use filestream_protocol::FileInfo;
use tracing::{debug, warn};

use crate::TransferError;

/// Lists the regular files directly under `root`, sorted by name.
///
/// Directories are skipped. Both timestamps carry the modification time.
/// An unreadable root fails the whole listing; an entry that cannot be
/// stat'ed is skipped.
pub async fn list_storage(root: &Path) -> Result<Vec<FileInfo>, TransferError> {
    let mut entries = tokio::fs::read_dir(root).await?;
    let mut files = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();

        // Follows symlinks, so a link to a regular file is listed.
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(e) => {
                debug!(path = %path.display(), "skipping entry: {e}");
                continue;
            }
        };
        if !metadata.is_file() {
            continue;
        }

        let modified = match metadata.modified() {
            Ok(t) => DateTime::<Utc>::from(t),
            Err(e) => {
                debug!(path = %path.display(), "skipping entry without mtime: {e}");
                continue;
            }
        };

        let Ok(name) = entry.file_name().into_string() else {
            warn!(path = %path.display(), "skipping entry with non UTF-8 name");
            continue;
        };

        files.push(FileInfo::from_modified(name, modified));
    }

    files.sort_by(|a, b| a.filename.cmp(&b.filename));
    Ok(files)
}
