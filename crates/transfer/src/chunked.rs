use std::path::{Path, PathBuf};

use filestream_protocol::Chunk;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, warn};

use crate::{DEFAULT_CHUNK_SIZE, TransferError};

/// Extension of staged temp files.
const PART_SUFFIX: &str = ".part";

/// Number of chunks a file of `len` bytes splits into.
pub fn chunk_count(len: u64, chunk_size: usize) -> u64 {
    len.div_ceil(chunk_size.max(1) as u64)
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

/// Reads a file in fixed-size chunks.
///
/// Every chunk except the last is exactly `chunk_size` bytes.
pub struct ChunkReader {
    file: tokio::fs::File,
    filename: String,
    chunk_size: usize,
    offset: u64,
    file_size: u64,
}

impl ChunkReader {
    /// Opens `path` for chunked reading; chunks are tagged with `filename`.
    ///
    /// If `chunk_size` is 0, [`DEFAULT_CHUNK_SIZE`] is used. A missing path
    /// or one that is not a regular file yields [`TransferError::NotFound`].
    pub async fn open(
        path: &Path,
        filename: impl Into<String>,
        chunk_size: usize,
    ) -> Result<Self, TransferError> {
        let filename = filename.into();
        let file = match tokio::fs::File::open(path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(TransferError::NotFound(filename));
            }
            Err(e) => return Err(e.into()),
        };

        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(TransferError::NotFound(filename));
        }

        let chunk_size = if chunk_size == 0 {
            DEFAULT_CHUNK_SIZE
        } else {
            chunk_size
        };
        Ok(Self {
            file,
            filename,
            chunk_size,
            offset: 0,
            file_size: metadata.len(),
        })
    }

    /// Reads the next chunk. Returns `None` at EOF.
    pub async fn next_chunk(&mut self) -> Result<Option<Chunk>, TransferError> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }

        if filled == 0 {
            return Ok(None);
        }
        buf.truncate(filled);
        self.offset += filled as u64;

        Ok(Some(Chunk {
            filename: self.filename.clone(),
            content: buf,
        }))
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Bytes read so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// File size when it was opened.
    pub fn file_size(&self) -> u64 {
        self.file_size
    }
}

// ---------------------------------------------------------------------------
// PartialFile
// ---------------------------------------------------------------------------

/// A file being written that only appears under its final name on
/// [`commit`](Self::commit).
///
/// Bytes go to a hidden temp file in a staging directory on the same
/// filesystem. Dropping without committing removes the temp file, so a
/// failed or cancelled write never leaves partial data behind.
pub struct PartialFile {
    file: tokio::fs::File,
    temp_path: PathBuf,
    final_path: PathBuf,
    written: u64,
    committed: bool,
}

impl PartialFile {
    /// Creates the temp file for `final_path` inside `staging_dir`.
    ///
    /// The temp name does not embed the final name, so any name the
    /// filesystem accepts can be staged.
    pub async fn create(final_path: PathBuf, staging_dir: &Path) -> Result<Self, TransferError> {
        if final_path.file_name().is_none() {
            return Err(TransferError::InvalidFilename(format!(
                "{} has no file name",
                final_path.display()
            )));
        }

        tokio::fs::create_dir_all(staging_dir).await?;
        let temp_path =
            staging_dir.join(format!(".{}{PART_SUFFIX}", uuid::Uuid::new_v4().simple()));
        let file = tokio::fs::File::create(&temp_path).await?;

        debug!(temp = %temp_path.display(), target = %final_path.display(), "staging file created");

        Ok(Self {
            file,
            temp_path,
            final_path,
            written: 0,
            committed: false,
        })
    }

    /// Appends `data` at the end of the staged bytes.
    pub async fn append(&mut self, data: &[u8]) -> Result<(), TransferError> {
        self.file.write_all(data).await?;
        self.written += data.len() as u64;
        Ok(())
    }

    /// Bytes staged so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn final_path(&self) -> &Path {
        &self.final_path
    }

    /// Flushes to disk and moves the file to its final name.
    ///
    /// Replaces any existing file with that name. Returns the byte count.
    pub async fn commit(mut self) -> Result<u64, TransferError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        tokio::fs::rename(&self.temp_path, &self.final_path).await?;
        self.committed = true;

        debug!(path = %self.final_path.display(), bytes = self.written, "staged file committed");
        Ok(self.written)
    }
}

/// Removes temp files left in `staging_dir` by writers that never
/// finished (e.g. a killed process). Returns how many were removed.
///
/// Only call this while no [`PartialFile`] is staging into `staging_dir`.
pub async fn sweep_staging(staging_dir: &Path) -> Result<usize, TransferError> {
    let mut entries = match tokio::fs::read_dir(staging_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_part = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with('.') && n.ends_with(PART_SUFFIX));
        if !is_part || !entry.file_type().await?.is_file() {
            continue;
        }
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), "failed to remove stale partial file: {e}"),
        }
    }
    Ok(removed)
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        match std::fs::remove_file(&self.temp_path) {
            Ok(()) => debug!(temp = %self.temp_path.display(), "discarded partial file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(temp = %self.temp_path.display(), "failed to discard partial file: {e}"),
        }
    }
}
