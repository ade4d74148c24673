//! Transfer engine: the upload, download and list operations.
//!
//! Each operation holds one admission slot of its kind for the whole call
//! and talks to the peer through a [`FrameReader`] / [`FrameWriter`] pair,
//! so it runs the same over TCP and over in-memory pipes. Terminal
//! `error` frames are the caller's business; the engine only sends the
//! success terminals (`upload_status` for uploads, `end` otherwise).

use std::path::{Path, PathBuf};
use std::time::Duration;

use filestream_admission::{AdmissionError, AdmissionLimits, Limiters};
use filestream_protocol::{
    CallError, Frame, FrameReader, FrameWriter, FileRequest, Method, StatusCode, UploadStatus,
    WireError,
};
use filestream_transfer::{
    ChunkReader, PartialFile, STAGING_DIR, TransferError, list_storage, sanitize_filename,
    sweep_staging,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info};

/// Message carried by a successful upload status.
pub const UPLOAD_OK_MESSAGE: &str = "File uploaded successfully";

/// Longest wait for the peer to deliver or accept a single frame.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors that end a call.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload contained no chunks")]
    EmptyUpload,

    #[error("peer closed the call before it finished")]
    Disconnected,

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("admission error: {0}")]
    Admission(#[from] AdmissionError),

    #[error("call exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error("peer stalled for {0:?}")]
    Idle(Duration),

    #[error("server is shutting down")]
    ShuttingDown,
}

impl From<TransferError> for EngineError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Io(e) => EngineError::Io(e),
            TransferError::NotFound(name) => EngineError::NotFound(name),
            TransferError::InvalidFilename(msg) => EngineError::InvalidArgument(msg),
        }
    }
}

impl EngineError {
    /// Wire status code reported to the peer.
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::InvalidArgument(_) | EngineError::EmptyUpload => {
                StatusCode::InvalidArgument
            }
            EngineError::NotFound(_) => StatusCode::NotFound,
            EngineError::Io(_) => StatusCode::Io,
            EngineError::Disconnected => StatusCode::Cancelled,
            EngineError::Wire(WireError::Io(_) | WireError::UnexpectedEof) => {
                StatusCode::Unavailable
            }
            EngineError::Wire(_) | EngineError::Protocol(_) => StatusCode::Protocol,
            EngineError::Admission(_) => StatusCode::Internal,
            EngineError::DeadlineExceeded(_) | EngineError::Idle(_) => {
                StatusCode::DeadlineExceeded
            }
            EngineError::ShuttingDown => StatusCode::Unavailable,
        }
    }

    /// Payload of the terminal `error` frame.
    pub fn to_call_error(&self) -> CallError {
        CallError::new(self.status_code(), self.to_string())
    }

    /// Whether the failure was caused by the request rather than the server.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidArgument(_)
                | EngineError::NotFound(_)
                | EngineError::EmptyUpload
                | EngineError::Protocol(_)
                | EngineError::Idle(_)
        )
    }
}

/// Summary of a finished call, used for logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStats {
    pub method: Method,
    /// Sanitized name of the file the call touched, if any.
    pub filename: Option<String>,
    /// Content bytes moved (file bytes for upload/download).
    pub bytes: u64,
    /// Data frames moved (chunks or file entries).
    pub frames: u64,
}

impl CallStats {
    fn new(method: Method) -> Self {
        Self {
            method,
            filename: None,
            bytes: 0,
            frames: 0,
        }
    }
}

/// Storage-backed implementation of the three operations.
#[derive(Debug)]
pub struct TransferEngine {
    storage_root: PathBuf,
    staging_dir: PathBuf,
    chunk_size: usize,
    idle_timeout: Duration,
    limiters: Limiters,
}

impl TransferEngine {
    /// Creates an engine over `storage_root` with one limiter per kind.
    pub fn new(
        storage_root: impl Into<PathBuf>,
        chunk_size: usize,
        limits: &AdmissionLimits,
    ) -> Result<Self, EngineError> {
        if chunk_size == 0 {
            return Err(EngineError::InvalidArgument(
                "chunk size must be at least 1 byte".into(),
            ));
        }
        let storage_root = storage_root.into();
        Ok(Self {
            staging_dir: storage_root.join(STAGING_DIR),
            storage_root,
            chunk_size,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            limiters: Limiters::new(limits)?,
        })
    }

    /// Sets how long a call may wait on a single frame from or to the peer.
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Creates the storage root (and its staging directory) if missing and
    /// removes temp files left behind by an earlier process.
    ///
    /// Call before serving; it must not run while uploads are in flight.
    pub async fn ensure_storage(&self) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let removed = sweep_staging(&self.staging_dir).await?;
        if removed > 0 {
            info!(
                removed,
                staging = %self.staging_dir.display(),
                "removed stale partial files"
            );
        }
        Ok(())
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn limiters(&self) -> &Limiters {
        &self.limiters
    }

    /// Base name under the storage root for a client-supplied name.
    fn storage_name(&self, requested: &str) -> Result<String, EngineError> {
        let name = sanitize_filename(requested)?;
        if name == STAGING_DIR {
            return Err(EngineError::InvalidArgument(format!(
                "{name:?} is a reserved name"
            )));
        }
        Ok(name)
    }

    async fn recv_frame<R>(&self, reader: &mut FrameReader<R>) -> Result<Frame, EngineError>
    where
        R: AsyncRead + Unpin,
    {
        match tokio::time::timeout(self.idle_timeout, reader.recv()).await {
            Ok(frame) => frame?.ok_or(EngineError::Disconnected),
            Err(_) => Err(EngineError::Idle(self.idle_timeout)),
        }
    }

    async fn send_frame<W>(
        &self,
        writer: &mut FrameWriter<W>,
        frame: &Frame,
    ) -> Result<(), EngineError>
    where
        W: AsyncWrite + Unpin,
    {
        match tokio::time::timeout(self.idle_timeout, writer.send(frame)).await {
            Ok(sent) => Ok(sent?),
            Err(_) => Err(EngineError::Idle(self.idle_timeout)),
        }
    }

    /// Receives chunks until `end`, then publishes the file and answers with
    /// an upload status.
    ///
    /// The first chunk names the file; the name is reduced to its base name.
    /// Bytes are staged and only appear under that name once every chunk has
    /// arrived. Any failure discards the staged bytes.
    pub async fn upload<R, W>(
        &self,
        reader: &mut FrameReader<R>,
        writer: &mut FrameWriter<W>,
    ) -> Result<CallStats, EngineError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let _permit = self.limiters.get(Method::Upload).acquire().await;
        let mut stats = CallStats::new(Method::Upload);
        let mut staged: Option<PartialFile> = None;

        loop {
            match self.recv_frame(reader).await? {
                Frame::Chunk(chunk) => {
                    if staged.is_none() {
                        let name = self.storage_name(&chunk.filename)?;
                        debug!(requested = %chunk.filename, file = %name, "upload started");
                        staged = Some(
                            PartialFile::create(self.storage_root.join(&name), &self.staging_dir)
                                .await?,
                        );
                        stats.filename = Some(name);
                    }
                    if let Some(partial) = staged.as_mut() {
                        partial.append(&chunk.content).await?;
                    }
                    stats.frames += 1;
                }
                Frame::End => break,
                other => {
                    return Err(EngineError::Protocol(format!(
                        "unexpected {} frame during upload",
                        other.kind()
                    )));
                }
            }
        }

        let partial = staged.ok_or(EngineError::EmptyUpload)?;
        stats.bytes = partial.commit().await?;

        self.send_frame(writer, &Frame::UploadStatus(UploadStatus::ok(UPLOAD_OK_MESSAGE)))
            .await?;
        Ok(stats)
    }

    /// Streams the requested file as chunks, then `end`.
    ///
    /// A missing file fails before any chunk is sent.
    pub async fn download<W>(
        &self,
        request: &FileRequest,
        writer: &mut FrameWriter<W>,
    ) -> Result<CallStats, EngineError>
    where
        W: AsyncWrite + Unpin,
    {
        let _permit = self.limiters.get(Method::Download).acquire().await;
        let mut stats = CallStats::new(Method::Download);

        let name = self.storage_name(&request.filename)?;
        let path = self.storage_root.join(&name);
        let mut chunks = ChunkReader::open(&path, name.clone(), self.chunk_size).await?;
        stats.filename = Some(name);

        while let Some(chunk) = chunks.next_chunk().await? {
            stats.bytes += chunk.len() as u64;
            self.send_frame(writer, &Frame::Chunk(chunk)).await?;
            stats.frames += 1;
        }

        self.send_frame(writer, &Frame::End).await?;
        Ok(stats)
    }

    /// Streams one entry per stored file, then `end`.
    pub async fn list<W>(&self, writer: &mut FrameWriter<W>) -> Result<CallStats, EngineError>
    where
        W: AsyncWrite + Unpin,
    {
        let _permit = self.limiters.get(Method::List).acquire().await;
        let mut stats = CallStats::new(Method::List);

        let files = list_storage(&self.storage_root).await?;
        for info in files {
            self.send_frame(writer, &Frame::FileInfo(info)).await?;
            stats.frames += 1;
        }

        self.send_frame(writer, &Frame::End).await?;
        info!(entries = stats.frames, "storage listed");
        Ok(stats)
    }
}
