//! The three client operations.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use filestream_protocol::{
    Chunk, FileInfo, FileRequest, Frame, FrameReader, FrameWriter, Method, OpenCall,
    UploadStatus, WireError,
};
use filestream_transfer::{ChunkReader, PartialFile, TransferError, sanitize_filename};
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, info};

use crate::{ClientConfig, ClientError};

/// How long to wait for the server's error frame after a failed send.
const ERROR_GRACE: Duration = Duration::from_secs(1);

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Result of a finished download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Where the file was written.
    pub path: PathBuf,
    pub bytes_written: u64,
    /// Number of chunks received.
    pub chunks: u64,
}

/// One open call: a connection that has sent its `open` frame.
struct Call {
    method: Method,
    reader: FrameReader<BufReader<OwnedReadHalf>>,
    writer: FrameWriter<OwnedWriteHalf>,
}

impl Call {
    async fn send(&mut self, frame: &Frame) -> Result<(), ClientError> {
        match self.writer.send(frame).await {
            Ok(()) => Ok(()),
            Err(e) => Err(self.failure_reason(e).await),
        }
    }

    /// A send failed; the server usually said why before closing.
    async fn failure_reason(&mut self, send_err: WireError) -> ClientError {
        match tokio::time::timeout(ERROR_GRACE, self.reader.recv()).await {
            Ok(Ok(Some(Frame::Error(err)))) => err.into(),
            _ => send_err.into(),
        }
    }

    /// Next frame of the reply; a dropped connection is an error.
    async fn recv(&mut self) -> Result<Frame, ClientError> {
        match self.reader.recv().await? {
            Some(Frame::Error(err)) => Err(err.into()),
            Some(frame) => Ok(frame),
            None => Err(ClientError::Disconnected),
        }
    }

    fn unexpected(&self, frame: &Frame) -> ClientError {
        ClientError::Protocol(format!(
            "unexpected {} frame in {} reply",
            frame.kind(),
            self.method
        ))
    }
}

/// Client for a filestream server.
#[derive(Debug, Clone)]
pub struct TransferClient {
    config: ClientConfig,
}

impl TransferClient {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Uploads the file at `path` under its base name.
    ///
    /// A zero-byte file is sent as a single empty chunk.
    pub async fn upload(&self, path: &Path) -> Result<UploadStatus, ClientError> {
        self.within(Method::Upload, |budget| self.upload_inner(path, budget))
            .await
    }

    async fn upload_inner(&self, path: &Path, budget: Duration) -> Result<UploadStatus, ClientError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| {
                TransferError::InvalidFilename(format!("{} has no file name", path.display()))
            })?;
        let mut chunks = ChunkReader::open(path, filename.clone(), self.config.chunk_size).await?;

        let mut call = self.open(OpenCall::upload().with_deadline(budget)).await?;

        let mut sent = 0u64;
        while let Some(chunk) = chunks.next_chunk().await? {
            call.send(&Frame::Chunk(chunk)).await?;
            sent += 1;
        }
        if sent == 0 {
            call.send(&Frame::Chunk(Chunk::new(filename.clone(), Vec::new())))
                .await?;
            sent = 1;
        }
        call.send(&Frame::End).await?;

        let status = match call.recv().await? {
            Frame::UploadStatus(status) => status,
            other => return Err(call.unexpected(&other)),
        };

        info!(
            file = %filename,
            bytes = chunks.offset(),
            chunks = sent,
            "upload finished: {}",
            status.message
        );
        Ok(status)
    }

    /// Downloads `filename` into `dest_dir`, named after its base name.
    ///
    /// The file only appears in `dest_dir` once the whole download arrived;
    /// a failed download leaves nothing behind.
    pub async fn download(
        &self,
        filename: &str,
        dest_dir: &Path,
    ) -> Result<DownloadSummary, ClientError> {
        self.within(Method::Download, |budget| {
            self.download_inner(filename, dest_dir, budget)
        })
        .await
    }

    async fn download_inner(
        &self,
        filename: &str,
        dest_dir: &Path,
        budget: Duration,
    ) -> Result<DownloadSummary, ClientError> {
        let name = sanitize_filename(filename)?;
        let mut call = self
            .open(OpenCall::download(FileRequest::new(filename)).with_deadline(budget))
            .await?;

        let mut partial = PartialFile::create(dest_dir.join(&name), dest_dir).await?;
        let mut chunks = 0u64;
        loop {
            match call.recv().await? {
                Frame::Chunk(chunk) => {
                    partial.append(&chunk.content).await?;
                    chunks += 1;
                }
                Frame::End => break,
                other => return Err(call.unexpected(&other)),
            }
        }

        let path = partial.final_path().to_path_buf();
        let bytes_written = partial.commit().await?;
        info!(file = %name, bytes = bytes_written, chunks, "download finished");

        Ok(DownloadSummary {
            path,
            bytes_written,
            chunks,
        })
    }

    /// Lists the files stored on the server.
    pub async fn list(&self) -> Result<Vec<FileInfo>, ClientError> {
        let mut files = Vec::new();
        self.list_with(|info| files.push(info)).await?;
        Ok(files)
    }

    /// Lists the files stored on the server, handing each entry to
    /// `on_entry` as it arrives. Returns the number of entries.
    pub async fn list_with<F>(&self, mut on_entry: F) -> Result<u64, ClientError>
    where
        F: FnMut(FileInfo),
    {
        self.within(Method::List, |budget| async move {
            let mut call = self.open(OpenCall::list().with_deadline(budget)).await?;
            let mut entries = 0u64;
            loop {
                match call.recv().await? {
                    Frame::FileInfo(info) => {
                        on_entry(info);
                        entries += 1;
                    }
                    Frame::End => break,
                    other => return Err(call.unexpected(&other)),
                }
            }
            debug!(entries, "listing finished");
            Ok(entries)
        })
        .await
    }

    /// Runs one call under its configured budget.
    async fn within<T, F, Fut>(&self, method: Method, call: F) -> Result<T, ClientError>
    where
        F: FnOnce(Duration) -> Fut,
        Fut: Future<Output = Result<T, ClientError>>,
    {
        self.config.validate()?;
        let budget = self.config.timeout_for(method);
        tokio::time::timeout(budget, call(budget))
            .await
            .map_err(|_| ClientError::Timeout {
                operation: method,
                budget,
            })?
    }

    async fn open(&self, open: OpenCall) -> Result<Call, ClientError> {
        let addr = &self.config.server_addr;
        let stream = match tokio::time::timeout(self.config.connect_timeout, TcpStream::connect(addr))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(ClientError::Connect {
                    addr: addr.clone(),
                    source,
                });
            }
            Err(_) => {
                return Err(ClientError::Connect {
                    addr: addr.clone(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "connection attempt timed out",
                    ),
                });
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!("failed to set TCP_NODELAY: {e}");
        }
        debug!(%addr, method = %open.method, "call opened");

        let (read_half, write_half) = stream.into_split();
        let mut call = Call {
            method: open.method,
            reader: FrameReader::new(BufReader::with_capacity(READ_BUFFER_SIZE, read_half)),
            writer: FrameWriter::new(write_half),
        };
        call.send(&Frame::Open(open)).await?;
        Ok(call)
    }
}
