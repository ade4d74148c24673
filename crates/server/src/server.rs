//! TCP call server.
//!
//! Every accepted connection carries exactly one call: an `open` frame
//! naming the operation, then the operation's frames. Each call runs as
//! its own task, bounded by the caller's deadline (capped by the server)
//! and by server shutdown.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use filestream_protocol::{Frame, FrameReader, FrameWriter, Method, OpenCall, WireError};
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::ServerConfig;
use crate::engine::{CallStats, EngineError, TransferEngine};
use crate::ServerError;

/// Read buffer per connection; one default chunk plus its frame header.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// How long a failed call keeps reading after its error frame, so the
/// peer's in-flight bytes do not turn the close into a reset.
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

/// Pause after a failed accept (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The file server.
pub struct FileServer {
    engine: TransferEngine,
    config: ServerConfig,
    cancel: CancellationToken,
    tracker: TaskTracker,
    local_addr: Mutex<Option<SocketAddr>>,
}

impl FileServer {
    /// Validates `config` and builds the engine it describes.
    pub fn new(config: ServerConfig) -> Result<Arc<Self>, ServerError> {
        config.validate()?;
        let engine = TransferEngine::new(&config.storage_root, config.chunk_size, &config.limits)?
            .with_idle_timeout(config.idle_timeout());

        Ok(Arc::new(Self {
            engine,
            config,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            local_addr: Mutex::new(None),
        }))
    }

    pub fn engine(&self) -> &TransferEngine {
        &self.engine
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the local address the server is listening on.
    ///
    /// Only available after [`run`](Self::run) binds the socket.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().await
    }

    /// Stops accepting calls and cancels the ones in flight.
    ///
    /// [`run`](Self::run) returns once every call task has finished.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Number of calls currently running.
    pub fn active_calls(&self) -> usize {
        self.tracker.len()
    }

    /// Runs the server until [`shutdown`](Self::shutdown).
    ///
    /// Creates the storage root if missing, binds the configured address and
    /// accepts calls.
    pub async fn run(self: &Arc<Self>) -> Result<(), ServerError> {
        self.engine.ensure_storage().await?;

        let listener = TcpListener::bind(self.config.bind_address).await?;
        let local_addr = listener.local_addr()?;
        *self.local_addr.lock().await = Some(local_addr);
        info!(
            addr = %local_addr,
            storage = %self.engine.storage_root().display(),
            chunk_size = self.engine.chunk_size(),
            "file server listening"
        );

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(in_flight = self.tracker.len(), "file server shutting down");
                    break;
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let server = Arc::clone(self);
                            self.tracker.spawn(async move {
                                server.handle_connection(stream, peer).await;
                            });
                        }
                        Err(e) => {
                            error!("accept error: {e}");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
            }
        }

        drop(listener);
        self.tracker.close();
        self.tracker.wait().await;
        info!("file server stopped");
        Ok(())
    }

    /// Runs one call to completion. Failures stay local to the call.
    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, "failed to set TCP_NODELAY: {e}");
        }
        let (read_half, write_half) = stream.into_split();
        let mut reader = FrameReader::new(BufReader::with_capacity(READ_BUFFER_SIZE, read_half));
        let mut writer = FrameWriter::new(write_half);

        let open = match self.read_open(&mut reader).await {
            Ok(open) => open,
            Err(e) => {
                warn!(%peer, "call rejected before open: {e}");
                fail_call(&mut reader, &mut writer, &e).await;
                return;
            }
        };

        let method = open.method;
        let budget = self.call_budget(&open);
        let started = Instant::now();
        debug!(%peer, %method, ?budget, "call started");

        let call = self.dispatch(&open, &mut reader, &mut writer);
        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::ShuttingDown),
            result = with_budget(budget, call) => result,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(CallStats {
                filename,
                bytes,
                frames,
                ..
            }) => {
                info!(
                    %peer,
                    %method,
                    file = filename.as_deref().unwrap_or("-"),
                    bytes,
                    frames,
                    elapsed_ms,
                    "call finished"
                );
                let _ = writer.shutdown().await;
            }
            Err(e) => {
                let file = open.filename.as_deref().unwrap_or("-");
                if e.is_client_fault() {
                    warn!(%peer, %method, file, elapsed_ms, code = %e.status_code(), "call rejected: {e}");
                } else {
                    error!(%peer, %method, file, elapsed_ms, code = %e.status_code(), "call failed: {e}");
                }
                fail_call(&mut reader, &mut writer, &e).await;
            }
        }
    }

    async fn read_open<R>(&self, reader: &mut FrameReader<R>) -> Result<OpenCall, EngineError>
    where
        R: AsyncRead + Unpin,
    {
        let limit = self.config.open_timeout();
        let frame = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(EngineError::ShuttingDown),
            result = tokio::time::timeout(limit, reader.recv()) => {
                result.map_err(|_| EngineError::DeadlineExceeded(limit))??
            }
        };

        match frame {
            Some(Frame::Open(open)) => Ok(open),
            Some(other) => Err(EngineError::Protocol(format!(
                "expected open frame, got {}",
                other.kind()
            ))),
            None => Err(EngineError::Disconnected),
        }
    }

    /// The tighter of the caller's deadline and the server cap.
    fn call_budget(&self, open: &OpenCall) -> Option<Duration> {
        match (open.deadline(), self.config.max_call_duration()) {
            (Some(client), Some(cap)) => Some(client.min(cap)),
            (client, cap) => client.or(cap),
        }
    }

    async fn dispatch<R, W>(
        &self,
        open: &OpenCall,
        reader: &mut FrameReader<R>,
        writer: &mut FrameWriter<W>,
    ) -> Result<CallStats, EngineError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        match open.method {
            Method::Upload => self.engine.upload(reader, writer).await,
            Method::Download => {
                let request = open.file_request().ok_or_else(|| {
                    EngineError::InvalidArgument("download requires a filename".into())
                })?;
                self.engine.download(&request, writer).await
            }
            Method::List => self.engine.list(writer).await,
        }
    }
}

async fn with_budget<F>(budget: Option<Duration>, call: F) -> Result<CallStats, EngineError>
where
    F: Future<Output = Result<CallStats, EngineError>>,
{
    match budget {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| EngineError::DeadlineExceeded(limit))?,
        None => call.await,
    }
}

/// Sends the terminal error frame (best effort) and closes the call.
async fn fail_call<R, W>(reader: &mut FrameReader<R>, writer: &mut FrameWriter<W>, err: &EngineError)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let transport_gone = matches!(
        err,
        EngineError::Disconnected | EngineError::Wire(WireError::Io(_) | WireError::UnexpectedEof)
    );
    if transport_gone {
        return;
    }

    if let Err(e) = writer.send(&Frame::Error(err.to_call_error())).await {
        debug!("failed to send error frame: {e}");
        return;
    }
    let _ = writer.shutdown().await;

    let _ = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while let Ok(Some(_)) = reader.recv().await {}
    })
    .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use filestream_admission::AdmissionLimits;
    use filestream_protocol::{CallError, Chunk, FileRequest, StatusCode, read_frame, write_frame};
    use tempfile::TempDir;
    use tokio::task::JoinHandle;

    fn test_config(dir: &TempDir) -> ServerConfig {
        ServerConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            storage_root: dir.path().join("storage"),
            chunk_size: 8,
            limits: AdmissionLimits::default(),
            max_call_duration_secs: None,
            open_timeout_secs: 1,
            idle_timeout_secs: 5,
        }
    }

    async fn start(config: ServerConfig) -> (Arc<FileServer>, JoinHandle<()>, SocketAddr) {
        let server = FileServer::new(config).unwrap();
        let runner = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            runner.run().await.unwrap();
        });

        for _ in 0..100 {
            if let Some(addr) = server.local_addr().await {
                return (server, handle, addr);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server did not bind");
    }

    async fn call(addr: SocketAddr, frames: &[Frame]) -> Vec<Frame> {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        for frame in frames {
            write_frame(&mut stream, frame).await.unwrap();
        }
        let mut received = Vec::new();
        while let Ok(Some(frame)) = read_frame(&mut stream).await {
            received.push(frame);
        }
        received
    }

    fn error_code(frames: &[Frame]) -> Option<StatusCode> {
        match frames.last() {
            Some(Frame::Error(CallError { code, .. })) => Some(*code),
            _ => None,
        }
    }

    #[tokio::test]
    async fn server_binds_and_creates_storage() {
        let dir = TempDir::new().unwrap();
        let (server, handle, addr) = start(test_config(&dir)).await;

        assert!(addr.port() > 0);
        assert!(dir.path().join("storage").is_dir());

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            chunk_size: 0,
            ..test_config(&dir)
        };
        assert!(matches!(FileServer::new(config), Err(ServerError::Config(_))));
    }

    #[tokio::test]
    async fn upload_then_list_over_tcp() {
        let dir = TempDir::new().unwrap();
        let (server, handle, addr) = start(test_config(&dir)).await;

        let reply = call(
            addr,
            &[
                Frame::Open(OpenCall::upload()),
                Frame::Chunk(Chunk::new("a.txt", b"0123456789".to_vec())),
                Frame::End,
            ],
        )
        .await;
        assert!(matches!(reply.as_slice(), [Frame::UploadStatus(s)] if s.success));

        let reply = call(addr, &[Frame::Open(OpenCall::list())]).await;
        assert!(matches!(reply.as_slice(), [Frame::FileInfo(info), Frame::End] if info.filename == "a.txt"));

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn first_frame_must_be_open() {
        let dir = TempDir::new().unwrap();
        let (server, handle, addr) = start(test_config(&dir)).await;

        let reply = call(addr, &[Frame::End]).await;
        assert_eq!(error_code(&reply), Some(StatusCode::Protocol));

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn download_without_filename_is_invalid() {
        let dir = TempDir::new().unwrap();
        let (server, handle, addr) = start(test_config(&dir)).await;

        let mut open = OpenCall::download(FileRequest::new("x"));
        open.filename = None;
        let reply = call(addr, &[Frame::Open(open)]).await;
        assert_eq!(error_code(&reply), Some(StatusCode::InvalidArgument));

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn silent_connection_hits_open_timeout() {
        let dir = TempDir::new().unwrap();
        let (server, handle, addr) = start(test_config(&dir)).await;

        let reply = call(addr, &[]).await;
        assert_eq!(error_code(&reply), Some(StatusCode::DeadlineExceeded));

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn caller_deadline_bounds_the_call() {
        let dir = TempDir::new().unwrap();
        let (server, handle, addr) = start(test_config(&dir)).await;

        // Upload opened but never fed.
        let open = OpenCall::upload().with_deadline(Duration::from_millis(100));
        let started = Instant::now();
        let reply = call(addr, &[Frame::Open(open)]).await;

        assert_eq!(error_code(&reply), Some(StatusCode::DeadlineExceeded));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(server.engine().limiters().get(Method::Upload).in_use(), 0);
        assert!(std::fs::read_dir(dir.path().join("storage").join(".partial"))
            .unwrap()
            .next()
            .is_none());

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn server_cap_applies_without_caller_deadline() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            max_call_duration_secs: Some(1),
            ..test_config(&dir)
        };
        let (server, handle, addr) = start(config).await;

        let reply = call(addr, &[Frame::Open(OpenCall::upload())]).await;
        assert_eq!(error_code(&reply), Some(StatusCode::DeadlineExceeded));

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn idle_upload_releases_its_slot() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig {
            limits: AdmissionLimits {
                upload: 1,
                ..AdmissionLimits::default()
            },
            idle_timeout_secs: 1,
            ..test_config(&dir)
        };
        let (server, handle, addr) = start(config).await;

        // Opens an upload without a deadline, then sends nothing.
        let started = Instant::now();
        let reply = call(addr, &[Frame::Open(OpenCall::upload())]).await;

        assert_eq!(error_code(&reply), Some(StatusCode::DeadlineExceeded));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(server.engine().limiters().get(Method::Upload).in_use(), 0);

        let reply = call(
            addr,
            &[
                Frame::Open(OpenCall::upload()),
                Frame::Chunk(Chunk::new("after.txt", b"next".to_vec())),
                Frame::End,
            ],
        )
        .await;
        assert!(matches!(reply.as_slice(), [Frame::UploadStatus(s)] if s.success));

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn shutdown_cancels_in_flight_calls() {
        let dir = TempDir::new().unwrap();
        let (server, handle, addr) = start(test_config(&dir)).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        write_frame(&mut stream, &Frame::Open(OpenCall::upload()))
            .await
            .unwrap();
        write_frame(
            &mut stream,
            &Frame::Chunk(Chunk::new("slow.bin", b"partial".to_vec())),
        )
        .await
        .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.active_calls(), 1);

        server.shutdown();
        let reply = read_frame(&mut stream).await.unwrap();
        assert!(matches!(
            reply,
            Some(Frame::Error(CallError { code: StatusCode::Unavailable, .. }))
        ));

        handle.await.unwrap();
        assert!(!dir.path().join("storage").join("slow.bin").exists());
    }
}
