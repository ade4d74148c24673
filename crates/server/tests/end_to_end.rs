//! Client against a live server on an ephemeral port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use filestream_admission::AdmissionLimits;
use filestream_client::{ClientConfig, ClientError, TransferClient};
use filestream_protocol::{
    FileRequest, Frame, Method, OpenCall, StatusCode, read_frame, write_frame,
};
use filestream_server::{FileServer, ServerConfig, UPLOAD_OK_MESSAGE};
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;

const CHUNK: usize = 1024;

struct Harness {
    server: Arc<FileServer>,
    handle: JoinHandle<()>,
    addr: SocketAddr,
    storage: TempDir,
    local: TempDir,
}

impl Harness {
    async fn start() -> Self {
        Self::start_with(AdmissionLimits::default()).await
    }

    async fn start_with(limits: AdmissionLimits) -> Self {
        let storage = TempDir::new().unwrap();
        let local = TempDir::new().unwrap();
        let config = ServerConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            storage_root: storage.path().to_path_buf(),
            chunk_size: CHUNK,
            limits,
            ..ServerConfig::default()
        };

        let server = FileServer::new(config).unwrap();
        let runner = Arc::clone(&server);
        let handle = tokio::spawn(async move {
            runner.run().await.unwrap();
        });

        let mut addr = None;
        for _ in 0..100 {
            addr = server.local_addr().await;
            if addr.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        Self {
            server,
            handle,
            addr: addr.expect("server did not bind"),
            storage,
            local,
        }
    }

    fn client(&self) -> TransferClient {
        TransferClient::new(ClientConfig {
            chunk_size: CHUNK,
            ..ClientConfig::new(self.addr.to_string())
        })
    }

    fn write_local(&self, name: &str, data: &[u8]) -> std::path::PathBuf {
        let path = self.local.path().join(name);
        std::fs::write(&path, data).unwrap();
        path
    }

    async fn stop(self) {
        self.server.shutdown();
        self.handle.await.unwrap();
    }
}

fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

#[tokio::test]
async fn round_trip_preserves_bytes() {
    let h = Harness::start().await;
    let client = h.client();
    let out = TempDir::new().unwrap();

    for len in [0, 1, CHUNK - 1, CHUNK, CHUNK + 1, 3 * CHUNK, 3 * CHUNK + 17] {
        let name = format!("file-{len}.bin");
        let data = pattern(len);
        let path = h.write_local(&name, &data);

        let status = client.upload(&path).await.unwrap();
        assert!(status.success);
        assert_eq!(status.message, UPLOAD_OK_MESSAGE);

        let summary = client.download(&name, out.path()).await.unwrap();
        assert_eq!(summary.bytes_written, len as u64);
        assert_eq!(summary.chunks, (len as u64).div_ceil(CHUNK as u64));
        assert_eq!(std::fs::read(&summary.path).unwrap(), data, "size {len}");
    }

    h.stop().await;
}

#[tokio::test]
async fn traversal_names_stay_in_storage() {
    let h = Harness::start().await;
    let client = h.client();
    let out = TempDir::new().unwrap();

    std::fs::write(h.storage.path().join("passwd"), b"stored copy").unwrap();

    let summary = client.download("../../etc/passwd", out.path()).await.unwrap();
    assert_eq!(summary.path, out.path().join("passwd"));
    assert_eq!(std::fs::read(&summary.path).unwrap(), b"stored copy");

    h.stop().await;
}

#[tokio::test]
async fn missing_file_is_not_found() {
    let h = Harness::start().await;
    let out = TempDir::new().unwrap();

    let err = h.client().download("ghost.txt", out.path()).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.remote_code(), Some(StatusCode::NotFound));
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);

    h.stop().await;
}

#[tokio::test]
async fn empty_storage_lists_nothing() {
    let h = Harness::start().await;
    assert!(h.client().list().await.unwrap().is_empty());
    h.stop().await;
}

#[tokio::test]
async fn listing_is_stable_and_sorted() {
    let h = Harness::start().await;
    let client = h.client();

    for name in ["charlie.txt", "alpha.txt", "bravo.txt"] {
        let path = h.write_local(name, name.as_bytes());
        client.upload(&path).await.unwrap();
    }
    std::fs::create_dir(h.storage.path().join("subdir")).unwrap();

    let first = client.list().await.unwrap();
    let second = client.list().await.unwrap();
    let names: Vec<&str> = first.iter().map(|f| f.filename.as_str()).collect();

    assert_eq!(names, vec!["alpha.txt", "bravo.txt", "charlie.txt"]);
    assert_eq!(first, second);
    assert!(first.iter().all(|f| f.created_at == f.updated_at));

    h.stop().await;
}

#[tokio::test]
async fn reupload_replaces_content() {
    let h = Harness::start().await;
    let client = h.client();
    let out = TempDir::new().unwrap();

    let path = h.write_local("doc.txt", b"version one, longer");
    client.upload(&path).await.unwrap();
    std::fs::write(&path, b"v2").unwrap();
    client.upload(&path).await.unwrap();

    let summary = client.download("doc.txt", out.path()).await.unwrap();
    assert_eq!(std::fs::read(summary.path).unwrap(), b"v2");

    h.stop().await;
}

#[tokio::test]
async fn admission_bounds_concurrent_calls() {
    let h = Harness::start_with(AdmissionLimits {
        list: 1,
        ..AdmissionLimits::default()
    })
    .await;

    // Hold the only list slot from outside.
    let held = h
        .server
        .engine()
        .limiters()
        .get(Method::List)
        .try_acquire()
        .unwrap();

    let client = TransferClient::new(ClientConfig {
        list_timeout: Duration::from_millis(300),
        ..ClientConfig::new(h.addr.to_string())
    });
    let err = client.list().await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout { .. }));

    // Uploads use their own limiter and still go through.
    let path = h.write_local("side.txt", b"side");
    h.client().upload(&path).await.unwrap();

    drop(held);
    let files = h.client().list().await.unwrap();
    assert_eq!(files.len(), 1);

    h.stop().await;
}

#[tokio::test]
async fn queued_calls_run_once_slot_frees() {
    let h = Harness::start_with(AdmissionLimits {
        download: 1,
        ..AdmissionLimits::default()
    })
    .await;
    std::fs::write(h.storage.path().join("shared.bin"), pattern(4 * CHUNK)).unwrap();

    let held = h
        .server
        .engine()
        .limiters()
        .get(Method::Download)
        .try_acquire()
        .unwrap();

    let out = TempDir::new().unwrap();
    let client = h.client();
    let dest = out.path().to_path_buf();
    let queued = tokio::spawn(async move { client.download("shared.bin", &dest).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!queued.is_finished());

    drop(held);
    let summary = queued.await.unwrap().unwrap();
    assert_eq!(summary.bytes_written, 4 * CHUNK as u64);

    h.stop().await;
}

#[tokio::test]
async fn concurrent_uploads_finish_with_whole_files() {
    let h = Harness::start().await;

    let mut tasks = Vec::new();
    for i in 0..8 {
        let path = h.write_local(&format!("part-{i}.bin"), &pattern(2 * CHUNK + i));
        let client = h.client();
        tasks.push(tokio::spawn(async move { client.upload(&path).await }));
    }
    for task in tasks {
        assert!(task.await.unwrap().unwrap().success);
    }

    let files = h.client().list().await.unwrap();
    assert_eq!(files.len(), 8);
    for i in 0..8 {
        let stored = std::fs::read(h.storage.path().join(format!("part-{i}.bin"))).unwrap();
        assert_eq!(stored, pattern(2 * CHUNK + i));
    }

    h.stop().await;
}

#[tokio::test]
async fn longest_names_round_trip() {
    let h = Harness::start().await;
    let client = h.client();
    let out = TempDir::new().unwrap();

    let name = format!("{}.txt", "x".repeat(246));
    let path = h.write_local(&name, b"long name");
    assert!(client.upload(&path).await.unwrap().success);

    let summary = client.download(&name, out.path()).await.unwrap();
    assert_eq!(summary.path, out.path().join(&name));
    assert_eq!(std::fs::read(&summary.path).unwrap(), b"long name");

    h.stop().await;
}

#[tokio::test]
async fn dropped_download_returns_its_slot() {
    let h = Harness::start().await;
    std::fs::write(h.storage.path().join("big.bin"), pattern(4 * 1024 * 1024)).unwrap();

    let mut stream = TcpStream::connect(h.addr).await.unwrap();
    write_frame(
        &mut stream,
        &Frame::Open(OpenCall::download(FileRequest::new("big.bin"))),
    )
    .await
    .unwrap();
    let first = read_frame(&mut stream).await.unwrap();
    assert!(matches!(first, Some(Frame::Chunk(_))));
    drop(stream);

    let downloads = h.server.engine().limiters().get(Method::Download);
    let mut in_use = downloads.in_use();
    for _ in 0..250 {
        if in_use == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        in_use = downloads.in_use();
    }
    assert_eq!(in_use, 0);

    // The slot is usable again.
    let out = TempDir::new().unwrap();
    let summary = h.client().download("big.bin", out.path()).await.unwrap();
    assert_eq!(summary.bytes_written, 4 * 1024 * 1024);

    h.stop().await;
}
