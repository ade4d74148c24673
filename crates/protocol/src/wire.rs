//! Frame codec.
//!
//! # Wire format
//!
//! ```text
//! FRAME:
//!   [4 bytes BE: header_len]
//!   [4 bytes BE: payload_len]
//!   [header_len bytes: JSON header, tagged by "type"]
//!   [payload_len bytes: raw payload (chunk content only)]
//! ```
//!
//! A clean EOF before the first byte of a frame means the peer closed its
//! half of the connection.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::{MAX_HEADER_SIZE, MAX_PAYLOAD_SIZE};
use crate::envelope::{Frame, FrameHeader};
use crate::error::WireError;

const PREFIX_LEN: usize = 8;

/// Writes a single frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
) -> Result<(), WireError> {
    let header = serde_json::to_vec(&frame.header())?;
    let payload = frame.payload();

    if header.len() > MAX_HEADER_SIZE {
        return Err(WireError::FrameTooLarge {
            part: "header",
            size: header.len(),
            max: MAX_HEADER_SIZE,
        });
    }
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(WireError::FrameTooLarge {
            part: "payload",
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(PREFIX_LEN + header.len());
    buf.extend_from_slice(&(header.len() as u32).to_be_bytes());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(&header);

    writer.write_all(&buf).await?;
    if !payload.is_empty() {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Reads a single frame.
///
/// Returns `None` if the peer closed the stream cleanly between frames.
pub async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Frame>, WireError> {
    let mut prefix = [0u8; PREFIX_LEN];
    if !read_prefix(reader, &mut prefix).await? {
        return Ok(None);
    }

    let header_len = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
    let payload_len = u32::from_be_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]) as usize;

    if header_len == 0 {
        return Err(WireError::Protocol("empty frame header".into()));
    }
    if header_len > MAX_HEADER_SIZE {
        return Err(WireError::FrameTooLarge {
            part: "header",
            size: header_len,
            max: MAX_HEADER_SIZE,
        });
    }
    if payload_len > MAX_PAYLOAD_SIZE {
        return Err(WireError::FrameTooLarge {
            part: "payload",
            size: payload_len,
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut header_buf = vec![0u8; header_len];
    read_body(reader, &mut header_buf).await?;
    let header: FrameHeader = serde_json::from_slice(&header_buf)?;

    let mut payload = vec![0u8; payload_len];
    read_body(reader, &mut payload).await?;

    Frame::from_parts(header, payload).map(Some)
}

/// Fills `buf` with the frame prefix. Returns `false` on clean EOF before
/// the first byte.
async fn read_prefix<R: AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut [u8; PREFIX_LEN],
) -> Result<bool, WireError> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(false);
            }
            return Err(WireError::UnexpectedEof);
        }
        filled += n;
    }
    Ok(true)
}

async fn read_body<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut [u8]) -> Result<(), WireError> {
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(WireError::UnexpectedEof),
        Err(e) => Err(e.into()),
    }
}

/// Receiving half of a call.
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads the next frame; `None` once the peer has closed its half.
    pub async fn recv(&mut self) -> Result<Option<Frame>, WireError> {
        read_frame(&mut self.inner).await
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

/// Sending half of a call.
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub async fn send(&mut self, frame: &Frame) -> Result<(), WireError> {
        write_frame(&mut self.inner, frame).await
    }

    /// Shuts down the write side so the peer sees a clean EOF.
    pub async fn shutdown(&mut self) -> Result<(), WireError> {
        self.inner.shutdown().await?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}
