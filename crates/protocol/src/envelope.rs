use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::types::{Chunk, FileInfo, FileRequest, UploadStatus};

/// The three remote operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    Upload,
    Download,
    List,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Upload => "upload",
            Method::Download => "download",
            Method::List => "list",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure category carried by an `error` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    InvalidArgument,
    NotFound,
    Io,
    DeadlineExceeded,
    Cancelled,
    Unavailable,
    Protocol,
    Internal,
}

impl StatusCode {
    pub fn as_str(self) -> &'static str {
        match self {
            StatusCode::InvalidArgument => "invalid_argument",
            StatusCode::NotFound => "not_found",
            StatusCode::Io => "io",
            StatusCode::DeadlineExceeded => "deadline_exceeded",
            StatusCode::Cancelled => "cancelled",
            StatusCode::Unavailable => "unavailable",
            StatusCode::Protocol => "protocol",
            StatusCode::Internal => "internal",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error details sent as the terminal frame of a failed call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{code}: {message}")]
pub struct CallError {
    pub code: StatusCode,
    pub message: String,
}

impl CallError {
    pub fn new(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// First frame of every call: which operation and its input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenCall {
    pub method: Method,
    /// Requested file (download only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Caller's remaining budget for the call, in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline_ms: Option<u64>,
}

impl OpenCall {
    pub fn upload() -> Self {
        Self {
            method: Method::Upload,
            filename: None,
            deadline_ms: None,
        }
    }

    pub fn download(request: FileRequest) -> Self {
        Self {
            method: Method::Download,
            filename: Some(request.filename),
            deadline_ms: None,
        }
    }

    pub fn list() -> Self {
        Self {
            method: Method::List,
            filename: None,
            deadline_ms: None,
        }
    }

    /// Attaches the caller's deadline.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = Some(deadline.as_millis().min(u64::MAX as u128) as u64);
        self
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_ms.map(Duration::from_millis)
    }

    /// The download request, if this call carries one.
    pub fn file_request(&self) -> Option<FileRequest> {
        self.filename.clone().map(FileRequest::new)
    }
}

/// A single message on a call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Open(OpenCall),
    Chunk(Chunk),
    FileInfo(FileInfo),
    UploadStatus(UploadStatus),
    Error(CallError),
    /// End of the sender's half of the stream.
    End,
}

impl Frame {
    /// Short name used in logs and protocol errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Frame::Open(_) => "open",
            Frame::Chunk(_) => "chunk",
            Frame::FileInfo(_) => "file_info",
            Frame::UploadStatus(_) => "upload_status",
            Frame::Error(_) => "error",
            Frame::End => "end",
        }
    }

    pub(crate) fn header(&self) -> FrameHeader {
        match self {
            Frame::Open(open) => FrameHeader::Open(open.clone()),
            Frame::Chunk(chunk) => FrameHeader::Chunk {
                filename: chunk.filename.clone(),
            },
            Frame::FileInfo(info) => FrameHeader::FileInfo(info.clone()),
            Frame::UploadStatus(status) => FrameHeader::UploadStatus(status.clone()),
            Frame::Error(err) => FrameHeader::Error(err.clone()),
            Frame::End => FrameHeader::End,
        }
    }

    pub(crate) fn payload(&self) -> &[u8] {
        match self {
            Frame::Chunk(chunk) => &chunk.content,
            _ => &[],
        }
    }

    pub(crate) fn from_parts(header: FrameHeader, payload: Vec<u8>) -> Result<Self, WireError> {
        if !payload.is_empty() && !matches!(header, FrameHeader::Chunk { .. }) {
            return Err(WireError::Protocol(format!(
                "unexpected {} byte payload on non-chunk frame",
                payload.len()
            )));
        }

        Ok(match header {
            FrameHeader::Open(open) => Frame::Open(open),
            FrameHeader::Chunk { filename } => Frame::Chunk(Chunk {
                filename,
                content: payload,
            }),
            FrameHeader::FileInfo(info) => Frame::FileInfo(info),
            FrameHeader::UploadStatus(status) => Frame::UploadStatus(status),
            FrameHeader::Error(err) => Frame::Error(err),
            FrameHeader::End => Frame::End,
        })
    }
}

/// JSON header of a frame. Chunk content is carried as the raw payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum FrameHeader {
    Open(OpenCall),
    Chunk { filename: String },
    FileInfo(FileInfo),
    UploadStatus(UploadStatus),
    Error(CallError),
    End,
}
