//! Error types for the frame codec.

/// Errors produced while encoding or decoding frames.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid frame header: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame {part} too large: {size} bytes (max {max})")]
    FrameTooLarge {
        part: &'static str,
        size: usize,
        max: usize,
    },

    #[error("connection closed in the middle of a frame")]
    UnexpectedEof,

    #[error("protocol error: {0}")]
    Protocol(String),
}
