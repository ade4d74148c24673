//! Message contract for filestream calls.
//!
//! A call is one connection carrying a sequence of [`Frame`]s: the caller
//! opens it with [`Frame::Open`], data flows as [`Chunk`]s or
//! [`FileInfo`]s, and the call ends with an [`UploadStatus`], an
//! [`Frame::End`] marker, or an [`Frame::Error`].
//!
//! # Wire format
//!
//! See [`wire`] module for the frame layout.

pub mod constants;
pub mod envelope;
pub mod error;
pub mod types;
pub mod wire;

pub use envelope::{CallError, Frame, Method, OpenCall, StatusCode};
pub use error::WireError;
pub use types::{Chunk, FileInfo, FileRequest, UploadStatus};
pub use wire::{FrameReader, FrameWriter, read_frame, write_frame};
