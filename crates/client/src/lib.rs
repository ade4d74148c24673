//! Transfer client for filestream.
//!
//! [`TransferClient`] mirrors the server's three operations. Every call
//! opens its own TCP connection, runs under a per-call deadline and sends
//! that deadline to the server so both sides give up together.

mod client;
mod config;

pub use client::{DownloadSummary, TransferClient};
pub use config::ClientConfig;

use std::time::Duration;

use filestream_protocol::{CallError, Method, StatusCode, WireError};
use filestream_transfer::TransferError;

/// Errors produced by the transfer client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid client configuration: {0}")]
    Config(String),

    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} timed out after {budget:?}")]
    Timeout { operation: Method, budget: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("wire error: {0}")]
    Wire(#[from] WireError),

    #[error("server error ({code}): {message}")]
    Remote { code: StatusCode, message: String },

    #[error("server closed the call without a result")]
    Disconnected,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error(transparent)]
    Transfer(#[from] TransferError),
}

impl From<CallError> for ClientError {
    fn from(err: CallError) -> Self {
        ClientError::Remote {
            code: err.code,
            message: err.message,
        }
    }
}

impl ClientError {
    /// True when the file does not exist, on the server (download) or
    /// locally (upload source).
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ClientError::Remote {
                code: StatusCode::NotFound,
                ..
            } | ClientError::Transfer(TransferError::NotFound(_))
        )
    }

    /// Status code reported by the server, if the failure came from it.
    pub fn remote_code(&self) -> Option<StatusCode> {
        match self {
            ClientError::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_not_found() {
        let err = ClientError::from(CallError::new(StatusCode::NotFound, "a.txt"));
        assert!(err.is_not_found());
        assert_eq!(err.remote_code(), Some(StatusCode::NotFound));
        assert_eq!(err.to_string(), "server error (not_found): a.txt");
    }

    #[test]
    fn local_not_found() {
        let err = ClientError::from(TransferError::NotFound("src.bin".into()));
        assert!(err.is_not_found());
        assert_eq!(err.remote_code(), None);
    }

    #[test]
    fn io_failure_is_not_not_found() {
        let err = ClientError::from(CallError::new(StatusCode::Io, "disk full"));
        assert!(!err.is_not_found());
    }

    #[test]
    fn timeout_message_names_operation() {
        let err = ClientError::Timeout {
            operation: Method::Download,
            budget: Duration::from_secs(15),
        };
        assert_eq!(err.to_string(), "download timed out after 15s");
    }
}
