//! Server side of filestream.
//!
//! [`TransferEngine`] implements the upload, download and list operations
//! against a flat storage directory, bounded by one admission limiter per
//! operation kind. [`FileServer`] accepts TCP connections, runs each call
//! as its own task, and enforces deadlines and shutdown.

mod config;
mod engine;
mod server;

pub use config::ServerConfig;
pub use engine::{CallStats, EngineError, TransferEngine, UPLOAD_OK_MESSAGE};
pub use server::FileServer;

/// Errors produced while configuring or running the server.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
}
