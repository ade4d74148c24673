//! Server configuration.
//!
//! Loaded from TOML; every field has a default so a partial file (or no
//! file at all) is valid.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use filestream_admission::AdmissionLimits;
use filestream_protocol::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_PORT, MAX_PAYLOAD_SIZE};
use serde::{Deserialize, Serialize};

use crate::ServerError;

/// File server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on.
    #[serde(default = "default_bind_address")]
    pub bind_address: SocketAddr,

    /// Directory holding the stored files.
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// Size of the chunks sent on downloads, in bytes.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Concurrent call capacity per operation kind.
    #[serde(default)]
    pub limits: AdmissionLimits,

    /// Upper bound for any call, in seconds, on top of the caller's deadline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_call_duration_secs: Option<u64>,

    /// Time allowed for a new connection to send its `open` frame.
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,

    /// Longest wait for the peer to send or accept a single frame once a
    /// call is open. Bounds calls whose peer stops making progress.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_bind_address() -> SocketAddr {
    ([0, 0, 0, 0], DEFAULT_PORT).into()
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("storage")
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_open_timeout_secs() -> u64 {
    5
}

fn default_idle_timeout_secs() -> u64 {
    30
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            storage_root: default_storage_root(),
            chunk_size: default_chunk_size(),
            limits: AdmissionLimits::default(),
            max_call_duration_secs: None,
            open_timeout_secs: default_open_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

impl ServerConfig {
    /// Reads a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ServerError> {
        let content = std::fs::read_to_string(path)?;
        let config: ServerConfig = toml::from_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Checks values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ServerError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_PAYLOAD_SIZE {
            return Err(ServerError::Config(format!(
                "chunk_size must be between 1 and {MAX_PAYLOAD_SIZE}, got {}",
                self.chunk_size
            )));
        }
        for (name, capacity) in [
            ("upload", self.limits.upload),
            ("download", self.limits.download),
            ("list", self.limits.list),
        ] {
            if capacity == 0 {
                return Err(ServerError::Config(format!(
                    "limits.{name} must be at least 1"
                )));
            }
        }
        if self.open_timeout_secs == 0 {
            return Err(ServerError::Config("open_timeout_secs must be at least 1".into()));
        }
        if self.idle_timeout_secs == 0 {
            return Err(ServerError::Config("idle_timeout_secs must be at least 1".into()));
        }
        if self.max_call_duration_secs == Some(0) {
            return Err(ServerError::Config(
                "max_call_duration_secs must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }

    pub fn max_call_duration(&self) -> Option<Duration> {
        self.max_call_duration_secs.map(Duration::from_secs)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}
