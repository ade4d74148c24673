use std::time::Duration;

use filestream_protocol::Method;
use filestream_protocol::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_PORT, DOWNLOAD_TIMEOUT, LIST_TIMEOUT, MAX_PAYLOAD_SIZE,
    UPLOAD_TIMEOUT,
};

use crate::ClientError;

/// Client settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address as `host:port`.
    pub server_addr: String,
    /// Time allowed to establish the TCP connection.
    pub connect_timeout: Duration,
    /// Whole-call budget for uploads.
    pub upload_timeout: Duration,
    /// Whole-call budget for downloads.
    pub download_timeout: Duration,
    /// Whole-call budget for listings.
    pub list_timeout: Duration,
    /// Size of the chunks sent on uploads, in bytes.
    pub chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_addr: format!("localhost:{DEFAULT_PORT}"),
            connect_timeout: Duration::from_secs(5),
            upload_timeout: UPLOAD_TIMEOUT,
            download_timeout: DOWNLOAD_TIMEOUT,
            list_timeout: LIST_TIMEOUT,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl ClientConfig {
    pub fn new(server_addr: impl Into<String>) -> Self {
        Self {
            server_addr: server_addr.into(),
            ..Self::default()
        }
    }

    /// Checks values no call can work with.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.chunk_size == 0 || self.chunk_size > MAX_PAYLOAD_SIZE {
            return Err(ClientError::Config(format!(
                "chunk_size must be between 1 and {MAX_PAYLOAD_SIZE}, got {}",
                self.chunk_size
            )));
        }
        for (name, budget) in [
            ("connect_timeout", self.connect_timeout),
            ("upload_timeout", self.upload_timeout),
            ("download_timeout", self.download_timeout),
            ("list_timeout", self.list_timeout),
        ] {
            if budget.is_zero() {
                return Err(ClientError::Config(format!("{name} must be non-zero")));
            }
        }
        Ok(())
    }

    /// Call budget for `method`.
    pub fn timeout_for(&self, method: Method) -> Duration {
        match method {
            Method::Upload => self.upload_timeout,
            Method::Download => self.download_timeout,
            Method::List => self.list_timeout,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_reference_policy() {
        let config = ClientConfig::default();
        assert_eq!(config.server_addr, "localhost:50051");
        assert_eq!(config.timeout_for(Method::Upload), Duration::from_secs(10));
        assert_eq!(config.timeout_for(Method::Download), Duration::from_secs(15));
        assert_eq!(config.timeout_for(Method::List), Duration::from_secs(5));
        assert_eq!(config.chunk_size, 32 * 1024);
    }

    #[test]
    fn new_overrides_address_only() {
        let config = ClientConfig::new("10.0.0.2:9000");
        assert_eq!(config.server_addr, "10.0.0.2:9000");
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
        config.validate().unwrap();
    }

    #[test]
    fn validate_bounds_chunk_size() {
        for chunk_size in [0, MAX_PAYLOAD_SIZE + 1] {
            let config = ClientConfig {
                chunk_size,
                ..ClientConfig::default()
            };
            let err = config.validate().unwrap_err();
            assert!(matches!(err, ClientError::Config(ref msg) if msg.contains("chunk_size")));
        }

        let largest = ClientConfig {
            chunk_size: MAX_PAYLOAD_SIZE,
            ..ClientConfig::default()
        };
        largest.validate().unwrap();
    }

    #[test]
    fn validate_rejects_zero_budget() {
        let config = ClientConfig {
            list_timeout: Duration::ZERO,
            ..ClientConfig::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("list_timeout"));
    }
}
