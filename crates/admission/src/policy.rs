use filestream_protocol::Method;
use filestream_protocol::constants::{DOWNLOAD_CAPACITY, LIST_CAPACITY, UPLOAD_CAPACITY};
use serde::{Deserialize, Serialize};

use crate::AdmissionError;
use crate::limiter::Limiter;

/// Per-kind capacities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionLimits {
    pub upload: usize,
    pub download: usize,
    pub list: usize,
}

impl Default for AdmissionLimits {
    fn default() -> Self {
        Self {
            upload: UPLOAD_CAPACITY,
            download: DOWNLOAD_CAPACITY,
            list: LIST_CAPACITY,
        }
    }
}

impl AdmissionLimits {
    pub fn capacity(&self, method: Method) -> usize {
        match method {
            Method::Upload => self.upload,
            Method::Download => self.download,
            Method::List => self.list,
        }
    }
}

/// One independent limiter per operation kind.
#[derive(Debug, Clone)]
pub struct Limiters {
    upload: Limiter,
    download: Limiter,
    list: Limiter,
}

impl Limiters {
    pub fn new(limits: &AdmissionLimits) -> Result<Self, AdmissionError> {
        Ok(Self {
            upload: Limiter::new(Method::Upload.as_str(), limits.upload)?,
            download: Limiter::new(Method::Download.as_str(), limits.download)?,
            list: Limiter::new(Method::List.as_str(), limits.list)?,
        })
    }

    /// The limiter guarding `method`.
    pub fn get(&self, method: Method) -> &Limiter {
        match method {
            Method::Upload => &self.upload,
            Method::Download => &self.download,
            Method::List => &self.list,
        }
    }
}
