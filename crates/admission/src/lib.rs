//! Admission control for filestream calls.
//!
//! Each operation kind owns an independent [`Limiter`]: a counting gate
//! whose slots are held as RAII [`Permit`]s, so a slot is returned on every
//! exit path of a call, including errors and cancellation.

mod limiter;
mod policy;

pub use limiter::{Limiter, Permit};
pub use policy::{AdmissionLimits, Limiters};

/// Errors produced when building limiters.
#[derive(Debug, thiserror::Error)]
pub enum AdmissionError {
    #[error("limiter {0} must have a capacity of at least 1")]
    ZeroCapacity(String),

    #[error("limiter {name} capacity {capacity} exceeds the maximum of {max}")]
    CapacityTooLarge {
        name: String,
        capacity: usize,
        max: usize,
    },
}
