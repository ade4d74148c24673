use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::AdmissionError;

/// Bounded-concurrency gate for one operation kind.
///
/// Cloning a limiter shares its slots.
#[derive(Debug, Clone)]
pub struct Limiter {
    name: Arc<str>,
    capacity: usize,
    slots: Arc<Semaphore>,
}

/// One held admission slot. Dropping it returns the slot.
#[derive(Debug)]
pub struct Permit {
    name: Arc<str>,
    _slot: OwnedSemaphorePermit,
}

impl Permit {
    /// Name of the limiter this slot belongs to.
    pub fn limiter(&self) -> &str {
        &self.name
    }

    /// Returns the slot now instead of at end of scope.
    pub fn release(self) {
        drop(self);
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        trace!(limiter = %self.name, "admission slot released");
    }
}

impl Limiter {
    /// Creates a limiter with `capacity` slots.
    pub fn new(name: impl Into<String>, capacity: usize) -> Result<Self, AdmissionError> {
        let name: String = name.into();
        if capacity == 0 {
            return Err(AdmissionError::ZeroCapacity(name));
        }
        if capacity > Semaphore::MAX_PERMITS {
            return Err(AdmissionError::CapacityTooLarge {
                name,
                capacity,
                max: Semaphore::MAX_PERMITS,
            });
        }

        Ok(Self {
            name: name.into(),
            capacity,
            slots: Arc::new(Semaphore::new(capacity)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Slots free right now.
    pub fn available(&self) -> usize {
        self.slots.available_permits()
    }

    /// Slots held right now.
    pub fn in_use(&self) -> usize {
        self.capacity - self.available()
    }

    /// Waits until a slot is free and takes it. Never fails.
    pub async fn acquire(&self) -> Permit {
        if self.available() == 0 {
            debug!(limiter = %self.name, capacity = self.capacity, "admission saturated, waiting for a slot");
        }

        // The semaphore is private and never closed, so acquisition can only
        // complete with a permit.
        let Ok(slot) = Arc::clone(&self.slots).acquire_owned().await else {
            unreachable!("admission semaphore is never closed");
        };

        trace!(limiter = %self.name, in_use = self.in_use(), "admission slot acquired");
        self.permit(slot)
    }

    /// Takes a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<Permit> {
        Arc::clone(&self.slots)
            .try_acquire_owned()
            .ok()
            .map(|slot| self.permit(slot))
    }

    /// Waits at most `timeout` for a slot.
    ///
    /// Returns `None` if no slot freed up in time.
    pub async fn try_acquire_for(&self, timeout: Duration) -> Option<Permit> {
        match tokio::time::timeout(timeout, self.acquire()).await {
            Ok(permit) => Some(permit),
            Err(_) => {
                debug!(limiter = %self.name, ?timeout, "admission wait timed out");
                None
            }
        }
    }

    /// Waits for a slot until `cancel` fires.
    ///
    /// Returns `None` if the wait was cancelled first.
    pub async fn try_acquire_until_cancelled(&self, cancel: &CancellationToken) -> Option<Permit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(limiter = %self.name, "admission wait cancelled");
                None
            }
            permit = self.acquire() => Some(permit),
        }
    }

    fn permit(&self, slot: OwnedSemaphorePermit) -> Permit {
        Permit {
            name: Arc::clone(&self.name),
            _slot: slot,
        }
    }
}
