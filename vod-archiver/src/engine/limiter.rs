//! Fixed-capacity concurrency limiter for fetch operations.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// Counting semaphore gating simultaneous fetches.
#[derive(Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// A held slot. Dropping it releases the slot.
#[derive(Debug)]
pub struct SlotToken {
    _permit: OwnedSemaphorePermit,
}

impl SlotToken {
    /// Release the slot explicitly.
    pub fn release(self) {}
}

impl ConcurrencyLimiter {
    /// Create a limiter. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot, or fail with [`Error::Cancelled`].
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<SlotToken> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled),
            permit = self.semaphore.clone().acquire_owned() => {
                let permit = permit.map_err(|_| Error::Cancelled)?;
                Ok(SlotToken { _permit: permit })
            }
        }
    }

    /// Take a slot only if one is free right now.
    pub fn try_acquire(&self) -> Option<SlotToken> {
        self.semaphore
            .clone()
            .try_acquire_owned()
            .ok()
            .map(|permit| SlotToken { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Slots currently held.
    pub fn active(&self) -> usize {
        self.capacity.saturating_sub(self.available())
    }
}
