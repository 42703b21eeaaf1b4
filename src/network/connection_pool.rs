//! Bounded accept concurrency

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use super::MAX_CONNECTIONS;

/// Caps the number of connections served at once
#[derive(Clone)]
pub struct ConnectionLimiter {
    semaphore: Arc<Semaphore>,
    max_connections: usize,
}

impl ConnectionLimiter {
    /// Create a new limiter
    ///
    /// # Panics
    ///
    /// Panics if `max_connections` is 0
    #[must_use]
    pub fn new(max_connections: usize) -> Self {
        assert!(max_connections > 0, "max_connections must be > 0");

        Self {
            semaphore: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Try to admit one more connection
    ///
    /// Returns `None` if the limit is reached. The slot is released when the
    /// guard drops.
    pub fn try_acquire(&self) -> Option<ConnectionGuard> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| ConnectionGuard { _permit: permit })
    }

    /// Current number of admitted connections
    #[must_use]
    pub fn active_connections(&self) -> usize {
        self.max_connections - self.semaphore.available_permits()
    }

    /// Get the maximum number of connections
    #[must_use]
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

impl Default for ConnectionLimiter {
    fn default() -> Self {
        Self::new(MAX_CONNECTIONS)
    }
}

/// Slot held for the lifetime of one connection
pub struct ConnectionGuard {
    _permit: OwnedSemaphorePermit,
}
