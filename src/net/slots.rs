//! Connection slot pool.
//!
//! # Responsibilities
//! - Bound concurrent requests and WebSocket sessions to `max_conn`
//! - Reject immediately when saturated (no queueing)
//! - Release the slot on every exit path via RAII

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::error::ProxyError;

/// Bounded pool of connection slots owned by one server instance.
#[derive(Debug, Clone)]
pub struct ConnectionSlots {
    semaphore: Arc<Semaphore>,
    max_connections: usize,
}

impl ConnectionSlots {
    pub fn new(max_connections: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Take a slot, or fail with `ConnectionLimitExceeded` if none is free.
    pub fn try_acquire(&self) -> Result<ConnectionPermit, ProxyError> {
        match self.semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                tracing::trace!(
                    available_permits = self.semaphore.available_permits(),
                    "Connection slot acquired"
                );
                Ok(ConnectionPermit { _permit: permit })
            }
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => {
                Err(ProxyError::ConnectionLimitExceeded(self.max_connections))
            }
        }
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }
}

/// A permit representing a connection slot.
///
/// When dropped, the connection slot is released back to the pool.
/// This keeps the pool consistent even if the handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}
