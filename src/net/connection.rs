//! Session lifecycle tracking.
//!
//! # Responsibilities
//! - Generate per-server session IDs for tracing
//! - Count live WebSocket bridge sessions
//! - Let shutdown wait for sessions to drain

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Unique identifier for a bridge session within one server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Tracks live sessions for graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    /// Current count of live sessions.
    active_count: Arc<AtomicU64>,
    /// Relaxed ordering is enough: the counter only has to be unique.
    next_id: Arc<AtomicU64>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new session. Returns a guard that decrements on drop.
    pub fn track(&self) -> SessionGuard {
        self.active_count.fetch_add(1, Ordering::SeqCst);
        SessionGuard {
            active_count: Arc::clone(&self.active_count),
            id: SessionId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1),
        }
    }

    /// Get current live session count.
    pub fn active_count(&self) -> u64 {
        self.active_count.load(Ordering::SeqCst)
    }

    /// Wait until all sessions are closed.
    ///
    /// Callers bound this with a timeout.
    pub async fn wait_for_drain(&self) {
        while self.active_count.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

/// Guard that tracks a session's lifetime.
/// Decrements active count when dropped.
#[derive(Debug)]
pub struct SessionGuard {
    active_count: Arc<AtomicU64>,
    id: SessionId,
}

impl SessionGuard {
    /// Get this session's ID.
    pub fn id(&self) -> SessionId {
        self.id
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.active_count.fetch_sub(1, Ordering::SeqCst);
        tracing::trace!(session_id = %self.id, "Session released");
    }
}
