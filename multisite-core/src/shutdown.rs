//! In-flight request tracking and bounded draining.
//!
//! A [`ConnectionTracker`] counts work that is still running against some
//! resource (the listener, or a single tenant instance). Once it stops
//! accepting, [`ConnectionTracker::drain`] waits for the count to reach
//! zero, giving up after a timeout.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Connection tracker for draining in-flight requests
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    /// Number of active connections
    active: Arc<AtomicU64>,
    /// Whether new connections are allowed
    accepting: Arc<AtomicBool>,
}

impl ConnectionTracker {
    /// Create a new connection tracker
    pub fn new() -> Self {
        Self {
            active: Arc::new(AtomicU64::new(0)),
            accepting: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Increment active connection count
    ///
    /// Returns None if not accepting new connections.
    pub fn increment(&self) -> Option<ConnectionGuard> {
        if !self.accepting.load(Ordering::Acquire) {
            return None;
        }

        self.active.fetch_add(1, Ordering::SeqCst);

        // stop_accepting may have raced with the increment above
        if !self.accepting.load(Ordering::Acquire) {
            self.decrement();
            return None;
        }

        Some(ConnectionGuard {
            tracker: self.clone(),
        })
    }

    /// Get number of active connections
    pub fn active_count(&self) -> u64 {
        self.active.load(Ordering::Acquire)
    }

    /// Stop accepting new connections
    pub fn stop_accepting(&self) {
        self.accepting.store(false, Ordering::Release);
    }

    /// Check if accepting new connections
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Wait for all connections to drain
    ///
    /// Returns true if drained within timeout, false otherwise.
    pub async fn drain(&self, timeout_duration: Duration) -> bool {
        let start = tokio::time::Instant::now();

        while self.active_count() > 0 {
            if start.elapsed() >= timeout_duration {
                warn!(
                    active = self.active_count(),
                    "drain timeout reached with requests still in flight"
                );
                return false;
            }

            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }

        info!("all in-flight requests drained");
        true
    }

    fn decrement(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for tracking a connection
///
/// Automatically decrements count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    tracker: ConnectionTracker,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.tracker.decrement();
    }
}
