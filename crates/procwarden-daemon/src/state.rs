//! Broker-wide counters shared by every connection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::info;

/// How often the shutdown path re-checks outstanding protection.
pub const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How long shutdown defers to outstanding protection before proceeding
/// anyway.
pub const SHUTDOWN_PROTECTION_GRACE: Duration = Duration::from_secs(30);

/// Counters every session updates and the shutdown path reads.
#[derive(Debug, Default)]
pub struct BrokerState {
    active_sessions: AtomicUsize,
    shutdown_protection: AtomicUsize,
}

impl BrokerState {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_opened(&self) -> usize {
        self.active_sessions.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn session_closed(&self) -> usize {
        self.active_sessions
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_or(0, |previous| previous - 1)
    }

    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Acquire)
    }

    pub fn protection_acquired(&self) -> usize {
        self.shutdown_protection.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Release `count` acquisitions at once, as happens when a session
    /// disconnects while holding several. Floors at zero.
    pub fn protection_released(&self, count: usize) -> usize {
        self.shutdown_protection
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                Some(n.saturating_sub(count))
            })
            .map_or(0, |previous| previous.saturating_sub(count))
    }

    #[must_use]
    pub fn shutdown_protection(&self) -> usize {
        self.shutdown_protection.load(Ordering::Acquire)
    }

    /// Wait until no session holds shutdown protection, or until `grace`
    /// elapses. Returns whether protection cleared in time.
    pub async fn wait_for_shutdown_clearance(&self, grace: Duration) -> bool {
        let started = tokio::time::Instant::now();
        loop {
            let held = self.shutdown_protection();
            if held == 0 {
                return true;
            }
            if started.elapsed() >= grace {
                return false;
            }
            info!(held, "shutdown deferred while protection is held");
            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }
}
