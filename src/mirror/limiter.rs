//! Request pacing for download operations.
//!
//! Enforces a minimum spacing between request start times shared by every
//! worker of a run, so concurrency never turns into burst traffic against
//! the platform.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

/// Shared request pacer.
///
/// Each call to [`acquire`](RequestPacer::acquire) claims the next start
/// slot under a mutex and sleeps outside of it, so slots are handed out
/// strictly `min_interval` apart no matter how many workers contend.
pub struct RequestPacer {
    min_interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RequestPacer {
    /// Create a pacer with the given minimum inter-request spacing.
    /// A zero interval disables pacing.
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            next_slot: Mutex::new(None),
        }
    }

    /// Create a disabled pacer that never delays.
    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        !self.min_interval.is_zero()
    }

    /// Wait until this caller may start a request.
    pub async fn acquire(&self) {
        if !self.is_enabled() {
            return;
        }

        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.min_interval);
            slot
        };

        tokio::time::sleep_until(slot).await;
    }
}
