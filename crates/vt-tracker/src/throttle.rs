//! Shared rate-limit window
//!
//! One [`Throttle`] is shared by every worker of a run. When any call is rate
//! limited the window is extended, and every worker waits it out before its
//! next call.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Backoff window shared across workers
#[derive(Debug, Default)]
pub struct Throttle {
    until: Mutex<Option<Instant>>,
}

impl Throttle {
    /// Create open throttle
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the window for at least `delay` from now
    ///
    /// Never shortens an already longer window.
    pub fn pause_for(&self, delay: Duration) {
        let candidate = Instant::now() + delay;
        let mut until = self.until.lock();
        match *until {
            Some(current) if current >= candidate => {}
            _ => {
                tracing::debug!(delay_ms = delay.as_millis() as u64, "throttle window extended");
                *until = Some(candidate);
            }
        }
    }

    /// Remaining time until the window opens
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        let until = (*self.until.lock())?;
        let now = Instant::now();
        (until > now).then(|| until - now)
    }

    /// Wait until the window is open
    pub async fn wait(&self) {
        // Re-check after sleeping: another worker may have extended the window.
        while let Some(remaining) = self.remaining() {
            tokio::time::sleep(remaining).await;
        }
    }
}
