//! Gateway-wide backoff window.
//!
//! One resume instant shared by every caller. Arming it while it is already
//! open pushes it further out. Uses `tokio::time::Instant` so paused-clock
//! tests can step over the window.

use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

/// Coarse circuit breaker: closed, or open until a fixed instant.
#[derive(Debug)]
pub struct Backoff {
    window: Duration,
    resume_at: RwLock<Option<Instant>>,
}

impl Backoff {
    /// Breaker that stays open for `window` after each failure.
    #[must_use]
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            resume_at: RwLock::new(None),
        }
    }

    /// Open the window from now. Returns the resume instant.
    pub fn arm(&self) -> Instant {
        let at = Instant::now() + self.window;
        *self.resume_at.write() = Some(at);
        at
    }

    /// Time left in the window, or `None` when calls are allowed.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        let at = (*self.resume_at.read())?;
        let now = Instant::now();
        (now < at).then(|| at - now)
    }

    /// Whether calls are currently refused.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.remaining().is_some()
    }

    /// Close the window immediately.
    pub fn reset(&self) {
        *self.resume_at.write() = None;
    }

    /// Configured window length.
    #[must_use]
    pub fn window(&self) -> Duration {
        self.window
    }
}
