//! Monotonic millisecond clock.

use std::time::Instant;

/// Monotonic high-resolution clock measuring float64 milliseconds since its
/// construction. Backs both the host's wall-clock bookkeeping and the
/// `now()` import the guest times iterations with, so guest samples and host
/// budgets live on the same timeline.
#[derive(Debug, Clone)]
pub struct Clock {
    origin: Instant,
}

impl Clock {
    /// Start a clock at zero.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Milliseconds elapsed since construction.
    pub fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}
