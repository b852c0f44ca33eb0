//! Wall clock anchored to the Tokio monotonic clock.
//!
//! Reads the system time once, then advances with `tokio::time::Instant`.
//! Under a paused test runtime this makes `now_ms` move exactly with the
//! timers that drive heartbeats and sweeps.

use presence_core::{Clock, SystemClock};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct RuntimeClock {
    epoch_ms: u64,
    started: Instant,
}

impl RuntimeClock {
    pub fn new() -> Self {
        Self::starting_at(SystemClock.now_ms())
    }

    /// Clock that reads `epoch_ms` right now.
    pub fn starting_at(epoch_ms: u64) -> Self {
        Self {
            epoch_ms,
            started: Instant::now(),
        }
    }
}

impl Default for RuntimeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for RuntimeClock {
    fn now_ms(&self) -> u64 {
        self.epoch_ms + self.started.elapsed().as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_advances_with_paused_time() {
        let clock = RuntimeClock::starting_at(1_000);
        assert_eq!(clock.now_ms(), 1_000);

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        assert_eq!(clock.now_ms(), 3_500);
    }
}
