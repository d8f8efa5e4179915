//! Timing helpers for the frame loop

use std::time::{Duration, Instant};

/// Tick rate assumed when the engine does not declare one
pub const DEFAULT_TICK_RATE_HZ: u32 = 60;

/// Per-frame time budget for a given simulation tick rate
pub fn budget_for_rate(rate_hz: u32) -> Duration {
    Duration::from_micros(1_000_000 / rate_hz.max(1) as u64)
}

/// A simple timer for measuring durations
#[derive(Debug, Clone)]
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_matches_tick_rate() {
        assert_eq!(budget_for_rate(60), Duration::from_micros(16_666));
        assert_eq!(budget_for_rate(120), Duration::from_micros(8_333));
        assert_eq!(budget_for_rate(1), Duration::from_secs(1));
    }

    #[test]
    fn zero_rate_does_not_divide_by_zero() {
        assert_eq!(budget_for_rate(0), Duration::from_secs(1));
    }
}
