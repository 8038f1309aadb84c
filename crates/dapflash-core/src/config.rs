//! Link configuration

use std::time::Duration;

/// SWCLK frequency used when none is given
pub const DEFAULT_CLOCK_HZ: u32 = 1_000_000;

/// How long status polls wait before giving up
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(1);

/// Settings applied when connecting to a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// SWCLK frequency in Hz
    pub clock_hz: u32,
    /// Deadline for each NVM/DSU/power-up status poll
    pub poll_timeout: Duration,
}

impl LinkConfig {
    /// Return a copy with a different clock
    pub fn with_clock(mut self, clock_hz: u32) -> Self {
        self.clock_hz = clock_hz;
        self
    }

    /// Return a copy with a different poll timeout
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            clock_hz: DEFAULT_CLOCK_HZ,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }
}
