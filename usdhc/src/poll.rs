//! Poll-with-deadline
//!
//! Busy loops read the injected [`Clock`] and keep going until either the
//! awaited condition is observed or the deadline elapses:
//!
//! ```ignore
//! let deadline = Deadline::start(&clock, OCR_TIMEOUT);
//!
//! while !deadline.expired(&clock) {
//!     // issue command, return on success
//! }
//! ```

use core::time::Duration;

use usdhc_hal::Clock;

/// Operating condition negotiation deadline (ACMD41 / CMD1)
pub const OCR_TIMEOUT: Duration = Duration::from_secs(1);

/// Select (CMD7) to transfer state deadline
pub const SELECT_TIMEOUT: Duration = Duration::from_millis(1);

/// Switch (CMD6) back to transfer state deadline
pub const SWITCH_TIMEOUT: Duration = Duration::from_millis(500);

/// eMMC device reset to pre-idle settle time
pub const MMC_SETTLE_DELAY: Duration = Duration::from_millis(1);

/// Deadline started on a clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    start: Duration,
    timeout: Duration,
}

impl Deadline {
    /// Start a deadline of `timeout` from now
    pub fn start<C: Clock>(clock: &C, timeout: Duration) -> Self {
        Self {
            start: clock.now(),
            timeout,
        }
    }

    /// Time elapsed since the deadline was started
    pub fn elapsed<C: Clock>(&self, clock: &C) -> Duration {
        clock.now().saturating_sub(self.start)
    }

    /// Whether more than `timeout` has elapsed
    pub fn expired<C: Clock>(&self, clock: &C) -> bool {
        self.elapsed(clock) > self.timeout
    }
}

// =============================================================================
// TESTS
// =============================================================================
