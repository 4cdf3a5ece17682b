//! # Monotonic clock
//!
//! Busy-wait loops in the protocol engine are bounded by wall-clock
//! deadlines read from a [`Clock`]. Boards back it with a free-running
//! hardware timer; tests back it with a manually advanced counter.

use core::time::Duration;

/// Monotonic time source
pub trait Clock {
    /// Time elapsed since an arbitrary fixed origin
    fn now(&self) -> Duration;

    /// Block for at least `duration`
    fn delay(&self, duration: Duration) {
        let start = self.now();

        while self.now().saturating_sub(start) < duration {
            core::hint::spin_loop();
        }
    }
}

impl<T: Clock + ?Sized> Clock for &T {
    fn now(&self) -> Duration {
        (**self).now()
    }

    fn delay(&self, duration: Duration) {
        (**self).delay(duration)
    }
}

// =============================================================================
// TESTS
// =============================================================================
