//! Clock sources and delays
//!
//! The NX2 bring-up sequence is a long chain of bounded polls, each with a
//! fixed microsecond delay between attempts. The host supplies a free-running
//! microsecond counter; busy-wait delays are derived from it the same way the
//! BCM2711 system timer derives them.
//!
//! ## Accuracy
//!
//! - Resolution: whatever the host counter provides (1 µs expected)
//! - Delays are a lower bound; the caller may be preempted by the host
//!
//! Hosts with a better primitive (a calibrated `udelay`, a scheduler sleep)
//! override [`Clock::delay_us`] directly.

/// Microsecond time source used by every bounded poll in the driver.
pub trait Clock {
    /// Current value of a monotonic microsecond counter.
    fn timestamp_us(&self) -> u64;

    /// Busy-wait for at least `microseconds`.
    fn delay_us(&self, microseconds: u64) {
        let start = self.timestamp_us();
        let target = start.wrapping_add(microseconds);

        // Counter wrap
        if target < start {
            while self.timestamp_us() >= start {}
        }

        while self.timestamp_us() < target {}
    }

    /// Delay for at least `milliseconds`.
    #[inline]
    fn delay_ms(&self, milliseconds: u64) {
        self.delay_us(milliseconds.saturating_mul(1000));
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    /// Counter that advances one microsecond per read
    struct TickingCounter {
        now: Cell<u64>,
    }

    impl Clock for TickingCounter {
        fn timestamp_us(&self) -> u64 {
            let now = self.now.get();
            self.now.set(now.wrapping_add(1));
            now
        }
    }

    #[test]
    fn test_delay_us_waits_for_target() {
        let clock = TickingCounter { now: Cell::new(0) };
        clock.delay_us(100);
        assert!(clock.now.get() >= 100);
    }

    #[test]
    fn test_delay_ms_scales() {
        let clock = TickingCounter { now: Cell::new(0) };
        clock.delay_ms(2);
        assert!(clock.now.get() >= 2000);
    }

    #[test]
    fn test_delay_survives_counter_wrap() {
        let clock = TickingCounter {
            now: Cell::new(u64::MAX - 10),
        };
        clock.delay_us(50);
        let now = clock.now.get();
        assert!(now >= 39 && now < 1000, "counter at {}", now);
    }
}
