//! Monotonic time abstractions
//!
//! The scheduler only needs "what time is it" and "wait a bit". The host
//! platform decides what that means: a SysTick counter, a POSIX clock, or
//! a simulation stepper advanced by tests.

/// Monotonic clock with blocking delay
///
/// Millisecond readings wrap at `u32::MAX` (about 49.7 days); consumers
/// compare timestamps with wrapping arithmetic.
pub trait TimeSource {
    /// Milliseconds since an arbitrary, fixed origin
    fn now_ms(&self) -> u32;

    /// Microseconds since the same origin
    fn now_us(&self) -> u64;

    /// Busy-wait or sleep for `us` microseconds
    fn delay_us(&self, us: u32);

    /// Busy-wait or sleep for `ms` milliseconds
    fn delay_ms(&self, ms: u32) {
        for _ in 0..ms {
            self.delay_us(1000);
        }
    }

    /// Milliseconds elapsed since `since`, tolerant of wraparound
    fn elapsed_ms(&self, since: u32) -> u32 {
        self.now_ms().wrapping_sub(since)
    }
}

impl<T: TimeSource + ?Sized> TimeSource for &T {
    fn now_ms(&self) -> u32 {
        (**self).now_ms()
    }

    fn now_us(&self) -> u64 {
        (**self).now_us()
    }

    fn delay_us(&self, us: u32) {
        (**self).delay_us(us)
    }

    fn delay_ms(&self, ms: u32) {
        (**self).delay_ms(ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::cell::Cell;

    struct Counter {
        us: Cell<u64>,
    }

    impl TimeSource for Counter {
        fn now_ms(&self) -> u32 {
            (self.us.get() / 1000) as u32
        }

        fn now_us(&self) -> u64 {
            self.us.get()
        }

        fn delay_us(&self, us: u32) {
            self.us.set(self.us.get() + us as u64);
        }
    }

    #[test]
    fn test_default_delay_ms_advances_clock() {
        let clock = Counter { us: Cell::new(0) };
        clock.delay_ms(25);
        assert_eq!(clock.now_ms(), 25);
        assert_eq!(clock.now_us(), 25_000);
    }

    #[test]
    fn test_elapsed_ms_wraps() {
        let clock = Counter {
            us: Cell::new(5 * 1000),
        };
        // Reading taken just before the 32-bit millisecond counter wrapped
        let since = u32::MAX - 4;
        assert_eq!(clock.elapsed_ms(since), 10);
    }

    #[test]
    fn test_reference_forwarding() {
        let clock = Counter { us: Cell::new(0) };
        let by_ref = &clock;
        by_ref.delay_us(1500);
        assert_eq!(clock.now_ms(), 1);
    }
}
