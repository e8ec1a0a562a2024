//! Clock implementations for host builds

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kestrel_hal::TimeSource;

/// Monotonic clock backed by [`std::time::Instant`]
///
/// The origin is the moment of construction.
#[derive(Debug, Clone, Copy)]
pub struct StdClock {
    origin: Instant,
}

impl StdClock {
    /// Create a clock whose origin is now
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl TimeSource for StdClock {
    fn now_ms(&self) -> u32 {
        // Truncation gives the wrapping millisecond counter firmware has
        self.origin.elapsed().as_millis() as u32
    }

    fn now_us(&self) -> u64 {
        self.origin.elapsed().as_micros() as u64
    }

    fn delay_us(&self, us: u32) {
        std::thread::sleep(Duration::from_micros(us as u64));
    }

    fn delay_ms(&self, ms: u32) {
        std::thread::sleep(Duration::from_millis(ms as u64));
    }
}

/// Simulated clock
///
/// Time only moves when someone calls [`SimClock::advance_us`] or one of the
/// delay methods. Clones share the same counter, so a test can keep a handle
/// while the scheduler owns another.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    us: Arc<AtomicU64>,
}

impl SimClock {
    /// Create a clock at time zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a clock starting at `ms`
    pub fn starting_at_ms(ms: u64) -> Self {
        let clock = Self::new();
        clock.us.store(ms * 1000, Ordering::SeqCst);
        clock
    }

    /// Move time forward by `us` microseconds
    pub fn advance_us(&self, us: u64) {
        self.us.fetch_add(us, Ordering::SeqCst);
    }

    /// Move time forward by `ms` milliseconds
    pub fn advance_ms(&self, ms: u64) {
        self.advance_us(ms * 1000);
    }
}

impl TimeSource for SimClock {
    fn now_ms(&self) -> u32 {
        (self.us.load(Ordering::SeqCst) / 1000) as u32
    }

    fn now_us(&self) -> u64 {
        self.us.load(Ordering::SeqCst)
    }

    fn delay_us(&self, us: u32) {
        self.advance_us(us as u64);
    }

    fn delay_ms(&self, ms: u32) {
        self.advance_ms(ms as u64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_clock_clones_share_time() {
        let clock = SimClock::new();
        let handle = clock.clone();
        handle.advance_ms(42);
        assert_eq!(clock.now_ms(), 42);
        assert_eq!(clock.now_us(), 42_000);
    }

    #[test]
    fn test_sim_clock_delay_advances() {
        let clock = SimClock::starting_at_ms(10);
        clock.delay_us(2500);
        assert_eq!(clock.now_ms(), 12);
        clock.delay_ms(3);
        assert_eq!(clock.now_ms(), 15);
    }

    #[test]
    fn test_sim_clock_millis_wrap() {
        let clock = SimClock::starting_at_ms(u32::MAX as u64);
        let before = clock.now_ms();
        clock.advance_ms(2);
        assert_eq!(clock.elapsed_ms(before), 2);
    }

    #[test]
    fn test_std_clock_is_monotonic() {
        let clock = StdClock::new();
        let a = clock.now_us();
        clock.delay_us(200);
        let b = clock.now_us();
        assert!(b >= a + 200);
    }
}
