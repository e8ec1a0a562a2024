//! Thread bookkeeping
//!
//! A thread here is a scheduling slot, not an OS thread: a callback plus the
//! timing state the scheduler needs to decide when to call it.
//!
//! ```text
//!  DISABLED ──enable──► ENABLED ──due──► RUNNING
//!     ▲                   ▲                │
//!     └────disable────────┴────returns─────┘
//! ```

use crate::config::ThreadConfig;

/// Identifies a registered thread (its registration index)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ThreadHandle(pub(crate) u8);

impl ThreadHandle {
    /// Registration index of the thread
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Externally visible thread state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ThreadState {
    /// Will not be dispatched until re-enabled
    Disabled,
    /// Waiting for its call time
    Enabled,
    /// Callback currently executing
    Running,
}

/// Timing and state for one thread slot
#[derive(Debug, Clone)]
pub(crate) struct ThreadTiming {
    pub period_ms: u32,
    pub enabled: bool,
    pub running: bool,
    /// Nominal time of the most recent (or virtual previous) run
    pub last_run_ms: u32,
    pub run_count: u32,
}

impl ThreadTiming {
    pub fn new(config: &ThreadConfig, now_ms: u32) -> Self {
        let mut timing = Self {
            period_ms: config.period_ms,
            enabled: false,
            running: false,
            last_run_ms: now_ms,
            run_count: 0,
        };
        if config.start_enabled {
            timing.set_enabled(true, now_ms);
        }
        timing
    }

    pub fn state(&self) -> ThreadState {
        if !self.enabled {
            ThreadState::Disabled
        } else if self.running {
            ThreadState::Running
        } else {
            ThreadState::Enabled
        }
    }

    /// Enabling a disabled thread makes it due immediately
    pub fn set_enabled(&mut self, enabled: bool, now_ms: u32) {
        if enabled && !self.enabled {
            self.last_run_ms = now_ms.wrapping_sub(self.period_ms);
        }
        self.enabled = enabled;
    }

    pub fn is_call_time(&self, now_ms: u32) -> bool {
        if !self.enabled || self.running {
            return false;
        }
        self.period_ms == 0 || now_ms.wrapping_sub(self.last_run_ms) >= self.period_ms
    }

    /// Mark the run as started and advance the nominal run time
    ///
    /// The nominal time moves by exactly one period, so the schedule does
    /// not drift with dispatch latency. If the thread has fallen a whole
    /// period or more behind, it resynchronizes to `now_ms` instead of
    /// bursting through the missed calls.
    pub fn begin_run(&mut self, now_ms: u32) {
        self.running = true;
        self.run_count = self.run_count.wrapping_add(1);

        if self.period_ms == 0 {
            self.last_run_ms = now_ms;
            return;
        }
        let next = self.last_run_ms.wrapping_add(self.period_ms);
        self.last_run_ms = if now_ms.wrapping_sub(next) >= self.period_ms {
            now_ms
        } else {
            next
        };
    }

    pub fn end_run(&mut self) {
        self.running = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enabled_thread_due_immediately() {
        let timing = ThreadTiming::new(&ThreadConfig::periodic(10), 100);
        assert_eq!(timing.state(), ThreadState::Enabled);
        assert!(timing.is_call_time(100));
    }

    #[test]
    fn test_disabled_thread_never_due() {
        let timing = ThreadTiming::new(&ThreadConfig::periodic(10).disabled(), 0);
        assert_eq!(timing.state(), ThreadState::Disabled);
        assert!(!timing.is_call_time(1_000));
    }

    #[test]
    fn test_periodic_schedule_does_not_drift() {
        let mut timing = ThreadTiming::new(&ThreadConfig::periodic(10), 0);
        timing.begin_run(0);
        timing.end_run();
        assert!(!timing.is_call_time(9));

        // Dispatched 3 ms late; the next call is still due at 20
        assert!(timing.is_call_time(13));
        timing.begin_run(13);
        timing.end_run();
        assert!(!timing.is_call_time(19));
        assert!(timing.is_call_time(20));
    }

    #[test]
    fn test_resync_after_long_stall() {
        let mut timing = ThreadTiming::new(&ThreadConfig::periodic(10), 0);
        timing.begin_run(0);
        timing.end_run();

        // Stalled for several periods: run once, then schedule from now
        timing.begin_run(57);
        timing.end_run();
        assert!(!timing.is_call_time(60));
        assert!(timing.is_call_time(67));
    }

    #[test]
    fn test_running_thread_not_due() {
        let mut timing = ThreadTiming::new(&ThreadConfig::aperiodic(), 0);
        assert!(timing.is_call_time(0));
        timing.begin_run(0);
        assert_eq!(timing.state(), ThreadState::Running);
        assert!(!timing.is_call_time(5));
        timing.end_run();
        assert!(timing.is_call_time(5));
    }

    #[test]
    fn test_reenable_resets_schedule() {
        let mut timing = ThreadTiming::new(&ThreadConfig::periodic(50), 0);
        timing.begin_run(0);
        timing.end_run();
        timing.set_enabled(false, 10);
        timing.set_enabled(true, 20);
        assert!(timing.is_call_time(20));
    }

    #[test]
    fn test_wraparound_period() {
        let start = u32::MAX - 5;
        let mut timing = ThreadTiming::new(&ThreadConfig::periodic(10), start);
        timing.begin_run(start);
        timing.end_run();
        assert!(!timing.is_call_time(start.wrapping_add(9)));
        assert!(timing.is_call_time(start.wrapping_add(10)));
    }
}
