//! Cooperative thread scheduler
//!
//! The scheduler owns a fixed table of threads and a clock. Each call to
//! [`Scheduler::check_threads`] walks the table in registration order and
//! runs every thread that is due, one callback at a time, each to
//! completion. When a pass finds nothing due the scheduler idles: it calls
//! the idle hook if one is installed (e.g. a `wfi` wrapper), otherwise it
//! waits one idle step on the clock.
//!
//! Callbacks receive a [`Context`]. Blocking inside a callback (a delay, a
//! blocking dequeue, waiting on a mutex) goes through the context, which
//! re-enters `check_threads` so the other threads keep their schedule.
//! The blocked thread is marked running for the whole time, so it is never
//! dispatched a second time on top of itself.
//!
//! A callback that never returns starves everything else. Nothing here
//! guards against that.

use heapless::Vec;
use kestrel_hal::{ErrorCode, TimeSource};

use crate::config::{SchedulerConfig, ThreadConfig};
use crate::sync::Yield;
use crate::thread::{ThreadHandle, ThreadState, ThreadTiming};

/// Thread callback as stored by the scheduler
pub type ThreadFn<'a> = &'a mut (dyn FnMut(&mut Context<'_>) + 'a);

/// Idle hook invoked when a pass ran nothing
pub type IdleFn<'a> = &'a mut (dyn FnMut() + 'a);

/// Scheduler counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SchedulerStats {
    /// Calls to `check_threads`, nested ones included
    pub passes: u32,
    /// Thread callbacks executed
    pub runs: u32,
    /// Times the scheduler idled
    pub idles: u32,
}

struct ThreadSlot<'a> {
    timing: ThreadTiming,
    /// Taken out while the callback executes
    callback: Option<ThreadFn<'a>>,
}

/// Operations a running callback may perform on its scheduler
///
/// Object-safe so a [`Context`] does not carry the scheduler's clock type
/// or table size.
trait Dispatch {
    fn now_ms(&self) -> u32;
    fn check_threads(&mut self) -> bool;
    fn idle(&mut self);
    fn set_enabled(&mut self, handle: ThreadHandle, enabled: bool) -> Result<(), ErrorCode>;
    fn thread_state(&self, handle: ThreadHandle) -> Option<ThreadState>;
}

/// Cooperative scheduler with room for `N` threads
pub struct Scheduler<'a, C: TimeSource, const N: usize> {
    clock: C,
    config: SchedulerConfig,
    threads: Vec<ThreadSlot<'a>, N>,
    idle_hook: Option<IdleFn<'a>>,
    stats: SchedulerStats,
}

impl<'a, C: TimeSource, const N: usize> Scheduler<'a, C, N> {
    /// Create an empty scheduler with default configuration
    pub fn new(clock: C) -> Self {
        Self::with_config(clock, SchedulerConfig::default())
    }

    /// Create an empty scheduler
    pub fn with_config(clock: C, config: SchedulerConfig) -> Self {
        Self {
            clock,
            config,
            threads: Vec::new(),
            idle_hook: None,
            stats: SchedulerStats::default(),
        }
    }

    /// Register a thread
    ///
    /// Threads are dispatched in registration order. Fails with
    /// [`ErrorCode::BufferFull`] when all `N` slots are taken.
    pub fn add_thread(
        &mut self,
        config: ThreadConfig,
        callback: ThreadFn<'a>,
    ) -> Result<ThreadHandle, ErrorCode> {
        let index = self.threads.len();
        let id = u8::try_from(index).map_err(|_| ErrorCode::BufferFull)?;
        let slot = ThreadSlot {
            timing: ThreadTiming::new(&config, self.clock.now_ms()),
            callback: Some(callback),
        };
        if self.threads.push(slot).is_err() {
            warn!("thread table full ({} slots)", N);
            return Err(ErrorCode::BufferFull);
        }

        debug!(
            "thread {} registered: period {} ms, enabled {}",
            id, config.period_ms, config.start_enabled
        );
        Ok(ThreadHandle(id))
    }

    /// Install a hook to call when a pass finds nothing to do
    pub fn set_idle_hook(&mut self, hook: IdleFn<'a>) {
        self.idle_hook = Some(hook);
    }

    /// Enable or disable a thread
    pub fn set_enabled(&mut self, handle: ThreadHandle, enabled: bool) -> Result<(), ErrorCode> {
        let now = self.clock.now_ms();
        let slot = self
            .threads
            .get_mut(handle.index())
            .ok_or(ErrorCode::ParameterInvalid)?;
        slot.timing.set_enabled(enabled, now);
        Ok(())
    }

    /// Current state of a thread
    pub fn thread_state(&self, handle: ThreadHandle) -> Option<ThreadState> {
        self.threads.get(handle.index()).map(|s| s.timing.state())
    }

    /// Number of times a thread's callback has been started
    pub fn run_count(&self, handle: ThreadHandle) -> Option<u32> {
        self.threads.get(handle.index()).map(|s| s.timing.run_count)
    }

    /// Number of registered threads
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    /// The scheduler's clock
    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Counters since creation
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Run one pass over all threads
    ///
    /// Returns true if at least one callback ran.
    pub fn check_threads(&mut self) -> bool {
        self.stats.passes = self.stats.passes.wrapping_add(1);
        let mut ran = false;
        for index in 0..self.threads.len() {
            if self.dispatch(index) {
                ran = true;
            }
        }
        ran
    }

    /// Run a single thread if it is due
    fn dispatch(&mut self, index: usize) -> bool {
        let now = self.clock.now_ms();
        let Some(slot) = self.threads.get_mut(index) else {
            return false;
        };
        if !slot.timing.is_call_time(now) {
            return false;
        }
        let Some(callback) = slot.callback.take() else {
            return false;
        };
        slot.timing.begin_run(now);

        trace!("thread {} run at {} ms", index, now);
        {
            let mut ctx = Context {
                system: self,
                current: ThreadHandle(index as u8),
            };
            callback(&mut ctx);
        }

        if let Some(slot) = self.threads.get_mut(index) {
            slot.callback = Some(callback);
            slot.timing.end_run();
        }
        self.stats.runs = self.stats.runs.wrapping_add(1);
        true
    }

    /// Idle once: the hook if installed, otherwise one idle step on the clock
    pub fn idle(&mut self) {
        self.stats.idles = self.stats.idles.wrapping_add(1);
        match self.idle_hook.as_mut() {
            Some(hook) => hook(),
            None => self.clock.delay_us(self.config.idle_step_us),
        }
    }

    /// Run threads for `ms` milliseconds of clock time
    pub fn run_for(&mut self, ms: u32) {
        let start = self.clock.now_ms();
        while self.clock.now_ms().wrapping_sub(start) < ms {
            if !self.check_threads() {
                self.idle();
            }
        }
    }

    /// Run threads until `done` returns true or `timeout_ms` elapses
    ///
    /// Returns whether `done` became true.
    pub fn run_until(&mut self, timeout_ms: u32, mut done: impl FnMut() -> bool) -> bool {
        let start = self.clock.now_ms();
        loop {
            if done() {
                return true;
            }
            if self.clock.now_ms().wrapping_sub(start) >= timeout_ms {
                return false;
            }
            if !self.check_threads() {
                self.idle();
            }
        }
    }

    /// Wait `ms` milliseconds while keeping threads running
    ///
    /// For code outside any thread; callbacks use [`Context::delay_ms`].
    pub fn delay_ms(&mut self, ms: u32) {
        self.run_for(ms);
    }

    /// Run forever
    pub fn run(&mut self) -> ! {
        info!("scheduler running {} threads", self.threads.len());
        loop {
            if !self.check_threads() {
                self.idle();
            }
        }
    }
}

impl<C: TimeSource, const N: usize> Dispatch for Scheduler<'_, C, N> {
    fn now_ms(&self) -> u32 {
        self.clock.now_ms()
    }

    fn check_threads(&mut self) -> bool {
        Scheduler::check_threads(self)
    }

    fn idle(&mut self) {
        Scheduler::idle(self)
    }

    fn set_enabled(&mut self, handle: ThreadHandle, enabled: bool) -> Result<(), ErrorCode> {
        Scheduler::set_enabled(self, handle, enabled)
    }

    fn thread_state(&self, handle: ThreadHandle) -> Option<ThreadState> {
        Scheduler::thread_state(self, handle)
    }
}

/// Handle passed to a running thread callback
pub struct Context<'s> {
    system: &'s mut dyn Dispatch,
    current: ThreadHandle,
}

impl Context<'_> {
    /// Handle of the thread this callback belongs to
    pub fn handle(&self) -> ThreadHandle {
        self.current
    }

    /// Current scheduler time in milliseconds
    pub fn now_ms(&self) -> u32 {
        self.system.now_ms()
    }

    /// Wait `ms` milliseconds, running the other threads meanwhile
    pub fn delay_ms(&mut self, ms: u32) {
        let start = self.system.now_ms();
        while self.system.now_ms().wrapping_sub(start) < ms {
            self.yield_now();
        }
    }

    /// Enable or disable any thread, including the current one
    ///
    /// Disabling the current thread takes effect once its callback returns.
    pub fn set_enabled(&mut self, handle: ThreadHandle, enabled: bool) -> Result<(), ErrorCode> {
        self.system.set_enabled(handle, enabled)
    }

    /// State of any thread
    pub fn thread_state(&self, handle: ThreadHandle) -> Option<ThreadState> {
        self.system.thread_state(handle)
    }
}

impl Yield for Context<'_> {
    /// One nested pass over the other threads, idling if none was due
    fn yield_now(&mut self) {
        if !self.system.check_threads() {
            self.system.idle();
        }
    }
}
