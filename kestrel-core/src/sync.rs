//! Cooperative synchronization primitives
//!
//! With a single execution context there is nothing to preempt the holder
//! of a lock, so a [`Mutex`] and a [`WaitCondition`] reduce to atomic flags.
//! What makes them useful is that a thread can hold a lock, or wait for a
//! signal, across a point where it yields back to the scheduler. Waiting is
//! done through the [`Yield`] trait so other threads keep running meanwhile.
//!
//! The flags are `portable-atomic` so the same code works on cores without
//! native compare-and-swap and from interrupt handlers.

use portable_atomic::{AtomicBool, Ordering};

use kestrel_hal::TimeSource;

/// Something a blocked caller can hand control to while it waits
///
/// The scheduler's [`Context`](crate::scheduler::Context) implements this
/// by running one pass over the other threads. [`BusyWait`] implements it
/// for code that runs outside any scheduler.
pub trait Yield {
    /// Give other work a chance to run, then return
    fn yield_now(&mut self);
}

/// Yield strategy for callers outside the scheduler: a short delay
#[derive(Debug, Clone, Copy)]
pub struct BusyWait<C> {
    clock: C,
    step_us: u32,
}

impl<C: TimeSource> BusyWait<C> {
    /// Wait `step_us` microseconds on every yield
    pub fn new(clock: C, step_us: u32) -> Self {
        Self { clock, step_us }
    }
}

impl<C: TimeSource> Yield for BusyWait<C> {
    fn yield_now(&mut self) {
        self.clock.delay_us(self.step_us);
    }
}

/// Binary lock
///
/// The lock carries no data of its own; it guards whatever the threads
/// sharing it agree it guards. Only the holder can release it: release
/// happens when the [`MutexGuard`] is dropped.
#[derive(Debug, Default)]
pub struct Mutex {
    locked: AtomicBool,
}

impl Mutex {
    /// Create an unlocked mutex
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Take the lock if it is free
    pub fn try_lock(&self) -> Option<MutexGuard<'_>> {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| MutexGuard { mutex: self })
    }

    /// Take the lock, yielding until it becomes free
    pub fn lock<Y: Yield + ?Sized>(&self, waiter: &mut Y) -> MutexGuard<'_> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            waiter.yield_now();
        }
    }

    /// Check if someone holds the lock
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }
}

/// Proof of holding a [`Mutex`]; releases it on drop
#[derive(Debug)]
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct MutexGuard<'a> {
    mutex: &'a Mutex,
}

impl Drop for MutexGuard<'_> {
    fn drop(&mut self) {
        self.mutex.locked.store(false, Ordering::Release);
    }
}

/// Signal/wait rendezvous
///
/// A signal raised while nobody waits is remembered until the next wait
/// consumes it, so a wake-up can never be lost between a check and a wait.
#[derive(Debug, Default)]
pub struct WaitCondition {
    signaled: AtomicBool,
}

impl WaitCondition {
    /// Create an unsignaled condition
    pub const fn new() -> Self {
        Self {
            signaled: AtomicBool::new(false),
        }
    }

    /// Raise the signal, waking one waiter
    pub fn signal(&self) {
        self.signaled.store(true, Ordering::Release);
    }

    /// Consume a pending signal without waiting
    ///
    /// Returns true if a signal was pending.
    pub fn try_wait(&self) -> bool {
        self.signaled.swap(false, Ordering::AcqRel)
    }

    /// Yield until the signal is raised, then consume it
    pub fn wait<Y: Yield + ?Sized>(&self, waiter: &mut Y) {
        while !self.try_wait() {
            waiter.yield_now();
        }
    }

    /// Check for a pending signal without consuming it
    pub fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    /// Drop any pending signal
    pub fn reset(&self) {
        self.signaled.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Yields a fixed number of times, running a side effect on the last one
    struct Countdown<'a> {
        remaining: u32,
        yields: u32,
        on_zero: &'a dyn Fn(),
    }

    impl Yield for Countdown<'_> {
        fn yield_now(&mut self) {
            self.yields += 1;
            if self.remaining > 0 {
                self.remaining -= 1;
                if self.remaining == 0 {
                    (self.on_zero)();
                }
            }
        }
    }

    #[test]
    fn test_try_lock_is_exclusive() {
        let mutex = Mutex::new();
        let guard = mutex.try_lock();
        assert!(guard.is_some());
        assert!(mutex.is_locked());
        assert!(mutex.try_lock().is_none());

        drop(guard);
        assert!(!mutex.is_locked());
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn test_lock_yields_until_released() {
        let mutex = Mutex::new();
        let held = core::cell::RefCell::new(mutex.try_lock());

        let release = || {
            held.borrow_mut().take();
        };
        let mut waiter = Countdown {
            remaining: 3,
            yields: 0,
            on_zero: &release,
        };

        let _guard = mutex.lock(&mut waiter);
        assert_eq!(waiter.yields, 3);
        assert!(mutex.is_locked());
    }

    #[test]
    fn test_signal_before_wait_is_not_lost() {
        let cond = WaitCondition::new();
        cond.signal();
        assert!(cond.is_signaled());

        let noop = || {};
        let mut waiter = Countdown {
            remaining: 0,
            yields: 0,
            on_zero: &noop,
        };
        cond.wait(&mut waiter);
        assert_eq!(waiter.yields, 0);
        assert!(!cond.is_signaled());
    }

    #[test]
    fn test_wait_yields_until_signal() {
        let cond = WaitCondition::new();
        let raise = || cond.signal();
        let mut waiter = Countdown {
            remaining: 2,
            yields: 0,
            on_zero: &raise,
        };
        cond.wait(&mut waiter);
        assert_eq!(waiter.yields, 2);
        assert!(!cond.try_wait());
    }

    #[test]
    fn test_reset_drops_pending_signal() {
        let cond = WaitCondition::new();
        cond.signal();
        cond.reset();
        assert!(!cond.try_wait());
    }
}
