//! OS-thread-backed execution model
//!
//! The same contract as the cooperative model for hosts with a native thread
//! API. Every registered thread gets its own `std::thread` running a periodic
//! loop against the shared [`TimeSource`]; the lock, wait-condition and queue
//! map onto `std::sync::{Mutex, Condvar}`.
//!
//! Differences from the cooperative model:
//!
//! - `delay_ms` inside a callback is a plain sleep, nothing is re-entered.
//! - Threads really run concurrently, so anything they share must be `Sync`.
//! - A thread that cannot be spawned is reported as [`ErrorCode::Resource`]
//!   instead of halting.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use kestrel_hal::{ErrorCode, TimeSource};

use crate::config::{SchedulerConfig, ThreadConfig};
use crate::sync::Yield;
use crate::thread::{ThreadHandle, ThreadState, ThreadTiming};

/// A panicking thread must not wedge the others, so poison is ignored
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// Lock
// ============================================================================

/// Binary lock backed by `std::sync::Mutex`
#[derive(Debug, Default)]
pub struct OsMutex {
    inner: Mutex<()>,
}

impl OsMutex {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(()),
        }
    }

    /// Take the lock, blocking the calling thread until it is free
    pub fn lock(&self) -> OsMutexGuard<'_> {
        OsMutexGuard {
            _guard: lock(&self.inner),
        }
    }

    /// Take the lock if it is free, [`ErrorCode::Busy`] otherwise
    pub fn try_lock(&self) -> Result<OsMutexGuard<'_>, ErrorCode> {
        match self.inner.try_lock() {
            Ok(guard) => Ok(OsMutexGuard { _guard: guard }),
            Err(TryLockError::Poisoned(poisoned)) => Ok(OsMutexGuard {
                _guard: poisoned.into_inner(),
            }),
            Err(TryLockError::WouldBlock) => Err(ErrorCode::Busy),
        }
    }
}

/// Held [`OsMutex`]; releases it on drop
#[derive(Debug)]
#[must_use = "the mutex is released as soon as the guard is dropped"]
pub struct OsMutexGuard<'a> {
    _guard: MutexGuard<'a, ()>,
}

// ============================================================================
// Wait condition
// ============================================================================

/// Signal/wait rendezvous backed by a `Condvar`
///
/// Like the cooperative [`WaitCondition`](crate::sync::WaitCondition), a
/// signal raised with no waiter is kept for the next wait.
#[derive(Debug, Default)]
pub struct OsWaitCondition {
    signaled: Mutex<bool>,
    cond: Condvar,
}

impl OsWaitCondition {
    pub const fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Raise the signal and wake one waiter
    pub fn signal(&self) {
        *lock(&self.signaled) = true;
        self.cond.notify_one();
    }

    /// Consume a pending signal without blocking
    pub fn try_wait(&self) -> bool {
        core::mem::replace(&mut *lock(&self.signaled), false)
    }

    /// Block until the signal is raised, then consume it
    pub fn wait(&self) {
        let mut signaled = lock(&self.signaled);
        while !*signaled {
            signaled = self
                .cond
                .wait(signaled)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *signaled = false;
    }

    pub fn is_signaled(&self) -> bool {
        *lock(&self.signaled)
    }

    pub fn reset(&self) {
        *lock(&self.signaled) = false;
    }
}

// ============================================================================
// Queue
// ============================================================================

struct QueueState<T> {
    items: VecDeque<T>,
    generation: u32,
}

/// Bounded FIFO of `T` shared between OS threads
pub struct OsQueue<T, const N: usize> {
    state: Mutex<QueueState<T>>,
    not_empty: Condvar,
}

impl<T, const N: usize> OsQueue<T, N> {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::with_capacity(N),
                generation: 0,
            }),
            not_empty: Condvar::new(),
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        lock(&self.state).items.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.state).items.is_empty()
    }

    /// Append at the back, or hand the value back if the queue is full
    pub fn enqueue(&self, value: T) -> Result<(), T> {
        let mut state = lock(&self.state);
        if state.items.len() >= N {
            return Err(value);
        }
        state.items.push_back(value);
        drop(state);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Pop the oldest item without blocking
    pub fn dequeue(&self) -> Option<T> {
        lock(&self.state).items.pop_front()
    }

    /// Pop the oldest item, blocking until one arrives
    ///
    /// Returns `None` if the queue is cleared while waiting.
    pub fn dequeue_blocking(&self) -> Option<T> {
        let mut state = lock(&self.state);
        let generation = state.generation;
        loop {
            if let Some(value) = state.items.pop_front() {
                return Some(value);
            }
            if state.generation != generation {
                return None;
            }
            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Drop every item and release all blocked consumers empty-handed
    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.items.clear();
        state.generation = state.generation.wrapping_add(1);
        drop(state);
        self.not_empty.notify_all();
    }
}

impl<T, const N: usize> Default for OsQueue<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// Thread callback for the OS model
pub type OsThreadFn<C> = Box<dyn FnMut(&mut OsContext<C>) + Send + 'static>;

/// Per-thread state visible from every thread
#[derive(Debug, Default)]
struct ThreadShared {
    enabled: AtomicBool,
    running: AtomicBool,
    runs: AtomicU32,
}

impl ThreadShared {
    fn state(&self) -> ThreadState {
        if !self.enabled.load(Ordering::Acquire) {
            ThreadState::Disabled
        } else if self.running.load(Ordering::Acquire) {
            ThreadState::Running
        } else {
            ThreadState::Enabled
        }
    }
}

type ThreadTable = Arc<[Arc<ThreadShared>]>;

struct PendingThread<C> {
    config: ThreadConfig,
    callback: OsThreadFn<C>,
}

/// Scheduler running every thread on its own OS thread
///
/// Threads are registered first and then started together with
/// [`OsScheduler::start`]. Dropping the scheduler stops and joins them.
pub struct OsScheduler<C: TimeSource + Clone + Send + 'static> {
    clock: C,
    config: SchedulerConfig,
    slots: Vec<Arc<ThreadShared>>,
    pending: Vec<PendingThread<C>>,
    workers: Vec<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl<C: TimeSource + Clone + Send + 'static> OsScheduler<C> {
    pub fn new(clock: C) -> Self {
        Self::with_config(clock, SchedulerConfig::default())
    }

    pub fn with_config(clock: C, config: SchedulerConfig) -> Self {
        Self {
            clock,
            config,
            slots: Vec::new(),
            pending: Vec::new(),
            workers: Vec::new(),
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Register a thread; only possible before [`OsScheduler::start`]
    pub fn add_thread<F>(&mut self, config: ThreadConfig, callback: F) -> Result<ThreadHandle, ErrorCode>
    where
        F: FnMut(&mut OsContext<C>) + Send + 'static,
    {
        if self.is_started() {
            return Err(ErrorCode::Busy);
        }
        let id = u8::try_from(self.slots.len()).map_err(|_| ErrorCode::BufferFull)?;

        let shared = Arc::new(ThreadShared::default());
        shared.enabled.store(config.start_enabled, Ordering::Release);
        self.slots.push(shared);
        self.pending.push(PendingThread {
            config,
            callback: Box::new(callback),
        });

        debug!("os thread {} registered: period {} ms", id, config.period_ms);
        Ok(ThreadHandle(id))
    }

    pub fn set_enabled(&self, handle: ThreadHandle, enabled: bool) -> Result<(), ErrorCode> {
        let slot = self
            .slots
            .get(handle.index())
            .ok_or(ErrorCode::ParameterInvalid)?;
        slot.enabled.store(enabled, Ordering::Release);
        Ok(())
    }

    pub fn thread_state(&self, handle: ThreadHandle) -> Option<ThreadState> {
        self.slots.get(handle.index()).map(|s| s.state())
    }

    /// Number of times a thread's callback has been started
    pub fn run_count(&self, handle: ThreadHandle) -> Option<u32> {
        self.slots
            .get(handle.index())
            .map(|s| s.runs.load(Ordering::Acquire))
    }

    pub fn thread_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_started(&self) -> bool {
        !self.workers.is_empty()
    }

    /// Spawn one OS thread per registered thread
    ///
    /// If any spawn fails, the threads already started are stopped again and
    /// [`ErrorCode::Resource`] is returned.
    pub fn start(&mut self) -> Result<(), ErrorCode> {
        if self.is_started() {
            return Err(ErrorCode::Busy);
        }
        self.stop.store(false, Ordering::Release);
        let table: ThreadTable = self.slots.iter().cloned().collect();

        for (index, pending) in core::mem::take(&mut self.pending).into_iter().enumerate() {
            let worker = Worker {
                timing: ThreadTiming::new(&pending.config.disabled(), self.clock.now_ms()),
                shared: table[index].clone(),
                callback: pending.callback,
                idle_step_us: self.config.idle_step_us,
                ctx: OsContext {
                    handle: ThreadHandle(index as u8),
                    clock: self.clock.clone(),
                    table: table.clone(),
                    stop: self.stop.clone(),
                },
            };

            let spawned = thread::Builder::new()
                .name(format!("kestrel-{index}"))
                .spawn(move || worker.run());
            match spawned {
                Ok(join) => self.workers.push(join),
                Err(_) => {
                    error!("failed to spawn os thread {}", index);
                    self.shutdown();
                    return Err(ErrorCode::Resource);
                }
            }
        }

        info!("os scheduler started {} threads", self.workers.len());
        Ok(())
    }

    /// Ask every thread to exit after its current run, without waiting
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    /// Stop every thread and wait for it to exit
    pub fn shutdown(&mut self) {
        self.shutdown_waking(|| {});
    }

    /// Stop every thread, calling `wake` until each one has exited
    ///
    /// For threads that may be parked in a blocking call such as
    /// [`OsQueue::dequeue_blocking`]; `wake` is typically the queue's
    /// [`OsQueue::clear`].
    pub fn shutdown_waking(&mut self, mut wake: impl FnMut()) {
        self.request_stop();
        let step = Duration::from_micros(u64::from(self.config.idle_step_us.max(1)));
        for (index, join) in self.workers.drain(..).enumerate() {
            while !join.is_finished() {
                wake();
                thread::sleep(step);
            }
            if join.join().is_err() {
                warn!("os thread {} panicked", index);
            }
        }
    }
}

impl<C: TimeSource + Clone + Send + 'static> Drop for OsScheduler<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker<C> {
    timing: ThreadTiming,
    shared: Arc<ThreadShared>,
    callback: OsThreadFn<C>,
    idle_step_us: u32,
    ctx: OsContext<C>,
}

impl<C: TimeSource> Worker<C> {
    fn run(mut self) {
        while !self.ctx.stop.load(Ordering::Acquire) {
            let now = self.ctx.clock.now_ms();

            let wanted = self.shared.enabled.load(Ordering::Acquire);
            if wanted != self.timing.enabled {
                self.timing.set_enabled(wanted, now);
            }

            if !self.timing.is_call_time(now) {
                let elapsed = now.wrapping_sub(self.timing.last_run_ms);
                let until_due_us = self
                    .timing
                    .period_ms
                    .saturating_sub(elapsed)
                    .saturating_mul(1000);
                let step = if self.timing.enabled {
                    until_due_us.clamp(1, self.idle_step_us.max(1))
                } else {
                    self.idle_step_us
                };
                self.ctx.clock.delay_us(step);
                continue;
            }

            self.timing.begin_run(now);
            self.shared.running.store(true, Ordering::Release);
            self.shared.runs.fetch_add(1, Ordering::AcqRel);
            (self.callback)(&mut self.ctx);
            self.shared.running.store(false, Ordering::Release);
            self.timing.end_run();

            if self.timing.period_ms == 0 {
                thread::yield_now();
            }
        }
        trace!("os thread {} exiting", self.ctx.handle.index());
    }
}

/// Handle passed to a callback running on an OS thread
pub struct OsContext<C> {
    handle: ThreadHandle,
    clock: C,
    table: ThreadTable,
    stop: Arc<AtomicBool>,
}

impl<C: TimeSource> OsContext<C> {
    pub fn handle(&self) -> ThreadHandle {
        self.handle
    }

    pub fn now_ms(&self) -> u32 {
        self.clock.now_ms()
    }

    /// Sleep the calling OS thread
    pub fn delay_ms(&mut self, ms: u32) {
        self.clock.delay_ms(ms);
    }

    pub fn set_enabled(&mut self, handle: ThreadHandle, enabled: bool) -> Result<(), ErrorCode> {
        let slot = self
            .table
            .get(handle.index())
            .ok_or(ErrorCode::ParameterInvalid)?;
        slot.enabled.store(enabled, Ordering::Release);
        Ok(())
    }

    pub fn thread_state(&self, handle: ThreadHandle) -> Option<ThreadState> {
        self.table.get(handle.index()).map(|s| s.state())
    }

    /// True once the scheduler is shutting down
    pub fn is_stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }
}

impl<C: TimeSource> Yield for OsContext<C> {
    fn yield_now(&mut self) {
        thread::yield_now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_mutex_try_lock_busy() {
        let mutex = OsMutex::new();
        let guard = mutex.lock();
        assert_eq!(mutex.try_lock().err(), Some(ErrorCode::Busy));
        drop(guard);
        assert!(mutex.try_lock().is_ok());
    }

    #[test]
    fn test_os_wait_condition_remembers_signal() {
        let cond = OsWaitCondition::new();
        cond.signal();
        assert!(cond.is_signaled());
        cond.wait();
        assert!(!cond.try_wait());
    }

    #[test]
    fn test_os_queue_overflow_returns_value() {
        let queue: OsQueue<u8, 2> = OsQueue::new();
        queue.enqueue(1).unwrap();
        queue.enqueue(2).unwrap();
        assert_eq!(queue.enqueue(3), Err(3));
        assert_eq!(queue.dequeue(), Some(1));
        assert_eq!(queue.dequeue(), Some(2));
        assert_eq!(queue.dequeue(), None);
    }
}
