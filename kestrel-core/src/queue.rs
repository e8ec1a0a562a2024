//! Bounded FIFO queue with blocking dequeue
//!
//! Moves values from a producer (an interrupt handler or another thread) to
//! a consumer thread without losing or duplicating items. The storage is a
//! `heapless::Deque` behind an `embassy-sync` blocking mutex, so the raw
//! mutex type decides whether producers may live in interrupt context
//! (`CriticalSectionRawMutex`) or only in thread mode (`NoopRawMutex`,
//! `ThreadModeRawMutex`).
//!
//! Overflow policy is fail, never overwrite: a full queue hands the value
//! back to the caller.

use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::RawMutex;
use embassy_sync::blocking_mutex::Mutex as BlockingMutex;
use heapless::Deque;
use portable_atomic::{AtomicU32, Ordering};

use crate::sync::{WaitCondition, Yield};

/// Fixed-capacity FIFO of `T`
pub struct Queue<M: RawMutex, T, const N: usize> {
    items: BlockingMutex<M, RefCell<Deque<T, N>>>,
    not_empty: WaitCondition,
    /// Bumped by every `clear()` so blocked consumers can tell they were released
    generation: AtomicU32,
}

impl<M: RawMutex, T, const N: usize> Queue<M, T, N> {
    /// Create an empty queue
    pub const fn new() -> Self {
        Self {
            items: BlockingMutex::new(RefCell::new(Deque::new())),
            not_empty: WaitCondition::new(),
            generation: AtomicU32::new(0),
        }
    }

    /// Maximum number of items
    pub const fn capacity(&self) -> usize {
        N
    }

    /// Number of items currently queued
    pub fn len(&self) -> usize {
        self.items.lock(|items| items.borrow().len())
    }

    /// Check if the queue holds nothing
    pub fn is_empty(&self) -> bool {
        self.items.lock(|items| items.borrow().is_empty())
    }

    /// Check if another enqueue would fail
    pub fn is_full(&self) -> bool {
        self.items.lock(|items| items.borrow().is_full())
    }

    /// Append `value` at the back
    ///
    /// Fails with the value handed back if the queue is at capacity; the
    /// queued items and their order are untouched in that case. On success
    /// a blocked consumer is woken.
    pub fn enqueue(&self, value: T) -> Result<(), T> {
        self.items
            .lock(|items| items.borrow_mut().push_back(value))?;
        self.not_empty.signal();
        Ok(())
    }

    /// Pop the oldest item, if any
    pub fn dequeue(&self) -> Option<T> {
        self.items.lock(|items| items.borrow_mut().pop_front())
    }

    /// Pop the oldest item, yielding until one arrives
    ///
    /// Returns `None` only if the queue is cleared while waiting; that is
    /// how a consumer loop learns it should shut down.
    pub fn dequeue_blocking<Y: Yield + ?Sized>(&self, waiter: &mut Y) -> Option<T> {
        let generation = self.generation.load(Ordering::Acquire);
        loop {
            if let Some(value) = self.dequeue() {
                return Some(value);
            }
            if self.generation.load(Ordering::Acquire) != generation {
                return None;
            }
            if !self.not_empty.try_wait() {
                waiter.yield_now();
            }
        }
    }

    /// Drop every queued item and release blocked consumers empty-handed
    pub fn clear(&self) {
        self.items.lock(|items| items.borrow_mut().clear());
        self.generation.fetch_add(1, Ordering::AcqRel);
        self.not_empty.signal();
    }
}

impl<M: RawMutex, T: Clone, const N: usize> Queue<M, T, N> {
    /// Copy of the oldest item without removing it
    pub fn peek(&self) -> Option<T> {
        self.items.lock(|items| items.borrow().front().cloned())
    }
}

impl<M: RawMutex, T, const N: usize> Default for Queue<M, T, N> {
    fn default() -> Self {
        Self::new()
    }
}
