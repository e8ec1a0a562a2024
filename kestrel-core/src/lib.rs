//! Board-agnostic scheduling core for Kestrel
//!
//! This crate contains the execution primitives every Kestrel board shares,
//! independent of the silicon underneath:
//!
//! - Bounded byte staging buffers ([`buffer::ByteArray`])
//! - Cooperative mutex and wait-condition ([`sync`])
//! - Bounded FIFO queue with blocking dequeue ([`queue::Queue`])
//! - Periodic and aperiodic threads ([`thread`])
//! - The cooperative run-loop ([`scheduler::Scheduler`])
//! - With the `std` feature, an OS-thread-backed model ([`os`])
//!
//! # Concurrency models
//!
//! On microcontrollers there is one execution context. Threads are slots the
//! scheduler multiplexes onto it, and a blocking call (delay, blocking
//! dequeue, mutex wait) re-enters the scheduler so other threads keep
//! running. On POSIX-class hosts the `os` module maps each thread onto a
//! native thread and the primitives onto `std::sync`, preserving the same
//! external contract.

#![cfg_attr(not(feature = "std"), no_std)]
#![deny(unsafe_code)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod buffer;
pub mod config;
pub mod queue;
pub mod scheduler;
pub mod sync;
pub mod thread;

#[cfg(feature = "std")]
pub mod os;

pub use buffer::{ByteArray, ByteReader};
pub use config::{SchedulerConfig, ThreadConfig};
pub use kestrel_hal::ErrorCode;
pub use queue::Queue;
pub use scheduler::{Context, Scheduler, SchedulerStats, ThreadFn};
pub use sync::{BusyWait, Mutex, MutexGuard, WaitCondition, Yield};
pub use thread::{ThreadHandle, ThreadState};
