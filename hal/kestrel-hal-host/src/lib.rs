//! Host-side HAL for Kestrel
//!
//! This crate provides `std` implementations of the `kestrel-hal` traits
//! for running the scheduler and protocol stack on a desktop OS:
//!
//! - [`clock::StdClock`] - wall-clock backed monotonic time
//! - [`clock::SimClock`] - simulation stepper, advanced explicitly or by delays
//! - [`link::MemoryLink`] - in-memory duplex byte channel
//!
//! # Usage
//!
//! Tests and the simulator build two connected link ends and a shared
//! simulated clock, then hand them to the scheduler and protocol objects
//! exactly as firmware would hand over a UART and a SysTick driver.

pub mod clock;
pub mod link;

pub use clock::{SimClock, StdClock};
pub use link::MemoryLink;
