//! Kestrel Hardware Abstraction Layer
//!
//! This crate defines the two capabilities the scheduling and framing core
//! needs from a board: a monotonic clock and a byte transport. Chip or host
//! specific crates implement them, so the same threads and protocol stacks
//! run on a microcontroller, a POSIX host, or a simulation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Application (kestrel-sim, firmware)    │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │ kestrel-core  │       │   kestrel-    │
//! │  (scheduler)  │       │   protocol    │
//! └───────────────┘       └───────────────┘
//!         │                       │
//!         └───────────┬───────────┘
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  kestrel-hal (this crate - traits)      │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  kestrel-hal-host, chip HALs            │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Traits
//!
//! - [`time::TimeSource`] - Monotonic ms/us clock with blocking delay
//! - [`link::LinkTx`], [`link::LinkRx`] - Byte-stream transport

#![no_std]
#![deny(unsafe_code)]

pub mod error;
pub mod link;
pub mod time;

// Re-export key traits at crate root for convenience
pub use error::ErrorCode;
pub use link::{ComLink, LinkRx, LinkTx};
pub use time::TimeSource;
