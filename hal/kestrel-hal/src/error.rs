//! Driver-level error codes
//!
//! Low-level drivers and the primitives built on them return these by value.
//! Nothing in the stack unwinds; callers branch on the code.

use core::fmt;

/// Error codes shared by drivers, queues and the scheduler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ErrorCode {
    /// An argument was out of range or inconsistent
    ParameterInvalid,
    /// The peripheral or object has not been enabled
    NotEnabled,
    /// No room left in a fixed-capacity buffer or table
    BufferFull,
    /// Not enough data available for the request
    BufferEmpty,
    /// Transport-level failure (framing, overrun, disconnected peer)
    Communication,
    /// Operation did not complete in time
    Timeout,
    /// Resource is held by someone else
    Busy,
    /// Operation is not supported by this implementation
    NotSupported,
    /// An operating-system resource could not be obtained
    Resource,
}

impl ErrorCode {
    /// Short static name, suitable for logs
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorCode::ParameterInvalid => "parameter invalid",
            ErrorCode::NotEnabled => "not enabled",
            ErrorCode::BufferFull => "buffer full",
            ErrorCode::BufferEmpty => "buffer empty",
            ErrorCode::Communication => "communication",
            ErrorCode::Timeout => "timeout",
            ErrorCode::Busy => "busy",
            ErrorCode::NotSupported => "not supported",
            ErrorCode::Resource => "resource unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
