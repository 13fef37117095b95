//! Wakeup messages and error types.

use core::fmt;

use crate::thread::Priority;

/// Message delivered to a thread when it leaves a wait state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Msg {
    /// Normal wakeup: the awaited condition was met.
    Ok,
    /// The wait timed out before anyone woke the thread.
    Timeout,
    /// The object was reset or broadcast while the thread waited.
    Reset,
}

impl Msg {
    pub fn is_ok(self) -> bool {
        self == Msg::Ok
    }
}

impl fmt::Display for Msg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Msg::Ok => f.write_str("ok"),
            Msg::Timeout => f.write_str("timeout"),
            Msg::Reset => f.write_str("reset"),
        }
    }
}

/// Failure of a pipe transfer that moved no bytes, or of a poisoned pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeError {
    /// Nothing could be transferred before the timeout elapsed.
    Timeout,
    /// The pipe was reset; transfers fail until it is resumed.
    Reset,
}

impl fmt::Display for PipeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipeError::Timeout => f.write_str("pipe operation timed out"),
            PipeError::Reset => f.write_str("pipe was reset"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PipeError {}

/// Errors reported while building the kernel or allocating kernel objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Priority outside the range usable by the requested thread.
    InvalidPriority { priority: Priority, reason: &'static str },
    /// Configuration value rejected at build time.
    InvalidConfig(&'static str),
    /// All thread slots are in use.
    ThreadLimit(usize),
    /// A pipe needs at least one byte of buffer.
    ZeroCapacity,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidPriority { priority, reason } => {
                write!(f, "invalid thread priority {}: {reason}", priority.0)
            }
            Self::InvalidConfig(reason) => write!(f, "invalid kernel configuration: {reason}"),
            Self::ThreadLimit(max) => write!(f, "all {max} thread slots are in use"),
            Self::ZeroCapacity => f.write_str("pipe capacity must be non-zero"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for KernelError {}
