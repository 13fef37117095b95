//! Kernel trace hook.
//!
//! With the `spy` feature the hook and record identifiers come from
//! `rtk_spy`. Without it the same shapes are defined here so the kernel can
//! still accept a hook.

#[cfg(feature = "spy")]
pub use rtk_spy::{records, TraceError, TraceEvent, TraceHook};

#[cfg(not(feature = "spy"))]
use crate::sync::Arc;

#[cfg(not(feature = "spy"))]
pub type TraceError = core::convert::Infallible;

#[cfg(not(feature = "spy"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEvent<'a> {
    pub record: u8,
    pub tick: u32,
    pub payload: &'a [u8],
}

#[cfg(not(feature = "spy"))]
pub type TraceHook = Arc<dyn Fn(&TraceEvent<'_>) -> Result<(), TraceError> + Send + Sync>;

/// Record identifiers mirrored from `rtk_spy::records` when the tracer is
/// compiled out.
#[cfg(not(feature = "spy"))]
pub mod records {
    pub mod sched {
        pub const READY: u8 = 1;
        pub const SWITCH: u8 = 2;
        pub const SLEEP: u8 = 3;
        pub const TIMEOUT: u8 = 4;
        pub const PRIORITY: u8 = 5;
        pub const PREEMPT: u8 = 6;
        pub const IDLE: u8 = 7;
    }
    pub mod thread {
        pub const CREATE: u8 = 10;
        pub const EXIT: u8 = 11;
        pub const DISPOSE: u8 = 12;
    }
    pub mod mutex {
        pub const LOCK: u8 = 20;
        pub const BLOCK: u8 = 21;
        pub const BOOST: u8 = 22;
        pub const UNLOCK: u8 = 23;
    }
    pub mod cond {
        pub const SIGNAL: u8 = 30;
        pub const BROADCAST: u8 = 31;
    }
    pub mod sem {
        pub const RESET: u8 = 35;
    }
    pub mod evt {
        pub const SIGNAL: u8 = 40;
        pub const BROADCAST: u8 = 41;
    }
    pub mod pipe {
        pub const RESET: u8 = 50;
        pub const RESUME: u8 = 51;
    }
    pub mod sys {
        pub const START: u8 = 60;
        pub const HALT: u8 = 61;
    }
}
