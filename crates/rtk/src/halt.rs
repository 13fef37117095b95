//! Fatal kernel assertions.
//!
//! A violated kernel contract is not recoverable: the kernel logs the reason
//! and panics with a `kernel halted:` message. On targets built with
//! `panic = "abort"` that stops the system; the host port turns a panic in
//! any kernel thread into a kernel-wide halt.

/// Prefix of every halt message.
pub const HALT_PREFIX: &str = "kernel halted: ";

#[cold]
#[track_caller]
pub(crate) fn fatal(reason: &'static str) -> ! {
    log::error!("{HALT_PREFIX}{reason}");
    panic!("{HALT_PREFIX}{reason}")
}

/// Halts the kernel with `reason` unless `cond` holds.
macro_rules! kassert {
    ($cond:expr, $reason:expr) => {
        if !($cond) {
            $crate::halt::fatal($reason)
        }
    };
}

pub(crate) use kassert;
