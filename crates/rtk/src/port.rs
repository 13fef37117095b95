//! Architecture port interface.
//!
//! The kernel never touches registers or stacks itself. A [`Port`] provides
//! the synchronous context switch, the interrupt wait used by the idle thread
//! and the halt hook. [`HostPort`] runs every kernel thread on its own OS
//! thread for simulation and testing.

use alloc::boxed::Box;

use crate::thread::ThreadId;

#[cfg(feature = "std")]
mod host;

#[cfg(feature = "std")]
pub use host::HostPort;

/// Code a new execution context runs when first switched to. It never
/// returns: kernel threads leave through [`Port::retire`].
pub type ThreadEntry = Box<dyn FnOnce() + Send + 'static>;

pub trait Port: Send + Sync + 'static {
    /// Registers the calling execution context as kernel thread `id`.
    fn adopt_current(&self, id: ThreadId);

    /// Prepares a context for `id`. It must not start executing `entry`
    /// before the first `switch` to `id`.
    fn create_context(&self, id: ThreadId, name: &'static str, entry: ThreadEntry);

    /// Saves `from` and resumes `to`. Returns once `from` is switched back in.
    fn switch(&self, from: ThreadId, to: ThreadId);

    /// Final switch away from a terminated thread; `from` is never resumed.
    fn retire(&self, from: ThreadId, to: ThreadId) -> !;

    /// True when the caller executes as thread `id`, false inside interrupt
    /// handlers.
    fn in_thread_context(&self, id: ThreadId) -> bool;

    /// Counter bumped by every [`Port::notify_interrupt`].
    fn irq_epoch(&self) -> u64;

    /// Signals the end of an interrupt to a waiting idle thread.
    fn notify_interrupt(&self);

    /// Blocks the idle thread until an interrupt arrives after `epoch`.
    fn wait_for_interrupt(&self, epoch: u64);

    /// Whether idle may jump virtual time to the next timer deadline.
    fn fast_forward_idle(&self) -> bool {
        false
    }

    /// Stops the system for good.
    fn halt(&self, reason: &str) -> !;
}
