//! Locks behind the kernel state and the memory pool.
//!
//! Hosted builds use `parking_lot`, whose locks are not poisoned by a
//! panicking holder. Bare-metal builds spin; the port masks the interrupts
//! that could contend while a thread holds the lock.

#[cfg(not(feature = "std"))]
pub use alloc::sync::Arc;
#[cfg(feature = "std")]
pub use std::sync::Arc;

#[cfg(feature = "std")]
pub use parking_lot::{Mutex, MutexGuard};
#[cfg(not(feature = "std"))]
pub use spin::{Mutex, MutexGuard};
