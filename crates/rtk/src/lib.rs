//! # rtk - Preemptive Real-Time Kernel
//!
//! rtk schedules a small set of threads under strict priority order, with
//! optional round robin among threads of equal priority, and provides the
//! blocking primitives they synchronize with:
//!
//! - Mutexes with priority inheritance, released in LIFO order
//! - Condition variables bound to the caller's most recent mutex
//! - Counting semaphores and raw thread queues
//! - Event sources and listeners over per-thread pending-event masks
//! - Bounded byte pipes with reset poisoning
//! - Synchronous thread-to-thread messages
//!
//! ## Architecture
//!
//! **One kernel lock**: all scheduler state lives in [`KernelState`] behind a
//! single lock. [`Kernel::lock`] hands the running thread a [`SysLock`];
//! interrupt handlers get an [`IsrLock`] through [`Kernel::lock_from_isr`].
//! Methods ending in `_i` live on `KernelState` and never block; methods
//! ending in `_s` live on `SysLock` and may suspend the caller. Plain methods
//! on [`Kernel`] take the lock, operate and reschedule.
//!
//! **Ports**: context switching, interrupt waits and halting are delegated to
//! a [`Port`]. [`HostPort`] runs each kernel thread on its own OS thread,
//! handing a baton so exactly one of them executes at a time.
//!
//! **Contract violations halt**: unlocking a mutex out of order, waiting on
//! yourself, using a stale thread handle and similar misuse stop the kernel
//! with a reason string instead of returning an error.
//!
//! ## Module Overview
//!
//! - [`kernel`] - Kernel instance, configuration and the thread API
//! - [`scheduler`] - Ready list, switch planning and lock tokens
//! - [`thread`] - Thread control blocks, priorities and handles
//! - [`mutex`], [`condvar`], [`semaphore`], [`queue`] - Blocking primitives
//! - [`events`] - Event sources, listeners and dispatch
//! - [`pipe`] - Bounded byte pipes
//! - [`message`] - Synchronous messages
//! - [`storage`] - Thread workspaces and the memory pool
//! - [`time`] - System time, intervals and the timer list
//! - [`port`] - Port interface and the host port

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod condvar;
pub mod error;
pub mod events;
pub mod halt;
mod integrity;
pub mod kernel;
mod list;
pub mod message;
pub mod mutex;
pub mod pipe;
pub mod port;
pub mod queue;
pub mod scheduler;
pub mod semaphore;
pub mod storage;
mod sync;
pub mod thread;
pub mod time;
pub mod trace;

pub use condvar::CondVar;
pub use error::{KernelError, Msg, PipeError};
pub use events::{
    dispatch, event_mask, EventFlags, EventId, EventListener, EventMask, EventSource, ALL_EVENTS,
    ALL_FLAGS,
};
pub use kernel::{Kernel, KernelBuilder, KernelConfig, KernelConfigBuilder};
pub use mutex::Mutex;
pub use pipe::Pipe;
#[cfg(feature = "std")]
pub use port::HostPort;
pub use port::{Port, ThreadEntry};
pub use queue::ThreadQueue;
pub use scheduler::{IsrLock, KernelState, SysLock};
pub use semaphore::Semaphore;
pub use storage::{
    HeapWorkspace, MemoryPool, PoolWorkspace, StaticWorkspace, StorageKind, ThreadStorage,
};
pub use thread::{Priority, ThreadConfig, ThreadHandle, ThreadId, ThreadInfo, ThreadState};
pub use time::{Interval, SysTime};
pub use trace::{TraceEvent, TraceHook};
