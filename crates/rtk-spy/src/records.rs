//! Canonical trace record identifiers emitted by the kernel.
//!
//! Payloads carry thread slot indices as single bytes and object indices as
//! little-endian `u16` values unless noted otherwise. Each group reserves a
//! contiguous identifier range, exposed as `GROUP` for
//! [`crate::RecordFilter`].

/// Scheduler record identifiers.
pub mod sched {
    use core::ops::RangeInclusive;

    pub const GROUP: RangeInclusive<u8> = 1..=9;

    /// Thread inserted into the ready list. Payload: thread, priority.
    pub const READY: u8 = 1;
    /// Context switch. Payload: outgoing thread, incoming thread.
    pub const SWITCH: u8 = 2;
    /// Current thread left the running state. Payload: thread, new state.
    pub const SLEEP: u8 = 3;
    /// Virtual timer forced a wakeup. Payload: thread.
    pub const TIMEOUT: u8 = 4;
    /// Effective priority changed. Payload: thread, old, new.
    pub const PRIORITY: u8 = 5;
    /// Preemption from the interrupt epilogue or a tick. Payload: thread.
    pub const PREEMPT: u8 = 6;
    /// Idle thread fast-forwarded virtual time. Payload: ticks as `u32`.
    pub const IDLE: u8 = 7;
}

/// Thread lifecycle record identifiers.
pub mod thread {
    use core::ops::RangeInclusive;

    pub const GROUP: RangeInclusive<u8> = 10..=19;

    /// Thread created. Payload: thread, priority.
    pub const CREATE: u8 = 10;
    /// Thread reached the final state. Payload: thread, exit code as `i32`.
    pub const EXIT: u8 = 11;
    /// Workspace returned to its owner. Payload: thread.
    pub const DISPOSE: u8 = 12;
}

/// Mutex record identifiers.
pub mod mutex {
    use core::ops::RangeInclusive;

    pub const GROUP: RangeInclusive<u8> = 20..=29;

    /// Mutex acquired. Payload: mutex, owner.
    pub const LOCK: u8 = 20;
    /// Caller blocked on an owned mutex. Payload: mutex, caller.
    pub const BLOCK: u8 = 21;
    /// Owner priority raised by inheritance. Payload: thread, new priority.
    pub const BOOST: u8 = 22;
    /// Mutex released. Payload: mutex, releasing thread.
    pub const UNLOCK: u8 = 23;
}

/// Condition variable record identifiers.
pub mod cond {
    use core::ops::RangeInclusive;

    pub const GROUP: RangeInclusive<u8> = 30..=34;

    /// One waiter released. Payload: condvar, thread.
    pub const SIGNAL: u8 = 30;
    /// All waiters released. Payload: condvar, number woken.
    pub const BROADCAST: u8 = 31;
}

/// Counting semaphore record identifiers.
pub mod sem {
    use core::ops::RangeInclusive;

    pub const GROUP: RangeInclusive<u8> = 35..=39;

    /// Counter reset, waiters released. Payload: semaphore, number woken.
    pub const RESET: u8 = 35;
}

/// Event record identifiers.
pub mod evt {
    use core::ops::RangeInclusive;

    pub const GROUP: RangeInclusive<u8> = 40..=49;

    /// Events ORed into a thread's pending mask. Payload: thread, mask as `u32`.
    pub const SIGNAL: u8 = 40;
    /// Source broadcast. Payload: source, flags as `u32`.
    pub const BROADCAST: u8 = 41;
}

/// Pipe record identifiers.
pub mod pipe {
    use core::ops::RangeInclusive;

    pub const GROUP: RangeInclusive<u8> = 50..=59;

    /// Pipe reset. Payload: pipe.
    pub const RESET: u8 = 50;
    /// Pipe resumed after reset. Payload: pipe.
    pub const RESUME: u8 = 51;
}

/// System record identifiers.
pub mod sys {
    use core::ops::RangeInclusive;

    pub const GROUP: RangeInclusive<u8> = 60..=69;

    /// Kernel started. Payload: main thread.
    pub const START: u8 = 60;
    /// Kernel halted. Payload: reason as UTF-8 bytes.
    pub const HALT: u8 = 61;
}

/// Symbolic name of a record identifier.
pub fn name(record: u8) -> Option<&'static str> {
    let name = match record {
        sched::READY => "SCHED_READY",
        sched::SWITCH => "SCHED_SWITCH",
        sched::SLEEP => "SCHED_SLEEP",
        sched::TIMEOUT => "SCHED_TIMEOUT",
        sched::PRIORITY => "SCHED_PRIORITY",
        sched::PREEMPT => "SCHED_PREEMPT",
        sched::IDLE => "SCHED_IDLE",
        thread::CREATE => "THREAD_CREATE",
        thread::EXIT => "THREAD_EXIT",
        thread::DISPOSE => "THREAD_DISPOSE",
        mutex::LOCK => "MUTEX_LOCK",
        mutex::BLOCK => "MUTEX_BLOCK",
        mutex::BOOST => "MUTEX_BOOST",
        mutex::UNLOCK => "MUTEX_UNLOCK",
        cond::SIGNAL => "COND_SIGNAL",
        cond::BROADCAST => "COND_BROADCAST",
        sem::RESET => "SEM_RESET",
        evt::SIGNAL => "EVT_SIGNAL",
        evt::BROADCAST => "EVT_BROADCAST",
        pipe::RESET => "PIPE_RESET",
        pipe::RESUME => "PIPE_RESUME",
        sys::START => "SYS_START",
        sys::HALT => "SYS_HALT",
        _ => return None,
    };
    Some(name)
}
