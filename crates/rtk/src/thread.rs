//! Thread control blocks and the thread table.
//!
//! Threads live in a fixed-capacity arena addressed by [`ThreadId`]: the slot
//! index plus a generation counter bumped every time a slot is recycled, so a
//! handle to a disposed thread is detected instead of aliasing its successor.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;
use core::ops::{Index, IndexMut};

use crate::condvar::CondVar;
use crate::error::Msg;
use crate::events::EventMask;
use crate::list::Link;
use crate::mutex::Mutex;
use crate::queue::ThreadQueue;
use crate::semaphore::Semaphore;
use crate::storage::{HeapWorkspace, ThreadStorage};
use crate::time::TimerId;

/// Default workspace handed to threads configured without explicit storage.
pub const DEFAULT_STACK_SIZE: usize = 4096;

/// Thread priority; larger values are more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub u8);

impl Priority {
    /// Reserved for the idle thread.
    pub const IDLE: Priority = Priority(0);
    /// Lowest priority available to application threads.
    pub const LOWEST: Priority = Priority(1);
    pub const NORMAL: Priority = Priority(128);
    pub const HIGHEST: Priority = Priority(255);
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Thread execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// In the ready list.
    Ready,
    /// Currently executing.
    Running,
    /// Created but not started, or explicitly suspended.
    Suspended,
    WaitingSemaphore,
    WaitingMutex,
    WaitingCondVar,
    Sleeping,
    /// Joining another thread.
    WaitingExit,
    WaitingEventsAny,
    WaitingEventsAll,
    /// Sent a message, waiting for the reply.
    WaitingMessageSend,
    /// Waiting for a message to arrive.
    WaitingMessageReceive,
    /// Waiting on a generic thread queue.
    Queued,
    /// Terminated; the exit code is available to joiners.
    Final,
}

impl ThreadState {
    pub(crate) fn code(self) -> u8 {
        self as u8
    }
}

/// Thread identifier: slot index plus generation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId {
    index: u16,
    generation: u16,
}

impl ThreadId {
    pub(crate) const fn new(index: u16, generation: u16) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the thread table.
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub(crate) fn trace_byte(self) -> u8 {
        self.index as u8
    }
}

impl fmt::Debug for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ThreadId({}g{})", self.index, self.generation)
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.index)
    }
}

/// Thread body; its return value becomes the exit code.
pub type ThreadBody = Box<dyn FnOnce() -> i32 + Send>;

/// Configuration for creating a thread.
pub struct ThreadConfig {
    pub name: &'static str,
    pub priority: Priority,
    pub storage: Box<dyn ThreadStorage>,
    pub body: ThreadBody,
}

impl ThreadConfig {
    /// Creates a configuration with a heap workspace of [`DEFAULT_STACK_SIZE`].
    pub fn new<F>(name: &'static str, priority: Priority, body: F) -> Self
    where
        F: FnOnce() -> i32 + Send + 'static,
    {
        Self {
            name,
            priority,
            storage: Box::new(HeapWorkspace::new(DEFAULT_STACK_SIZE)),
            body: Box::new(body),
        }
    }

    /// Replaces the workspace with a heap allocation of `size` bytes.
    pub fn with_stack_size(mut self, size: usize) -> Self {
        self.storage = Box::new(HeapWorkspace::new(size));
        self
    }

    /// Runs the thread on caller-provided storage.
    pub fn with_storage<S: ThreadStorage>(mut self, storage: S) -> Self {
        self.storage = Box::new(storage);
        self
    }
}

impl fmt::Debug for ThreadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadConfig")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("storage", &self.storage.kind())
            .finish()
    }
}

/// Counted reference to a thread.
///
/// Each handle holds one reference; the workspace of a terminated thread is
/// reclaimed once every reference has been released or consumed by
/// `wait_for_exit`.
#[must_use = "dropping a handle leaks its reference; release it or wait for the thread"]
#[derive(Debug, PartialEq, Eq)]
pub struct ThreadHandle {
    id: ThreadId,
}

impl ThreadHandle {
    pub(crate) fn new(id: ThreadId) -> Self {
        Self { id }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }
}

/// Snapshot of a thread's scheduling state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub name: &'static str,
    pub state: ThreadState,
    pub priority: Priority,
    pub real_priority: Priority,
    pub pending_events: EventMask,
    pub refs: u8,
}

/// What a waiting thread is queued on, if anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WaitObject {
    None,
    Mutex(Mutex),
    CondVar(CondVar),
    Semaphore(Semaphore),
    Queue(ThreadQueue),
    /// Queued on the receiver's message queue.
    Sender(ThreadId),
    /// Joining the given thread.
    Exit(ThreadId),
}

pub(crate) struct Tcb {
    pub(crate) name: &'static str,
    pub(crate) state: ThreadState,
    pub(crate) priority: Priority,
    pub(crate) real_priority: Priority,
    pub(crate) link: Link,
    pub(crate) wait: WaitObject,
    pub(crate) wakeup: Msg,
    pub(crate) timer: Option<TimerId>,
    /// Remaining round-robin ticks.
    pub(crate) ticks: u8,
    pub(crate) pending_events: EventMask,
    pub(crate) wait_mask: EventMask,
    /// Head of the owned-mutex stack, most recently locked first.
    pub(crate) owned_mutexes: Option<Mutex>,
    /// Message payload while sending, reply once released.
    pub(crate) message: i32,
    pub(crate) exit_code: i32,
    pub(crate) refs: u8,
    pub(crate) terminate: bool,
    pub(crate) storage: Option<Box<dyn ThreadStorage>>,
}

impl Tcb {
    pub(crate) fn new(
        name: &'static str,
        priority: Priority,
        storage: Option<Box<dyn ThreadStorage>>,
    ) -> Self {
        Self {
            name,
            state: ThreadState::Suspended,
            priority,
            real_priority: priority,
            link: Link::default(),
            wait: WaitObject::None,
            wakeup: Msg::Ok,
            timer: None,
            ticks: 0,
            pending_events: 0,
            wait_mask: 0,
            owned_mutexes: None,
            message: 0,
            exit_code: 0,
            refs: 1,
            terminate: false,
            storage,
        }
    }

    pub(crate) fn info(&self) -> ThreadInfo {
        ThreadInfo {
            name: self.name,
            state: self.state,
            priority: self.priority,
            real_priority: self.real_priority,
            pending_events: self.pending_events,
            refs: self.refs,
        }
    }
}

impl fmt::Debug for Tcb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tcb")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("real_priority", &self.real_priority)
            .field("wait", &self.wait)
            .finish()
    }
}

struct Slot {
    generation: u16,
    tcb: Option<Tcb>,
}

/// Fixed-capacity arena of thread control blocks.
pub(crate) struct ThreadTable {
    slots: Vec<Slot>,
    free: Vec<u16>,
    capacity: usize,
}

impl ThreadTable {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn insert(&mut self, tcb: Tcb) -> Option<ThreadId> {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.tcb = Some(tcb);
            return Some(ThreadId::new(index, slot.generation));
        }
        if self.slots.len() >= self.capacity {
            return None;
        }
        let index = self.slots.len() as u16;
        self.slots.push(Slot {
            generation: 0,
            tcb: Some(tcb),
        });
        Some(ThreadId::new(index, 0))
    }

    pub(crate) fn remove(&mut self, id: ThreadId) -> Option<Tcb> {
        let slot = self.slots.get_mut(id.index())?;
        if slot.generation != id.generation {
            return None;
        }
        let tcb = slot.tcb.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        Some(tcb)
    }

    pub(crate) fn get(&self, id: ThreadId) -> Option<&Tcb> {
        self.slots
            .get(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.tcb.as_ref())
    }

    pub(crate) fn get_mut(&mut self, id: ThreadId) -> Option<&mut Tcb> {
        self.slots
            .get_mut(id.index())
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.tcb.as_mut())
    }

    pub(crate) fn contains(&self, id: ThreadId) -> bool {
        self.get(id).is_some()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (ThreadId, &Tcb)> + '_ {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.tcb
                .as_ref()
                .map(|tcb| (ThreadId::new(index as u16, slot.generation), tcb))
        })
    }
}

impl Index<ThreadId> for ThreadTable {
    type Output = Tcb;

    fn index(&self, id: ThreadId) -> &Tcb {
        match self.get(id) {
            Some(tcb) => tcb,
            None => crate::halt::fatal("stale thread reference"),
        }
    }
}

impl IndexMut<ThreadId> for ThreadTable {
    fn index_mut(&mut self, id: ThreadId) -> &mut Tcb {
        match self.get_mut(id) {
            Some(tcb) => tcb,
            None => crate::halt::fatal("stale thread reference"),
        }
    }
}
