//! Mutexes with priority inheritance.
//!
//! A blocked locker lends its priority to the owner, and transitively to
//! whoever the owner is blocked on. Mutexes are released in strict LIFO
//! order; on release the owner drops back to the highest priority still
//! demanded by waiters on the mutexes it keeps.

use crate::error::Msg;
use crate::halt::{fatal, kassert};
use crate::kernel::Kernel;
use crate::list::Queue;
use crate::port::Port;
use crate::scheduler::{KernelState, SysLock};
use crate::thread::{Priority, ThreadId, ThreadState, WaitObject};
use crate::trace::records;

/// Handle to a kernel mutex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Mutex(u16);

impl Mutex {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u16)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }

    fn trace_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }
}

#[derive(Debug, Default)]
pub(crate) struct MutexCb {
    pub(crate) owner: Option<ThreadId>,
    pub(crate) queue: Queue,
    /// Next mutex on the owner's stack.
    pub(crate) next: Option<Mutex>,
}

impl KernelState {
    pub fn mutex_owner(&self, mutex: Mutex) -> Option<ThreadId> {
        self.mutexes[mutex.index()].owner
    }

    /// Most recently locked mutex still held by the current thread.
    pub fn current_mutex(&self) -> Option<Mutex> {
        self.threads[self.current].owned_mutexes
    }

    fn take_ownership(&mut self, mutex: Mutex, tid: ThreadId) {
        let cb = &mut self.mutexes[mutex.index()];
        cb.owner = Some(tid);
        cb.next = self.threads[tid].owned_mutexes;
        self.threads[tid].owned_mutexes = Some(mutex);
        let [lo, hi] = mutex.trace_bytes();
        self.emit(records::mutex::LOCK, &[lo, hi, tid.trace_byte()]);
    }

    /// Raises every owner along the blocking chain starting at `mutex` to
    /// `prio`, re-sorting each one in the queue it waits in.
    fn boost_owner_chain(&mut self, mutex: Mutex, prio: Priority) {
        let Some(mut owner) = self.mutexes[mutex.index()].owner else {
            return;
        };
        for _ in 0..self.threads.capacity() {
            let tcb = &mut self.threads[owner];
            if tcb.priority >= prio {
                return;
            }
            tcb.priority = prio;
            let (state, wait, linked) = (tcb.state, tcb.wait, tcb.link.is_linked());
            self.emit(records::mutex::BOOST, &[owner.trace_byte(), prio.0]);

            match state {
                ThreadState::Ready => {
                    self.ready.requeue(&mut self.threads, owner);
                    return;
                }
                ThreadState::WaitingMutex => {
                    let WaitObject::Mutex(next) = wait else {
                        fatal("mutex waiter without a mutex")
                    };
                    if let Some((threads, queue)) = self.wait_queue(wait) {
                        queue.requeue(threads, owner);
                    }
                    match self.mutexes[next.index()].owner {
                        Some(next_owner) => owner = next_owner,
                        None => return,
                    }
                }
                _ => {
                    if linked {
                        if let Some((threads, queue)) = self.wait_queue(wait) {
                            queue.requeue(threads, owner);
                        }
                    }
                    return;
                }
            }
        }
        fatal("mutex ownership chain loops")
    }

    /// Effective priority becomes the base priority raised to the best waiter
    /// of every mutex `tid` still owns.
    fn recompute_priority(&mut self, tid: ThreadId) {
        let mut prio = self.threads[tid].real_priority;
        let mut cursor = self.threads[tid].owned_mutexes;
        while let Some(mutex) = cursor {
            let cb = &self.mutexes[mutex.index()];
            if let Some(waiter) = cb.queue.first() {
                prio = prio.max(self.threads[waiter].priority);
            }
            cursor = cb.next;
        }
        let tcb = &mut self.threads[tid];
        if tcb.priority != prio {
            let old = tcb.priority;
            tcb.priority = prio;
            self.emit(records::sched::PRIORITY, &[tid.trace_byte(), old.0, prio.0]);
        }
    }

    /// Pops `mutex` off `owner`'s stack and hands it to the best waiter.
    fn release_mutex(&mut self, mutex: Mutex, owner: ThreadId) {
        let index = mutex.index();
        self.threads[owner].owned_mutexes = self.mutexes[index].next;
        self.mutexes[index].next = None;
        self.recompute_priority(owner);

        let [lo, hi] = mutex.trace_bytes();
        self.emit(records::mutex::UNLOCK, &[lo, hi, owner.trace_byte()]);
        match self.mutexes[index].queue.pop_front(&mut self.threads) {
            Some(waiter) => {
                self.take_ownership(mutex, waiter);
                self.ready_i(waiter, Msg::Ok);
            }
            None => self.mutexes[index].owner = None,
        }
    }
}

impl<P: Port> SysLock<'_, P> {
    /// Locks `mutex`, blocking and lending priority while it is owned.
    pub fn mutex_lock_s(&mut self, mutex: Mutex) {
        let st = self.state_mut();
        let cur = st.current;
        let owner = st.mutexes[mutex.index()].owner;
        match owner {
            None => st.take_ownership(mutex, cur),
            Some(owner) if owner == cur => self.halt("mutex relocked by its owner"),
            Some(_) => {
                let prio = st.threads[cur].priority;
                st.boost_owner_chain(mutex, prio);
                let [lo, hi] = mutex.trace_bytes();
                st.emit(records::mutex::BLOCK, &[lo, hi, cur.trace_byte()]);
                st.enqueue_current(WaitObject::Mutex(mutex));
                self.go_to_sleep_s(ThreadState::WaitingMutex);
                kassert!(
                    self.mutex_owner(mutex) == Some(cur),
                    "mutex handed to another thread"
                );
            }
        }
    }

    /// Locks `mutex` only if it is free.
    pub fn mutex_try_lock_s(&mut self, mutex: Mutex) -> bool {
        let st = self.state_mut();
        if st.mutexes[mutex.index()].owner.is_some() {
            return false;
        }
        let cur = st.current;
        st.take_ownership(mutex, cur);
        true
    }

    /// Unlocks `mutex`, which must be the caller's most recent lock. Does not
    /// reschedule.
    pub fn mutex_unlock_s(&mut self, mutex: Mutex) {
        let cur = self.current();
        if self.current_mutex().is_none() {
            self.halt("unlocking with no mutex owned");
        }
        if self.current_mutex() != Some(mutex) || self.mutex_owner(mutex) != Some(cur) {
            self.halt("mutex unlocked out of order or by a non-owner");
        }
        self.state_mut().release_mutex(mutex, cur);
    }

    /// Releases every mutex the caller owns. Does not reschedule.
    pub fn mutex_unlock_all_s(&mut self) {
        let st = self.state_mut();
        let cur = st.current;
        while let Some(mutex) = st.threads[cur].owned_mutexes {
            st.release_mutex(mutex, cur);
        }
        kassert!(
            st.threads[cur].priority == st.threads[cur].real_priority,
            "priority still boosted without owned mutexes"
        );
    }
}

impl<P: Port> Kernel<P> {
    pub fn create_mutex(&self) -> Mutex {
        let mut sys = self.lock();
        if sys.mutexes.len() >= usize::from(u16::MAX) {
            sys.halt("mutex table full");
        }
        sys.mutexes.push(MutexCb::default());
        Mutex::from_index(sys.mutexes.len() - 1)
    }

    pub fn lock_mutex(&self, mutex: Mutex) {
        self.lock().mutex_lock_s(mutex);
    }

    pub fn try_lock_mutex(&self, mutex: Mutex) -> bool {
        self.lock().mutex_try_lock_s(mutex)
    }

    pub fn unlock_mutex(&self, mutex: Mutex) {
        let mut sys = self.lock();
        sys.mutex_unlock_s(mutex);
        sys.reschedule_s();
    }

    pub fn unlock_all_mutexes(&self) {
        let mut sys = self.lock();
        sys.mutex_unlock_all_s();
        sys.reschedule_s();
    }

    pub fn mutex_owner(&self, mutex: Mutex) -> Option<ThreadId> {
        self.state.lock().mutex_owner(mutex)
    }
}
