//! Counting semaphores.
//!
//! A negative counter is minus the number of waiters, so every signal either
//! wakes exactly one waiter or banks one unit for the next wait.

use crate::error::Msg;
use crate::kernel::Kernel;
use crate::list::Queue;
use crate::port::Port;
use crate::scheduler::{KernelState, SysLock};
use crate::thread::{ThreadState, WaitObject};
use crate::time::Interval;
use crate::trace::records;

/// Handle to a counting semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Semaphore(u16);

impl Semaphore {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u16)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Default)]
pub(crate) struct SemaphoreCb {
    pub(crate) count: i32,
    pub(crate) queue: Queue,
}

impl KernelState {
    pub fn semaphore_count(&self, sem: Semaphore) -> i32 {
        self.semaphores[sem.index()].count
    }

    /// Releases one unit, readying the first waiter if there is one.
    pub fn sem_signal_i(&mut self, sem: Semaphore) {
        let cb = &mut self.semaphores[sem.index()];
        cb.count += 1;
        if cb.count <= 0 {
            if let Some(tid) = cb.queue.pop_front(&mut self.threads) {
                self.ready_i(tid, Msg::Ok);
            }
        }
    }

    /// Releases `n` units at once.
    pub fn sem_add_counter_i(&mut self, sem: Semaphore, n: u32) {
        for _ in 0..n {
            self.sem_signal_i(sem);
        }
    }

    /// Sets the counter to `n`, readying every waiter with `Reset`.
    pub fn sem_reset_i(&mut self, sem: Semaphore, n: i32) {
        crate::halt::kassert!(n >= 0, "semaphore reset to a negative count");
        self.semaphores[sem.index()].count = n;
        let mut woken = 0u8;
        while let Some(tid) = self.semaphores[sem.index()].queue.pop_front(&mut self.threads) {
            self.ready_i(tid, Msg::Reset);
            woken = woken.saturating_add(1);
        }
        let [lo, hi] = sem.0.to_le_bytes();
        self.emit(records::sem::RESET, &[lo, hi, woken]);
    }
}

impl<P: Port> SysLock<'_, P> {
    pub fn sem_wait_s(&mut self, sem: Semaphore) -> Msg {
        self.sem_wait_timeout_s(sem, Interval::INFINITE)
    }

    /// Takes one unit, waiting up to `timeout`. An immediate timeout fails at
    /// once when no unit is available; a timed-out wait gives its claim back.
    pub fn sem_wait_timeout_s(&mut self, sem: Semaphore, timeout: Interval) -> Msg {
        let st = self.state_mut();
        let cb = &mut st.semaphores[sem.index()];
        if cb.count > 0 {
            cb.count -= 1;
            return Msg::Ok;
        }
        if timeout.is_immediate() {
            return Msg::Timeout;
        }
        cb.count -= 1;
        st.enqueue_current(WaitObject::Semaphore(sem));
        self.go_to_sleep_timeout_s(ThreadState::WaitingSemaphore, timeout)
    }

    pub fn sem_signal_s(&mut self, sem: Semaphore) {
        let cb = &mut self.state_mut().semaphores[sem.index()];
        cb.count += 1;
        if cb.count > 0 {
            return;
        }
        let st = self.state_mut();
        if let Some(tid) = st.semaphores[sem.index()].queue.pop_front(&mut st.threads) {
            self.wakeup_s(tid, Msg::Ok);
        }
    }

    /// Signals `signal` and waits on `wait` in one step.
    pub fn sem_signal_wait_s(&mut self, signal: Semaphore, wait: Semaphore) -> Msg {
        self.sem_signal_i(signal);
        let st = self.state_mut();
        let cb = &mut st.semaphores[wait.index()];
        cb.count -= 1;
        if cb.count >= 0 {
            self.reschedule_s();
            return Msg::Ok;
        }
        st.enqueue_current(WaitObject::Semaphore(wait));
        self.go_to_sleep_s(ThreadState::WaitingSemaphore)
    }
}

impl<P: Port> Kernel<P> {
    /// Creates a semaphore holding `count` units.
    pub fn create_semaphore(&self, count: i32) -> Semaphore {
        let mut sys = self.lock();
        if count < 0 {
            sys.halt("semaphore created with a negative count");
        }
        if sys.semaphores.len() >= usize::from(u16::MAX) {
            sys.halt("semaphore table full");
        }
        sys.semaphores.push(SemaphoreCb {
            count,
            queue: Queue::new(),
        });
        Semaphore::from_index(sys.semaphores.len() - 1)
    }

    pub fn sem_wait(&self, sem: Semaphore) -> Msg {
        self.lock().sem_wait_s(sem)
    }

    pub fn sem_wait_timeout(&self, sem: Semaphore, timeout: Interval) -> Msg {
        self.lock().sem_wait_timeout_s(sem, timeout)
    }

    pub fn sem_signal(&self, sem: Semaphore) {
        self.lock().sem_signal_s(sem);
    }

    pub fn sem_add_counter(&self, sem: Semaphore, n: u32) {
        let mut sys = self.lock();
        sys.sem_add_counter_i(sem, n);
        sys.reschedule_s();
    }

    pub fn sem_reset(&self, sem: Semaphore, n: i32) {
        let mut sys = self.lock();
        sys.sem_reset_i(sem, n);
        sys.reschedule_s();
    }

    pub fn sem_signal_wait(&self, signal: Semaphore, wait: Semaphore) -> Msg {
        self.lock().sem_signal_wait_s(signal, wait)
    }

    pub fn semaphore_count(&self, sem: Semaphore) -> i32 {
        self.state.lock().semaphore_count(sem)
    }
}
