//! Condition variables bound to the caller's most recent mutex.

use crate::error::Msg;
use crate::kernel::Kernel;
use crate::port::Port;
use crate::scheduler::{KernelState, SysLock};
use crate::thread::{ThreadState, WaitObject};
use crate::time::Interval;
use crate::trace::records;

/// Handle to a kernel condition variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CondVar(u16);

impl CondVar {
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

impl KernelState {
    /// Readies the highest-priority waiter with `Ok`.
    pub fn cond_signal_i(&mut self, cv: CondVar) {
        if let Some(tid) = self.condvars[cv.index()].pop_front(&mut self.threads) {
            let [lo, hi] = cv.trace_bytes();
            self.emit(records::cond::SIGNAL, &[lo, hi, tid.trace_byte()]);
            self.ready_i(tid, Msg::Ok);
        }
    }

    /// Readies every waiter with `Reset`, in queue order.
    pub fn cond_broadcast_i(&mut self, cv: CondVar) {
        let mut woken = 0u8;
        while let Some(tid) = self.condvars[cv.index()].pop_front(&mut self.threads) {
            self.ready_i(tid, Msg::Reset);
            woken = woken.saturating_add(1);
        }
        let [lo, hi] = cv.trace_bytes();
        self.emit(records::cond::BROADCAST, &[lo, hi, woken]);
    }
}

impl<P: Port> SysLock<'_, P> {
    pub fn cond_signal_s(&mut self, cv: CondVar) {
        let first = self.condvars[cv.index()].first();
        if let Some(tid) = first {
            let st = self.state_mut();
            st.condvars[cv.index()].remove(&mut st.threads, tid);
            let [lo, hi] = cv.trace_bytes();
            st.emit(records::cond::SIGNAL, &[lo, hi, tid.trace_byte()]);
            self.wakeup_s(tid, Msg::Ok);
        }
    }

    pub fn cond_broadcast_s(&mut self, cv: CondVar) {
        self.cond_broadcast_i(cv);
        self.reschedule_s();
    }

    /// Releases the caller's most recent mutex, waits on `cv` and relocks the
    /// mutex before returning the wakeup message.
    pub fn cond_wait_s(&mut self, cv: CondVar) -> Msg {
        let Some(mutex) = self.current_mutex() else {
            self.halt("condition wait without an owned mutex")
        };
        self.mutex_unlock_s(mutex);
        self.enqueue_current(WaitObject::CondVar(cv));
        let msg = self.go_to_sleep_s(ThreadState::WaitingCondVar);
        self.mutex_lock_s(mutex);
        msg
    }

    /// As [`Self::cond_wait_s`] with a timeout. On `Timeout` the mutex is
    /// left unlocked.
    pub fn cond_wait_timeout_s(&mut self, cv: CondVar, timeout: Interval) -> Msg {
        let Some(mutex) = self.current_mutex() else {
            self.halt("condition wait without an owned mutex")
        };
        if timeout.is_immediate() {
            self.halt("condition wait with an immediate timeout");
        }
        self.mutex_unlock_s(mutex);
        self.enqueue_current(WaitObject::CondVar(cv));
        let msg = self.go_to_sleep_timeout_s(ThreadState::WaitingCondVar, timeout);
        if msg != Msg::Timeout {
            self.mutex_lock_s(mutex);
        }
        msg
    }
}

impl<P: Port> Kernel<P> {
    pub fn create_condvar(&self) -> CondVar {
        let mut sys = self.lock();
        if sys.condvars.len() >= usize::from(u16::MAX) {
            sys.halt("condition variable table full");
        }
        sys.condvars.push(crate::list::Queue::new());
        CondVar::from_index(sys.condvars.len() - 1)
    }

    pub fn cond_wait(&self, cv: CondVar) -> Msg {
        self.lock().cond_wait_s(cv)
    }

    pub fn cond_wait_timeout(&self, cv: CondVar, timeout: Interval) -> Msg {
        self.lock().cond_wait_timeout_s(cv, timeout)
    }

    pub fn cond_signal(&self, cv: CondVar) {
        self.lock().cond_signal_s(cv);
    }

    pub fn cond_broadcast(&self, cv: CondVar) {
        self.lock().cond_broadcast_s(cv);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list::Queue;
    use crate::thread::{Priority, Tcb, ThreadId};

    fn waiters(prios: &[u8]) -> (KernelState, CondVar, Vec<ThreadId>) {
        let main = Tcb::new("main", Priority(200), None);
        let mut st = KernelState::new(8, 0, None, main).unwrap();
        st.condvars.push(Queue::new());
        let cv = CondVar::from_index(0);
        let mut ids = Vec::new();
        for &p in prios {
            let tid = st.threads.insert(Tcb::new("w", Priority(p), None)).unwrap();
            st.threads[tid].state = ThreadState::WaitingCondVar;
            st.threads[tid].wait = WaitObject::CondVar(cv);
            st.condvars[0].insert_behind(&mut st.threads, tid);
            ids.push(tid);
        }
        (st, cv, ids)
    }

    #[test]
    fn signal_wakes_highest_waiter_with_ok() {
        let (mut st, cv, ids) = waiters(&[10, 30, 20]);
        st.cond_signal_i(cv);
        assert_eq!(st.threads[ids[1]].state, ThreadState::Ready);
        assert_eq!(st.threads[ids[1]].wakeup, Msg::Ok);
        assert_eq!(st.condvars[0].len(), 2);
    }

    #[test]
    fn broadcast_wakes_all_with_reset_in_queue_order() {
        let (mut st, cv, ids) = waiters(&[10, 30, 20]);
        st.cond_broadcast_i(cv);
        assert!(st.condvars[0].is_empty());
        let order: Vec<_> = st.ready.iter(&st.threads).collect();
        assert_eq!(order, vec![ids[1], ids[2], ids[0]]);
        assert!(ids.iter().all(|&t| st.threads[t].wakeup == Msg::Reset));
    }
}
