//! Consistency walk over every kernel list.

use crate::list::Queue;
use crate::scheduler::KernelState;
use crate::thread::{ThreadId, ThreadState, ThreadTable, WaitObject};

/// Checks a wait queue: members are linked, in `state`, waiting on `wait`
/// and sorted by non-increasing priority.
fn check_queue(
    threads: &ThreadTable,
    queue: &Queue,
    state: ThreadState,
    wait: WaitObject,
) -> Result<(), &'static str> {
    let mut count = 0;
    let mut last = None;
    for tid in queue.iter(threads) {
        let Some(tcb) = threads.get(tid) else {
            return Err("stale thread in a queue");
        };
        if !tcb.link.is_linked() {
            return Err("queued thread not marked linked");
        }
        if tcb.state != state || tcb.wait != wait {
            return Err("queued thread in the wrong state");
        }
        if last.is_some_and(|prio| tcb.priority > prio) {
            return Err("queue out of priority order");
        }
        last = Some(tcb.priority);
        count += 1;
        if count > threads.capacity() {
            return Err("queue loops");
        }
    }
    if count != queue.len() {
        return Err("queue length mismatch");
    }
    Ok(())
}

impl KernelState {
    /// Walks the ready list, every wait queue, the owned-mutex stacks and the
    /// timer list.
    pub fn check_integrity(&self) -> Result<(), &'static str> {
        let threads = &self.threads;

        check_queue(threads, &self.ready, ThreadState::Ready, WaitObject::None)?;
        match threads.get(self.current) {
            Some(tcb) if tcb.state == ThreadState::Running && !tcb.link.is_linked() => {}
            _ => return Err("current thread not running"),
        }
        if let Some(idle) = self.idle {
            if !threads.contains(idle) {
                return Err("idle thread missing");
            }
            if idle != self.current && !self.ready.contains(threads, idle) {
                return Err("idle thread neither running nor ready");
            }
        }

        for (index, cb) in self.mutexes.iter().enumerate() {
            let mutex = crate::mutex::Mutex::from_index(index);
            check_queue(threads, &cb.queue, ThreadState::WaitingMutex, WaitObject::Mutex(mutex))?;
            match (cb.owner, cb.queue.first()) {
                (None, Some(_)) => return Err("waiters on an unowned mutex"),
                (Some(owner), first) => {
                    let Some(tcb) = threads.get(owner) else {
                        return Err("mutex owned by a disposed thread");
                    };
                    // An unboosted owner may have lowered its own priority
                    // below its waiters.
                    let boosted = tcb.priority != tcb.real_priority;
                    if boosted && first.is_some_and(|w| threads[w].priority > tcb.priority) {
                        return Err("mutex owner below its highest waiter");
                    }
                }
                (None, None) => {}
            }
        }
        for (index, queue) in self.condvars.iter().enumerate() {
            let cv = crate::condvar::CondVar::from_index(index);
            check_queue(threads, queue, ThreadState::WaitingCondVar, WaitObject::CondVar(cv))?;
        }
        for (index, cb) in self.semaphores.iter().enumerate() {
            let sem = crate::semaphore::Semaphore::from_index(index);
            check_queue(threads, &cb.queue, ThreadState::WaitingSemaphore, WaitObject::Semaphore(sem))?;
            let waiting = cb.queue.len() as i64;
            if (cb.count >= 0 && waiting != 0) || (cb.count < 0 && -i64::from(cb.count) != waiting) {
                return Err("semaphore counter disagrees with its queue");
            }
        }
        for (index, queue) in self.queues.iter().enumerate() {
            let q = crate::queue::ThreadQueue::from_index(index);
            check_queue(threads, queue, ThreadState::Queued, WaitObject::Queue(q))?;
        }

        for (tid, tcb) in threads.iter() {
            let slot = tid.index();
            check_queue(threads, &self.senders[slot], ThreadState::WaitingMessageSend, WaitObject::Sender(tid))?;
            check_queue(threads, &self.joiners[slot], ThreadState::WaitingExit, WaitObject::Exit(tid))?;
            self.check_owned(tid)?;
            if tcb.priority < tcb.real_priority {
                return Err("effective priority below base priority");
            }
            if let Some(timer) = tcb.timer {
                if !self.timers.is_armed(timer) {
                    return Err("thread references a fired timer");
                }
            }
        }

        if self.timers.len() > threads.capacity() {
            return Err("more timers than threads");
        }
        for (timer, tid) in self.timers.iter() {
            match threads.get(tid) {
                Some(tcb) if tcb.timer == Some(timer) => {}
                _ => return Err("armed timer without a waiting thread"),
            }
        }
        Ok(())
    }

    fn check_owned(&self, tid: ThreadId) -> Result<(), &'static str> {
        let mut cursor = self.threads[tid].owned_mutexes;
        let mut steps = 0;
        while let Some(mutex) = cursor {
            let cb = &self.mutexes[mutex.index()];
            if cb.owner != Some(tid) {
                return Err("owned mutex list names a mutex owned elsewhere");
            }
            steps += 1;
            if steps > self.mutexes.len() {
                return Err("owned mutex list loops");
            }
            cursor = cb.next;
        }
        Ok(())
    }
}
