//! Generic thread queues for drivers and the pipe.

use crate::error::Msg;
use crate::kernel::Kernel;
use crate::list::Queue;
use crate::port::Port;
use crate::scheduler::{KernelState, SysLock};
use crate::thread::{ThreadState, WaitObject};
use crate::time::Interval;

/// Handle to a priority-ordered queue of waiting threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThreadQueue(u16);

impl ThreadQueue {
    pub(crate) fn from_index(index: usize) -> Self {
        Self(index as u16)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl KernelState {
    pub(crate) fn new_thread_queue(&mut self) -> ThreadQueue {
        crate::halt::kassert!(
            self.queues.len() < usize::from(u16::MAX),
            "thread queue table full"
        );
        self.queues.push(Queue::new());
        ThreadQueue::from_index(self.queues.len() - 1)
    }

    pub fn queue_is_empty(&self, queue: ThreadQueue) -> bool {
        self.queues[queue.index()].is_empty()
    }

    /// Readies the first thread in `queue` with `msg`.
    pub fn dequeue_next_i(&mut self, queue: ThreadQueue, msg: Msg) -> bool {
        match self.queues[queue.index()].pop_front(&mut self.threads) {
            Some(tid) => {
                self.ready_i(tid, msg);
                true
            }
            None => false,
        }
    }

    /// Readies every thread in `queue` with `msg`, in queue order.
    pub fn dequeue_all_i(&mut self, queue: ThreadQueue, msg: Msg) {
        while self.dequeue_next_i(queue, msg) {}
    }
}

impl<P: Port> SysLock<'_, P> {
    /// Waits on `queue` until dequeued or `timeout` elapses. An immediate
    /// timeout returns `Timeout` without queueing.
    pub fn enqueue_timeout_s(&mut self, queue: ThreadQueue, timeout: Interval) -> Msg {
        if timeout.is_immediate() {
            return Msg::Timeout;
        }
        self.enqueue_current(WaitObject::Queue(queue));
        self.go_to_sleep_timeout_s(ThreadState::Queued, timeout)
    }
}

impl<P: Port> Kernel<P> {
    pub fn create_thread_queue(&self) -> ThreadQueue {
        self.lock().new_thread_queue()
    }
}
