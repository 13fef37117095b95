//! Synchronous messages between threads.
//!
//! A sender queues on the receiver and stays blocked until the receiver has
//! taken the message and released it with a reply. Senders are served in
//! priority order and lend no priority to the receiver.

use crate::error::Msg;
use crate::kernel::Kernel;
use crate::port::Port;
use crate::scheduler::SysLock;
use crate::thread::{ThreadId, ThreadState, WaitObject};

impl<P: Port> SysLock<'_, P> {
    /// Sends `value` to `target` and blocks until it replies.
    pub fn send_s(&mut self, target: ThreadId, value: i32) -> i32 {
        let cur = self.current();
        if target == cur {
            self.halt("thread sending a message to itself");
        }
        self.threads[cur].message = value;
        self.enqueue_current(WaitObject::Sender(target));
        if self.threads[target].state == ThreadState::WaitingMessageReceive {
            self.ready_i(target, Msg::Ok);
        }
        self.go_to_sleep_s(ThreadState::WaitingMessageSend);
        self.threads[cur].message
    }

    /// Blocks until a message arrives and returns its sender, which stays
    /// blocked until [`Self::release_message_s`].
    pub fn wait_message_s(&mut self) -> ThreadId {
        let cur = self.current();
        if self.senders[cur.index()].is_empty() {
            self.go_to_sleep_s(ThreadState::WaitingMessageReceive);
        }
        let st = self.state_mut();
        let Some(sender) = st.senders[cur.index()].pop_front(&mut st.threads) else {
            self.halt("message receiver woken without a sender")
        };
        self.threads[sender].wait = WaitObject::None;
        sender
    }

    /// Replies to a sender taken with [`Self::wait_message_s`].
    pub fn release_message_s(&mut self, sender: ThreadId, reply: i32) {
        let tcb = &self.threads[sender];
        if tcb.state != ThreadState::WaitingMessageSend || tcb.link.is_linked() {
            self.halt("releasing a message that was not received");
        }
        self.threads[sender].message = reply;
        self.wakeup_s(sender, Msg::Ok);
    }
}

impl<P: Port> Kernel<P> {
    pub fn send(&self, target: ThreadId, value: i32) -> i32 {
        self.lock().send_s(target, value)
    }

    pub fn wait_message(&self) -> ThreadId {
        self.lock().wait_message_s()
    }

    /// Payload sent by a thread whose message was received.
    pub fn message_of(&self, sender: ThreadId) -> i32 {
        self.lock().threads[sender].message
    }

    pub fn release_message(&self, sender: ThreadId, reply: i32) {
        self.lock().release_message_s(sender, reply);
    }

    /// Whether any sender is queued on the caller.
    pub fn has_messages(&self) -> bool {
        let sys = self.lock();
        !sys.senders[sys.current().index()].is_empty()
    }
}
