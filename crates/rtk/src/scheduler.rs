//! Ready list, context switch planning and the kernel lock tokens.
//!
//! All scheduler state lives in [`KernelState`] behind the single kernel lock.
//! Methods on `KernelState` are the I-class operations: they never block and
//! may run from interrupt handlers through an [`IsrLock`]. Operations that may
//! suspend the caller are S-class and live on [`SysLock`], which only a
//! running thread can obtain.
//!
//! A switch is planned under the lock (ready list and `current` updated
//! first), then the lock is released and the port performs the switch. The
//! resumed thread re-acquires the lock before looking at anything.

use alloc::vec::Vec;
use core::ops::{Deref, DerefMut};

use crate::error::Msg;
use crate::events::{ListenerCb, SourceCb};
use crate::halt::{fatal, kassert};
use crate::kernel::Kernel;
use crate::list::Queue;
use crate::mutex::MutexCb;
use crate::pipe::PipeCb;
use crate::port::Port;
use crate::semaphore::SemaphoreCb;
use crate::sync::MutexGuard;
use crate::thread::{Priority, Tcb, ThreadId, ThreadInfo, ThreadState, ThreadTable, WaitObject};
use crate::time::{Interval, SysTime, TimerList};
use crate::trace::{records, TraceEvent, TraceHook};

/// A context switch decided under the kernel lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Switch {
    pub(crate) from: ThreadId,
    pub(crate) to: ThreadId,
}

/// Everything protected by the kernel lock.
pub struct KernelState {
    pub(crate) threads: ThreadTable,
    pub(crate) ready: Queue,
    pub(crate) current: ThreadId,
    pub(crate) idle: Option<ThreadId>,
    pub(crate) timers: TimerList,
    pub(crate) mutexes: Vec<MutexCb>,
    pub(crate) condvars: Vec<Queue>,
    pub(crate) semaphores: Vec<SemaphoreCb>,
    pub(crate) queues: Vec<Queue>,
    pub(crate) sources: Vec<SourceCb>,
    pub(crate) listeners: Vec<ListenerCb>,
    pub(crate) pipes: Vec<PipeCb>,
    /// Threads joining each thread slot.
    pub(crate) joiners: Vec<Queue>,
    /// Senders queued on each thread slot.
    pub(crate) senders: Vec<Queue>,
    /// Final threads whose last reference is gone, awaiting disposal.
    pub(crate) zombies: Vec<ThreadId>,
    pub(crate) quantum: u8,
    pub(crate) preempt_pending: bool,
    pub(crate) halted: Option<&'static str>,
    trace: Option<TraceHook>,
}

impl KernelState {
    /// Creates the state with `main` as the running thread.
    pub(crate) fn new(
        max_threads: usize,
        quantum: u8,
        trace: Option<TraceHook>,
        mut main: Tcb,
    ) -> Option<Self> {
        let mut threads = ThreadTable::with_capacity(max_threads);
        main.state = ThreadState::Running;
        main.ticks = quantum;
        let current = threads.insert(main)?;
        Some(Self {
            threads,
            ready: Queue::new(),
            current,
            idle: None,
            timers: TimerList::with_capacity(max_threads),
            mutexes: Vec::new(),
            condvars: Vec::new(),
            semaphores: Vec::new(),
            queues: Vec::new(),
            sources: Vec::new(),
            listeners: Vec::new(),
            pipes: Vec::new(),
            joiners: alloc::vec![Queue::new(); max_threads],
            senders: alloc::vec![Queue::new(); max_threads],
            zombies: Vec::with_capacity(max_threads),
            quantum,
            preempt_pending: false,
            halted: None,
            trace,
        })
    }

    pub(crate) fn emit(&self, record: u8, payload: &[u8]) {
        if let Some(ref trace) = self.trace {
            let event = TraceEvent {
                record,
                tick: self.now().ticks(),
                payload,
            };
            if let Err(err) = trace(&event) {
                log::warn!("trace record {record} dropped: {err}");
            }
        }
    }

    /// The running thread.
    pub fn current(&self) -> ThreadId {
        self.current
    }

    pub fn now(&self) -> SysTime {
        self.timers.now()
    }

    pub fn thread_info(&self, tid: ThreadId) -> Option<ThreadInfo> {
        self.threads.get(tid).map(Tcb::info)
    }

    pub(crate) fn priority_of(&self, tid: ThreadId) -> Priority {
        self.threads[tid].priority
    }

    /// Inserts `tid` into the ready list behind its priority peers, delivering
    /// `msg` as its wakeup message.
    pub fn ready_i(&mut self, tid: ThreadId, msg: Msg) -> ThreadId {
        let tcb = &mut self.threads[tid];
        kassert!(
            !matches!(
                tcb.state,
                ThreadState::Ready | ThreadState::Running | ThreadState::Final
            ),
            "readying a thread that is not waiting"
        );
        tcb.state = ThreadState::Ready;
        tcb.wakeup = msg;
        tcb.wait = WaitObject::None;
        let prio = tcb.priority;
        self.ready.insert_behind(&mut self.threads, tid);
        self.emit(records::sched::READY, &[tid.trace_byte(), prio.0]);
        tid
    }

    fn first_ready_priority(&self) -> Option<Priority> {
        self.ready.first().map(|t| self.priority_of(t))
    }

    /// Whether an interrupt epilogue should preempt the running thread.
    pub fn is_preemption_required(&self) -> bool {
        let Some(p1) = self.first_ready_priority() else {
            return false;
        };
        let cur = &self.threads[self.current];
        if self.quantum > 0 && cur.ticks == 0 {
            p1 >= cur.priority
        } else {
            p1 > cur.priority
        }
    }

    /// Pops the ready head and makes it current.
    fn activate_next(&mut self) -> Switch {
        let from = self.current;
        let Some(to) = self.ready.pop_front(&mut self.threads) else {
            fatal("ready list empty")
        };
        self.threads[to].state = ThreadState::Running;
        self.current = to;
        self.emit(
            records::sched::SWITCH,
            &[from.trace_byte(), to.trace_byte()],
        );
        Switch { from, to }
    }

    /// Current thread leaves the running state as `new_state`.
    pub(crate) fn plan_sleep(&mut self, new_state: ThreadState) -> Switch {
        let cur = self.current;
        kassert!(Some(cur) != self.idle, "idle thread cannot sleep");
        let tcb = &mut self.threads[cur];
        tcb.state = new_state;
        tcb.ticks = self.quantum;
        self.emit(records::sched::SLEEP, &[cur.trace_byte(), new_state.code()]);
        self.activate_next()
    }

    /// Switches only if the ready head strictly outranks the current thread,
    /// which goes back ahead of its peers.
    pub(crate) fn plan_reschedule(&mut self) -> Option<Switch> {
        let cur = self.current;
        if self.first_ready_priority()? <= self.priority_of(cur) {
            return None;
        }
        self.threads[cur].state = ThreadState::Ready;
        self.ready.insert_ahead(&mut self.threads, cur);
        Some(self.activate_next())
    }

    /// Gives way to a ready thread of equal or higher priority.
    pub(crate) fn plan_yield(&mut self) -> Option<Switch> {
        let cur = self.current;
        if self.first_ready_priority()? < self.priority_of(cur) {
            return None;
        }
        let tcb = &mut self.threads[cur];
        tcb.state = ThreadState::Ready;
        tcb.ticks = self.quantum;
        self.ready.insert_behind(&mut self.threads, cur);
        Some(self.activate_next())
    }

    /// Readies `tid`, switching to it at once if it outranks the caller.
    pub(crate) fn plan_wakeup(&mut self, tid: ThreadId, msg: Msg) -> Option<Switch> {
        let cur = self.current;
        if self.priority_of(tid) <= self.priority_of(cur) {
            self.ready_i(tid, msg);
            return None;
        }
        let tcb = &mut self.threads[tid];
        kassert!(
            !matches!(tcb.state, ThreadState::Ready | ThreadState::Final),
            "waking a thread that is not waiting"
        );
        tcb.wakeup = msg;
        tcb.wait = WaitObject::None;
        tcb.state = ThreadState::Running;
        self.threads[cur].state = ThreadState::Ready;
        self.ready.insert_ahead(&mut self.threads, cur);
        self.current = tid;
        self.emit(
            records::sched::SWITCH,
            &[cur.trace_byte(), tid.trace_byte()],
        );
        Some(Switch { from: cur, to: tid })
    }

    /// Preemption from an interrupt epilogue: an exhausted quantum sends the
    /// thread behind its peers with a fresh quantum, otherwise it stays ahead.
    pub(crate) fn plan_preemption(&mut self) -> Option<Switch> {
        if !self.is_preemption_required() {
            return None;
        }
        let cur = self.current;
        let quantum = self.quantum;
        let tcb = &mut self.threads[cur];
        tcb.state = ThreadState::Ready;
        if quantum > 0 && tcb.ticks == 0 {
            tcb.ticks = quantum;
            self.ready.insert_behind(&mut self.threads, cur);
        } else {
            self.ready.insert_ahead(&mut self.threads, cur);
        }
        self.emit(records::sched::PREEMPT, &[cur.trace_byte()]);
        Some(self.activate_next())
    }

    /// System tick: consumes a slice of the running thread's quantum and
    /// fires expired timers.
    pub fn tick_i(&mut self) {
        let cur = self.current;
        if self.quantum > 0 {
            let tcb = &mut self.threads[cur];
            tcb.ticks = tcb.ticks.saturating_sub(1);
        }
        self.advance_time(1);
    }

    pub(crate) fn advance_time(&mut self, ticks: u32) {
        self.timers.advance(ticks);
        while let Some((timer, tid)) = self.timers.pop_expired() {
            self.timeout_wakeup(timer, tid);
        }
    }

    /// Arms a timeout for the current thread.
    pub(crate) fn arm_timeout(&mut self, timeout: Interval) {
        let cur = self.current;
        let timer = self.timers.arm(timeout.as_ticks(), cur);
        self.threads[cur].timer = Some(timer);
    }

    /// Cancels the current thread's timeout if it did not fire.
    pub(crate) fn disarm_timeout(&mut self) {
        let cur = self.current;
        if let Some(timer) = self.threads[cur].timer.take() {
            self.timers.disarm(timer);
        }
    }

    /// Forces a waiting thread back to ready with `Timeout`, undoing its
    /// enqueue first.
    fn timeout_wakeup(&mut self, timer: crate::time::TimerId, tid: ThreadId) {
        let Some(tcb) = self.threads.get_mut(tid) else {
            return;
        };
        if tcb.timer != Some(timer) {
            return;
        }
        tcb.timer = None;
        match (tcb.state, tcb.wait) {
            (ThreadState::Ready | ThreadState::Running | ThreadState::Final, _) => return,
            (ThreadState::WaitingSemaphore, WaitObject::Semaphore(sem)) => {
                self.semaphores[sem.index()].count += 1;
            }
            _ => {}
        }
        self.dequeue_waiter(tid);
        self.emit(records::sched::TIMEOUT, &[tid.trace_byte()]);
        self.ready_i(tid, Msg::Timeout);
    }

    /// Splits out the thread table and the queue a wait object refers to.
    pub(crate) fn wait_queue(&mut self, wait: WaitObject) -> Option<(&mut ThreadTable, &mut Queue)> {
        let KernelState {
            threads,
            mutexes,
            condvars,
            semaphores,
            queues,
            joiners,
            senders,
            ..
        } = self;
        let queue = match wait {
            WaitObject::None => return None,
            WaitObject::Mutex(m) => &mut mutexes[m.index()].queue,
            WaitObject::CondVar(c) => &mut condvars[c.index()],
            WaitObject::Semaphore(s) => &mut semaphores[s.index()].queue,
            WaitObject::Queue(q) => &mut queues[q.index()],
            WaitObject::Sender(rx) => &mut senders[rx.index()],
            WaitObject::Exit(t) => &mut joiners[t.index()],
        };
        Some((threads, queue))
    }

    /// Removes `tid` from the wait queue it sits in, if any.
    pub(crate) fn dequeue_waiter(&mut self, tid: ThreadId) {
        let tcb = &self.threads[tid];
        if !tcb.link.is_linked() {
            return;
        }
        let wait = tcb.wait;
        if let Some((threads, queue)) = self.wait_queue(wait) {
            queue.remove(threads, tid);
        }
    }

    /// Enqueues the current thread on `wait`'s queue in priority order.
    pub(crate) fn enqueue_current(&mut self, wait: WaitObject) {
        let cur = self.current;
        self.threads[cur].wait = wait;
        if let Some((threads, queue)) = self.wait_queue(wait) {
            queue.insert_behind(threads, cur);
        }
    }

    pub(crate) fn dispose(&mut self, tid: ThreadId) {
        if let Some(mut tcb) = self.threads.remove(tid) {
            self.emit(records::thread::DISPOSE, &[tid.trace_byte()]);
            log::debug!("thread {tid} ({}) disposed", tcb.name);
            if let Some(storage) = tcb.storage.take() {
                storage.reclaim();
            }
        }
    }

    /// Disposes terminated threads whose last reference is gone. Runs only
    /// after the exiting thread has been switched out.
    pub(crate) fn reap_zombies(&mut self) {
        let current = self.current;
        let mut i = 0;
        while i < self.zombies.len() {
            let tid = self.zombies[i];
            if tid == current {
                i += 1;
                continue;
            }
            self.zombies.swap_remove(i);
            self.dispose(tid);
        }
    }
}

/// Thread-context kernel lock.
///
/// Obtained from [`Kernel::lock`] by the running thread. Dereferences to the
/// [`KernelState`] for I-class operations and adds the S-class operations that
/// may suspend the caller. Dropping it honours any preemption requested by an
/// interrupt while the lock was held.
pub struct SysLock<'k, P: Port> {
    kernel: &'k Kernel<P>,
    guard: Option<MutexGuard<'k, KernelState>>,
}

impl<'k, P: Port> SysLock<'k, P> {
    pub(crate) fn new(kernel: &'k Kernel<P>, guard: MutexGuard<'k, KernelState>) -> Self {
        Self {
            kernel,
            guard: Some(guard),
        }
    }

    pub(crate) fn state_mut(&mut self) -> &mut KernelState {
        match self.guard.as_deref_mut() {
            Some(state) => state,
            None => fatal("kernel lock used while released"),
        }
    }

    /// Releases the lock, lets the port switch threads and re-acquires it once
    /// this thread runs again.
    pub(crate) fn perform(&mut self, switch: Switch) {
        let kernel = self.kernel;
        if kernel.config.integrity_checks {
            if let Err(reason) = self.state_mut().check_integrity() {
                self.halt(reason);
            }
        }
        log::trace!("switch {} -> {}", switch.from, switch.to);
        drop(self.guard.take());
        kernel.port.switch(switch.from, switch.to);
        let mut guard = kernel.state.lock();
        guard.reap_zombies();
        self.guard = Some(guard);
    }

    /// Switches to the ready head if it outranks the caller.
    pub fn reschedule_s(&mut self) {
        if let Some(switch) = self.state_mut().plan_reschedule() {
            self.perform(switch);
        }
    }

    /// Readies `tid` with `msg`, switching to it immediately if it outranks
    /// the caller.
    pub fn wakeup_s(&mut self, tid: ThreadId, msg: Msg) {
        if let Some(switch) = self.state_mut().plan_wakeup(tid, msg) {
            self.perform(switch);
        }
    }

    pub(crate) fn yield_s(&mut self) {
        if let Some(switch) = self.state_mut().plan_yield() {
            self.perform(switch);
        }
    }

    /// Suspends the caller in `new_state` until another thread readies it.
    pub(crate) fn go_to_sleep_s(&mut self, new_state: ThreadState) -> Msg {
        let switch = self.state_mut().plan_sleep(new_state);
        self.perform(switch);
        let st = self.state_mut();
        st.threads[st.current].wakeup
    }

    /// As [`Self::go_to_sleep_s`], resuming with `Timeout` once `timeout`
    /// ticks pass. `timeout` must not be immediate.
    pub(crate) fn go_to_sleep_timeout_s(&mut self, new_state: ThreadState, timeout: Interval) -> Msg {
        kassert!(!timeout.is_immediate(), "sleeping with an immediate timeout");
        if timeout.is_infinite() {
            return self.go_to_sleep_s(new_state);
        }
        self.state_mut().arm_timeout(timeout);
        let msg = self.go_to_sleep_s(new_state);
        self.state_mut().disarm_timeout();
        msg
    }

    /// Final switch of an exiting thread.
    pub(crate) fn retire_s(mut self, switch: Switch) -> ! {
        let kernel = self.kernel;
        drop(self.guard.take());
        kernel.port.retire(switch.from, switch.to)
    }

    /// Marks the kernel halted and stops through the port.
    pub fn halt(&mut self, reason: &'static str) -> ! {
        let st = self.state_mut();
        st.halted.get_or_insert(reason);
        st.emit(records::sys::HALT, reason.as_bytes());
        log::error!("kernel halted: {reason}");
        drop(self.guard.take());
        self.kernel.port.halt(reason)
    }
}

impl<P: Port> Deref for SysLock<'_, P> {
    type Target = KernelState;

    fn deref(&self) -> &KernelState {
        match self.guard.as_deref() {
            Some(state) => state,
            None => fatal("kernel lock used while released"),
        }
    }
}

impl<P: Port> DerefMut for SysLock<'_, P> {
    fn deref_mut(&mut self) -> &mut KernelState {
        self.state_mut()
    }
}

impl<P: Port> Drop for SysLock<'_, P> {
    fn drop(&mut self) {
        #[cfg(feature = "std")]
        if std::thread::panicking() {
            if let Some(state) = self.guard.as_deref_mut() {
                state.halted.get_or_insert("panic inside the kernel");
            }
            return;
        }
        loop {
            let Some(state) = self.guard.as_deref_mut() else {
                return;
            };
            if !core::mem::take(&mut state.preempt_pending) {
                return;
            }
            match state.plan_preemption() {
                Some(switch) => self.perform(switch),
                None => return,
            }
        }
    }
}

/// Interrupt-context kernel lock.
///
/// Only I-class operations are reachable. Dropping it runs the interrupt
/// epilogue: if a switch became due and the interrupt was taken on the
/// running thread it is preempted right away, otherwise the preemption is
/// left pending for the running thread's next kernel exit.
pub struct IsrLock<'k, P: Port> {
    kernel: &'k Kernel<P>,
    guard: Option<MutexGuard<'k, KernelState>>,
}

impl<'k, P: Port> IsrLock<'k, P> {
    pub(crate) fn new(kernel: &'k Kernel<P>, guard: MutexGuard<'k, KernelState>) -> Self {
        Self {
            kernel,
            guard: Some(guard),
        }
    }
}

impl<P: Port> Deref for IsrLock<'_, P> {
    type Target = KernelState;

    fn deref(&self) -> &KernelState {
        match self.guard.as_deref() {
            Some(state) => state,
            None => fatal("kernel lock used while released"),
        }
    }
}

impl<P: Port> DerefMut for IsrLock<'_, P> {
    fn deref_mut(&mut self) -> &mut KernelState {
        match self.guard.as_deref_mut() {
            Some(state) => state,
            None => fatal("kernel lock used while released"),
        }
    }
}

impl<P: Port> Drop for IsrLock<'_, P> {
    fn drop(&mut self) {
        let Some(mut guard) = self.guard.take() else {
            return;
        };
        #[cfg(feature = "std")]
        if std::thread::panicking() {
            guard.halted.get_or_insert("panic inside an interrupt handler");
            return;
        }
        let port = &self.kernel.port;
        let on_running_thread = port.in_thread_context(guard.current);
        let required = guard.is_preemption_required();
        if required && !on_running_thread {
            guard.preempt_pending = true;
        }
        drop(guard);
        port.notify_interrupt();

        if required && on_running_thread {
            let mut sys = self.kernel.lock();
            if let Some(switch) = sys.state_mut().plan_preemption() {
                sys.perform(switch);
            }
        }
    }
}
