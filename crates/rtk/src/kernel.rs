//! Kernel instance, configuration and the thread API.
//!
//! A [`Kernel`] owns the port and the locked [`KernelState`]. It is shared as
//! an `Arc` between every thread body that needs it. [`KernelBuilder::start`]
//! turns the calling context into the main thread and creates the idle thread.

use alloc::boxed::Box;

use log::{debug, info};

use crate::error::{KernelError, Msg};
use crate::port::Port;
use crate::scheduler::{IsrLock, KernelState, SysLock};
use crate::sync::{Arc, Mutex};
use crate::thread::{
    Priority, Tcb, ThreadBody, ThreadConfig, ThreadHandle, ThreadId, ThreadInfo, ThreadState,
    WaitObject,
};
use crate::time::{Interval, SysTime};
use crate::trace::{records, TraceHook};

/// Kernel-wide configuration.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    pub name: &'static str,
    /// Round-robin time slice in ticks; 0 disables round robin.
    pub time_quantum: u8,
    /// Thread slots, including the main and idle threads.
    pub max_threads: usize,
    /// Smallest workspace accepted for a new thread.
    pub min_workspace: usize,
    pub main_priority: Priority,
    /// Byte written over every new workspace, if any.
    pub stack_fill: Option<u8>,
    /// Verify the ready list, wait queues and timers on every switch.
    pub integrity_checks: bool,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            name: "rtk",
            time_quantum: 0,
            max_threads: 32,
            min_workspace: 128,
            main_priority: Priority::NORMAL,
            stack_fill: Some(0x55),
            integrity_checks: false,
        }
    }
}

impl KernelConfig {
    /// Creates a new kernel configuration builder.
    pub fn builder() -> KernelConfigBuilder {
        KernelConfigBuilder::default()
    }
}

/// Builder for ergonomic kernel configuration construction.
#[derive(Debug, Clone, Default)]
pub struct KernelConfigBuilder {
    config: KernelConfig,
}

impl KernelConfigBuilder {
    /// Sets the kernel name.
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Sets the round-robin quantum in ticks.
    pub fn time_quantum(mut self, ticks: u8) -> Self {
        self.config.time_quantum = ticks;
        self
    }

    pub fn max_threads(mut self, max: usize) -> Self {
        self.config.max_threads = max;
        self
    }

    pub fn min_workspace(mut self, bytes: usize) -> Self {
        self.config.min_workspace = bytes;
        self
    }

    pub fn main_priority(mut self, priority: Priority) -> Self {
        self.config.main_priority = priority;
        self
    }

    pub fn stack_fill(mut self, pattern: Option<u8>) -> Self {
        self.config.stack_fill = pattern;
        self
    }

    pub fn integrity_checks(mut self, enabled: bool) -> Self {
        self.config.integrity_checks = enabled;
        self
    }

    pub fn build(self) -> KernelConfig {
        self.config
    }
}

/// Builder that validates the configuration and starts the kernel.
pub struct KernelBuilder<P: Port> {
    port: P,
    config: KernelConfig,
    trace: Option<TraceHook>,
}

impl<P: Port> KernelBuilder<P> {
    pub fn new(port: P) -> Self {
        Self {
            port,
            config: KernelConfig::default(),
            trace: None,
        }
    }

    pub fn config(mut self, config: KernelConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the trace hook for kernel events.
    pub fn with_trace_hook(mut self, hook: TraceHook) -> Self {
        self.trace = Some(hook);
        self
    }

    /// Adopts the calling context as the main thread, creates the idle
    /// thread and returns the running kernel.
    pub fn start(self) -> Result<Arc<Kernel<P>>, KernelError> {
        let config = self.config;
        if config.max_threads < 2 {
            return Err(KernelError::InvalidConfig(
                "at least two thread slots are needed for main and idle",
            ));
        }
        if config.max_threads > usize::from(u16::MAX) {
            return Err(KernelError::InvalidConfig("too many thread slots"));
        }
        if config.main_priority == Priority::IDLE {
            return Err(KernelError::InvalidPriority {
                priority: config.main_priority,
                reason: "priority 0 is reserved for idle",
            });
        }

        let main = Tcb::new("main", config.main_priority, None);
        let state = KernelState::new(config.max_threads, config.time_quantum, self.trace, main)
            .ok_or(KernelError::ThreadLimit(config.max_threads))?;
        let main_id = state.current();
        state.emit(records::sys::START, &[main_id.trace_byte()]);

        let kernel = Arc::new(Kernel {
            state: Mutex::new(state),
            port: self.port,
            config,
        });
        kernel.port.adopt_current(main_id);

        let idle_kernel = Arc::clone(&kernel);
        let idle = kernel.create_context(
            "idle",
            Priority::IDLE,
            None,
            Box::new(move || -> i32 { idle_kernel.idle_loop() }),
        )?;
        {
            let mut sys = kernel.lock();
            sys.idle = Some(idle);
            sys.ready_i(idle, Msg::Ok);
        }

        info!(
            "kernel '{}' started: main {main_id} at priority {}, quantum {}",
            kernel.config.name, kernel.config.main_priority, kernel.config.time_quantum
        );
        Ok(kernel)
    }
}

/// Preemptive priority-based kernel bound to a port.
pub struct Kernel<P: Port> {
    pub(crate) state: Mutex<KernelState>,
    pub(crate) port: P,
    pub(crate) config: KernelConfig,
}

impl<P: Port> Kernel<P> {
    /// Creates a new kernel builder.
    pub fn builder(port: P) -> KernelBuilder<P> {
        KernelBuilder::new(port)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    /// Enters the kernel from the running thread.
    pub fn lock(&self) -> SysLock<'_, P> {
        let guard = self.state.lock();
        let halted = guard.halted;
        if let Some(reason) = halted {
            drop(guard);
            self.port.halt(reason);
        }
        if !self.port.in_thread_context(guard.current()) {
            drop(guard);
            self.halt("thread API called outside the running thread");
        }
        SysLock::new(self, guard)
    }

    /// Enters the kernel from an interrupt handler.
    pub fn lock_from_isr(&self) -> IsrLock<'_, P> {
        let guard = self.state.lock();
        let halted = guard.halted;
        if let Some(reason) = halted {
            drop(guard);
            self.port.halt(reason);
        }
        IsrLock::new(self, guard)
    }

    /// Runs `f` as an interrupt handler.
    pub fn isr<R>(&self, f: impl FnOnce(&mut KernelState) -> R) -> R {
        let mut isr = self.lock_from_isr();
        f(&mut *isr)
    }

    /// System tick interrupt.
    pub fn tick(&self) {
        self.isr(KernelState::tick_i);
    }

    /// Stops the kernel for good; every later kernel entry halts as well.
    pub fn halt(&self, reason: &'static str) -> ! {
        {
            let mut state = self.state.lock();
            state.halted.get_or_insert(reason);
            state.emit(records::sys::HALT, reason.as_bytes());
        }
        log::error!("kernel halted: {reason}");
        self.port.halt(reason)
    }

    pub fn is_halted(&self) -> bool {
        self.state.lock().halted.is_some()
    }

    /// Walks every kernel list and halts on the first inconsistency.
    pub fn check_integrity(&self) {
        let mut sys = self.lock();
        let outcome = sys.check_integrity();
        if let Err(reason) = outcome {
            sys.halt(reason);
        }
    }

    pub fn system_time(&self) -> SysTime {
        self.state.lock().now()
    }

    /// Identifier of the calling thread.
    pub fn current_thread(&self) -> ThreadId {
        self.lock().current()
    }

    pub fn thread_info(&self, tid: ThreadId) -> Option<ThreadInfo> {
        self.state.lock().thread_info(tid)
    }

    /// Inserts a suspended TCB and prepares its execution context.
    fn create_context(
        self: &Arc<Self>,
        name: &'static str,
        priority: Priority,
        storage: Option<Box<dyn crate::storage::ThreadStorage>>,
        body: ThreadBody,
    ) -> Result<ThreadId, KernelError> {
        let id = {
            let mut sys = self.lock();
            sys.reap_zombies();
            let quantum = sys.quantum;
            let mut tcb = Tcb::new(name, priority, storage);
            tcb.ticks = quantum;
            let id = sys
                .threads
                .insert(tcb)
                .ok_or(KernelError::ThreadLimit(self.config.max_threads))?;
            sys.emit(records::thread::CREATE, &[id.trace_byte(), priority.0]);
            id
        };
        let kernel = Arc::clone(self);
        self.port.create_context(
            id,
            name,
            Box::new(move || {
                let code = body();
                kernel.exit(code)
            }),
        );
        debug!("thread {id} ({name}) created at priority {priority}");
        Ok(id)
    }

    /// Creates a thread in the suspended state; start it with
    /// [`Self::resume`].
    pub fn create_thread(self: &Arc<Self>, config: ThreadConfig) -> Result<ThreadHandle, KernelError> {
        let ThreadConfig {
            name,
            priority,
            mut storage,
            body,
        } = config;
        if priority == Priority::IDLE {
            self.halt("priority 0 is reserved for idle");
        }
        let workspace = storage.workspace();
        if workspace.len() < self.config.min_workspace {
            self.halt("thread workspace below the configured minimum");
        }
        if let Some(pattern) = self.config.stack_fill {
            workspace.fill(pattern);
        }
        let id = self.create_context(name, priority, Some(storage), body)?;
        Ok(ThreadHandle::new(id))
    }

    /// Creates a thread and makes it ready at once, switching to it if it
    /// outranks the caller.
    pub fn spawn(self: &Arc<Self>, config: ThreadConfig) -> Result<ThreadHandle, KernelError> {
        let handle = self.create_thread(config)?;
        self.resume(&handle);
        Ok(handle)
    }

    /// Starts a suspended thread.
    pub fn resume(&self, handle: &ThreadHandle) {
        let mut sys = self.lock();
        let tid = handle.id();
        if sys.threads[tid].state != ThreadState::Suspended {
            sys.halt("resuming a thread that is not suspended");
        }
        sys.wakeup_s(tid, Msg::Ok);
    }

    /// Changes the caller's base priority and returns the previous one. An
    /// inherited priority above `new` stays in effect until released.
    pub fn set_priority(&self, new: Priority) -> Priority {
        let mut sys = self.lock();
        if new == Priority::IDLE {
            sys.halt("priority 0 is reserved for idle");
        }
        let cur = sys.current();
        let tcb = &mut sys.threads[cur];
        let old = tcb.real_priority;
        let effective_before = tcb.priority;
        if tcb.priority == tcb.real_priority || new > tcb.priority {
            tcb.priority = new;
        }
        tcb.real_priority = new;
        let effective = tcb.priority;
        if effective != effective_before {
            sys.emit(
                records::sched::PRIORITY,
                &[cur.trace_byte(), effective_before.0, effective.0],
            );
        }
        sys.reschedule_s();
        old
    }

    /// Suspends the caller for `interval` ticks.
    pub fn sleep(&self, interval: Interval) {
        if interval.is_immediate() {
            return;
        }
        let mut sys = self.lock();
        sys.go_to_sleep_timeout_s(ThreadState::Sleeping, interval);
    }

    /// Suspends the caller until the system time reaches `time`. A time that
    /// just passed wraps into a long sleep.
    pub fn sleep_until(&self, time: SysTime) {
        let mut sys = self.lock();
        let interval = time.wrapping_since(sys.now());
        if !interval.is_immediate() {
            sys.go_to_sleep_timeout_s(ThreadState::Sleeping, interval);
        }
    }

    /// Lets ready threads of equal priority run first.
    pub fn yield_now(&self) {
        self.lock().yield_s();
    }

    /// Terminates the caller with `code`, waking every joiner.
    pub fn exit(&self, code: i32) -> ! {
        let mut sys = self.lock();
        let st = sys.state_mut();
        let cur = st.current();
        if st.threads[cur].owned_mutexes.is_some() {
            sys.halt("thread exiting while owning mutexes");
        }
        let st = sys.state_mut();
        st.threads[cur].exit_code = code;
        while let Some(joiner) = st.joiners[cur.index()].pop_front(&mut st.threads) {
            st.ready_i(joiner, Msg::Ok);
        }
        if st.threads[cur].refs == 0 {
            st.zombies.push(cur);
        }
        let mut code_bytes = [0u8; 5];
        code_bytes[0] = cur.trace_byte();
        code_bytes[1..].copy_from_slice(&code.to_le_bytes());
        st.emit(records::thread::EXIT, &code_bytes);
        debug!("thread {cur} ({}) exited with {code}", st.threads[cur].name);
        let switch = st.plan_sleep(ThreadState::Final);
        sys.retire_s(switch)
    }

    /// Blocks until the thread behind `handle` terminates, consumes the
    /// handle and returns the exit code.
    pub fn wait_for_exit(&self, handle: ThreadHandle) -> i32 {
        let tid = handle.id();
        let mut sys = self.lock();
        let cur = sys.current();
        if tid == cur {
            sys.halt("thread waiting for its own exit");
        }
        if sys.threads[tid].state != ThreadState::Final {
            sys.enqueue_current(WaitObject::Exit(tid));
            sys.go_to_sleep_s(ThreadState::WaitingExit);
        }
        let code = sys.threads[tid].exit_code;
        release_ref(&mut sys, tid);
        debug!("thread {tid} joined by {cur} with {code}");
        code
    }

    /// Adds a reference to a thread.
    pub fn add_ref(&self, handle: &ThreadHandle) -> ThreadHandle {
        let tid = handle.id();
        let mut sys = self.lock();
        if sys.threads[tid].refs == u8::MAX {
            sys.halt("thread reference count overflow");
        }
        sys.threads[tid].refs += 1;
        ThreadHandle::new(tid)
    }

    /// Drops a reference; a terminated thread with no references left has
    /// its workspace reclaimed.
    pub fn release(&self, handle: ThreadHandle) {
        let mut sys = self.lock();
        release_ref(&mut sys, handle.id());
    }

    /// Asks a thread to terminate; it observes the request through
    /// [`Self::should_terminate`].
    pub fn request_terminate(&self, handle: &ThreadHandle) {
        let mut sys = self.lock();
        sys.threads[handle.id()].terminate = true;
    }

    /// Whether termination was requested for the caller.
    pub fn should_terminate(&self) -> bool {
        let sys = self.lock();
        sys.threads[sys.current()].terminate
    }

    fn idle_loop(&self) -> ! {
        loop {
            let epoch = self.port.irq_epoch();
            let mut sys = self.lock();
            sys.reap_zombies();
            if let Some(switch) = sys.state_mut().plan_reschedule() {
                sys.perform(switch);
                continue;
            }
            if self.port.fast_forward_idle() {
                if let Some(ticks) = sys.timers.next_deadline() {
                    sys.emit(records::sched::IDLE, &ticks.to_le_bytes());
                    sys.advance_time(ticks);
                    sys.reschedule_s();
                    continue;
                }
            }
            drop(sys);
            self.port.wait_for_interrupt(epoch);
        }
    }
}

fn release_ref<P: Port>(sys: &mut SysLock<'_, P>, tid: ThreadId) {
    if sys.threads[tid].refs == 0 {
        sys.halt("thread reference released twice");
    }
    let st = sys.state_mut();
    let tcb = &mut st.threads[tid];
    tcb.refs -= 1;
    if tcb.refs == 0 && tcb.state == ThreadState::Final {
        st.dispose(tid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder_sets_fields() {
        let config = KernelConfig::builder()
            .name("test")
            .time_quantum(4)
            .max_threads(8)
            .min_workspace(64)
            .main_priority(Priority(10))
            .stack_fill(None)
            .integrity_checks(true)
            .build();
        assert_eq!(config.name, "test");
        assert_eq!(config.time_quantum, 4);
        assert_eq!(config.max_threads, 8);
        assert_eq!(config.min_workspace, 64);
        assert_eq!(config.main_priority, Priority(10));
        assert_eq!(config.stack_fill, None);
        assert!(config.integrity_checks);
    }

    #[cfg(feature = "std")]
    #[test]
    fn builder_rejects_idle_main_priority() {
        let config = KernelConfig::builder().main_priority(Priority::IDLE).build();
        let result = Kernel::builder(crate::port::HostPort::new()).config(config).start();
        assert!(matches!(result, Err(KernelError::InvalidPriority { .. })));
    }

    #[cfg(feature = "std")]
    #[test]
    fn builder_rejects_single_thread_slot() {
        let config = KernelConfig::builder().max_threads(1).build();
        let result = Kernel::builder(crate::port::HostPort::new()).config(config).start();
        assert!(matches!(result, Err(KernelError::InvalidConfig(_))));
    }
}
