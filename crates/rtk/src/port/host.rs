//! Port that runs kernel threads as OS threads.
//!
//! Each kernel thread owns an OS thread gated by a baton; exactly one baton
//! is held at any time, so kernel and user code execute as on a single core.
//! Interrupt handlers are plain function calls made from any other OS thread.

use std::any::Any;
use std::cell::Cell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use super::{Port, ThreadEntry};
use crate::halt::HALT_PREFIX;
use crate::thread::ThreadId;

static NEXT_PORT_ID: AtomicUsize = AtomicUsize::new(1);

thread_local! {
    /// Kernel thread the current OS thread runs, tagged with its port.
    static CONTEXT: Cell<Option<(usize, ThreadId)>> = const { Cell::new(None) };
    /// Whether the current OS thread was spawned by a host port.
    static SPAWNED: Cell<bool> = const { Cell::new(false) };
}

/// Unwind payload ending the OS thread of a retired kernel thread.
struct Retired;

struct Baton {
    turn: Mutex<bool>,
    cv: Condvar,
}

impl Baton {
    fn new() -> Self {
        Self {
            turn: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    fn give(&self) {
        *self.turn.lock() = true;
        self.cv.notify_one();
    }

    fn take(&self, shared: &Shared) {
        let mut turn = self.turn.lock();
        while !*turn {
            if shared.halted.load(Ordering::SeqCst) {
                drop(turn);
                shared.panic_halted();
            }
            self.cv.wait(&mut turn);
        }
        *turn = false;
    }
}

struct Shared {
    id: usize,
    batons: Mutex<HashMap<ThreadId, Arc<Baton>>>,
    halted: AtomicBool,
    reason: Mutex<Option<String>>,
    irq_epoch: Mutex<u64>,
    irq_cv: Condvar,
    fast_forward: bool,
}

impl Shared {
    fn baton(&self, id: ThreadId) -> Arc<Baton> {
        Arc::clone(
            self.batons
                .lock()
                .entry(id)
                .or_insert_with(|| Arc::new(Baton::new())),
        )
    }

    fn poison(&self, reason: String) {
        self.reason.lock().get_or_insert(reason);
        self.halted.store(true, Ordering::SeqCst);
        for baton in self.batons.lock().values() {
            let _turn = baton.turn.lock();
            baton.cv.notify_all();
        }
        let _epoch = self.irq_epoch.lock();
        self.irq_cv.notify_all();
    }

    fn panic_halted(&self) -> ! {
        let reason = self.reason.lock().clone().unwrap_or_default();
        panic!("{HALT_PREFIX}{reason}")
    }

    fn check_halted(&self) {
        if self.halted.load(Ordering::SeqCst) {
            self.panic_halted();
        }
    }
}

fn describe(payload: &(dyn Any + Send)) -> String {
    let msg = if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "thread panicked".to_owned()
    };
    match msg.strip_prefix(HALT_PREFIX) {
        Some(reason) => reason.to_owned(),
        None => msg,
    }
}

/// Simulation port backed by `std::thread`.
#[derive(Clone)]
pub struct HostPort {
    shared: Arc<Shared>,
}

impl HostPort {
    /// Creates a port whose idle thread fast-forwards virtual time.
    pub fn new() -> Self {
        Self::with_fast_forward(true)
    }

    /// With fast-forward disabled, time only advances through `Kernel::tick`.
    pub fn with_fast_forward(enabled: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: NEXT_PORT_ID.fetch_add(1, Ordering::Relaxed),
                batons: Mutex::new(HashMap::new()),
                halted: AtomicBool::new(false),
                reason: Mutex::new(None),
                irq_epoch: Mutex::new(0),
                irq_cv: Condvar::new(),
                fast_forward: enabled,
            }),
        }
    }

    pub fn is_halted(&self) -> bool {
        self.shared.halted.load(Ordering::SeqCst)
    }

    /// Reason passed to the first halt, if any.
    pub fn halt_reason(&self) -> Option<String> {
        self.shared.reason.lock().clone()
    }
}

impl Default for HostPort {
    fn default() -> Self {
        Self::new()
    }
}

impl Port for HostPort {
    fn adopt_current(&self, id: ThreadId) {
        self.shared.baton(id);
        CONTEXT.with(|c| c.set(Some((self.shared.id, id))));
    }

    fn create_context(&self, id: ThreadId, name: &'static str, entry: ThreadEntry) {
        let baton = self.shared.baton(id);
        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name(name.to_owned())
            .spawn(move || {
                CONTEXT.with(|c| c.set(Some((shared.id, id))));
                SPAWNED.with(|s| s.set(true));
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    baton.take(&shared);
                    entry();
                }));
                if let Err(payload) = outcome {
                    if !payload.is::<Retired>() {
                        let reason = describe(payload.as_ref());
                        log::error!("thread {id} panicked: {reason}");
                        shared.poison(reason);
                    }
                }
            });
        if spawned.is_err() {
            self.halt("cannot spawn host thread");
        }
    }

    fn switch(&self, from: ThreadId, to: ThreadId) {
        self.shared.check_halted();
        let next = self.shared.baton(to);
        let this = self.shared.baton(from);
        next.give();
        this.take(&self.shared);
    }

    fn retire(&self, from: ThreadId, to: ThreadId) -> ! {
        let next = self.shared.baton(to);
        self.shared.batons.lock().remove(&from);
        next.give();
        if SPAWNED.with(Cell::get) {
            panic::resume_unwind(Box::new(Retired))
        }
        panic!("adopted thread {from} exited the kernel")
    }

    fn in_thread_context(&self, id: ThreadId) -> bool {
        CONTEXT.with(|c| c.get() == Some((self.shared.id, id)))
    }

    fn irq_epoch(&self) -> u64 {
        *self.shared.irq_epoch.lock()
    }

    fn notify_interrupt(&self) {
        let mut epoch = self.shared.irq_epoch.lock();
        *epoch = epoch.wrapping_add(1);
        self.shared.irq_cv.notify_all();
    }

    fn wait_for_interrupt(&self, epoch: u64) {
        let mut current = self.shared.irq_epoch.lock();
        while *current == epoch {
            if self.shared.halted.load(Ordering::SeqCst) {
                drop(current);
                self.shared.panic_halted();
            }
            self.shared.irq_cv.wait(&mut current);
        }
    }

    fn fast_forward_idle(&self) -> bool {
        self.shared.fast_forward
    }

    fn halt(&self, reason: &str) -> ! {
        self.shared.poison(reason.to_owned());
        self.shared.panic_halted()
    }
}
