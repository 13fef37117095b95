//! Event sources, listeners and per-thread pending events.
//!
//! Every thread carries a mask of pending events. Threads are signalled
//! directly or through an [`EventSource`] broadcasting to its registered
//! [`EventListener`]s, each of which ORs its own mask into its thread's
//! pending set. Listeners also accumulate the flags of every broadcast so a
//! thread can tell which condition fired.

use crate::error::Msg;
use crate::halt::fatal;
use crate::kernel::Kernel;
use crate::port::Port;
use crate::scheduler::{KernelState, SysLock};
use crate::thread::{ThreadId, ThreadState};
use crate::time::Interval;
use crate::trace::records;

/// Set of event bits; bit `n` is event id `n`.
pub type EventMask = u32;
/// Flags carried by a broadcast, accumulated per listener.
pub type EventFlags = u32;
/// Index of a single event bit.
pub type EventId = u32;

pub const ALL_EVENTS: EventMask = EventMask::MAX;
pub const ALL_FLAGS: EventFlags = EventFlags::MAX;

/// Mask with only the bit for `id` set. Valid ids are `0..32`; anything
/// larger halts.
pub const fn event_mask(id: EventId) -> EventMask {
    let bit: EventMask = 1;
    match bit.checked_shl(id) {
        Some(mask) => mask,
        None => panic!("kernel halted: event id out of range"),
    }
}

/// Handle to an event source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventSource(u16);

/// Handle to an event listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventListener(u16);

impl EventSource {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl EventListener {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Default)]
pub(crate) struct SourceCb {
    head: Option<EventListener>,
}

#[derive(Debug)]
pub(crate) struct ListenerCb {
    next: Option<EventListener>,
    source: Option<EventSource>,
    thread: Option<ThreadId>,
    events: EventMask,
    flags: EventFlags,
    wflags: EventFlags,
}

impl ListenerCb {
    const fn new() -> Self {
        Self {
            next: None,
            source: None,
            thread: None,
            events: 0,
            flags: 0,
            wflags: ALL_FLAGS,
        }
    }
}

/// Calls `handlers[i]` for every bit `i` set in `mask`, lowest bit first.
pub fn dispatch(handlers: &mut [&mut dyn FnMut(EventId)], mask: EventMask) {
    let mut remaining = mask;
    while remaining != 0 {
        let id = remaining.trailing_zeros();
        remaining &= remaining - 1;
        match handlers.get_mut(id as usize) {
            Some(handler) => handler(id),
            None => fatal("event without a handler"),
        }
    }
}

impl KernelState {
    /// ORs `mask` into the pending events of `tid`, readying it when its
    /// wait condition is met.
    pub fn signal_thread_i(&mut self, tid: ThreadId, mask: EventMask) {
        let Some(tcb) = self.threads.get_mut(tid) else {
            return;
        };
        tcb.pending_events |= mask;
        let pending = tcb.pending_events & tcb.wait_mask;
        let satisfied = match tcb.state {
            ThreadState::WaitingEventsAny => pending != 0,
            ThreadState::WaitingEventsAll => pending == tcb.wait_mask,
            _ => false,
        };
        let mut payload = [0u8; 5];
        payload[0] = tid.trace_byte();
        payload[1..].copy_from_slice(&mask.to_le_bytes());
        self.emit(records::evt::SIGNAL, &payload);
        if satisfied {
            self.ready_i(tid, Msg::Ok);
        }
    }

    /// Adds `flags` to every listener of `source` and signals the threads of
    /// those whose wanted flags match. Zero flags signal every listener.
    pub fn broadcast_flags_i(&mut self, source: EventSource, flags: EventFlags) {
        let mut payload = [0u8; 6];
        payload[..2].copy_from_slice(&source.0.to_le_bytes());
        payload[2..].copy_from_slice(&flags.to_le_bytes());
        self.emit(records::evt::BROADCAST, &payload);

        let mut cursor = self.sources[source.index()].head;
        while let Some(listener) = cursor {
            let cb = &mut self.listeners[listener.index()];
            cb.flags |= flags;
            cursor = cb.next;
            if flags == 0 || flags & cb.wflags != 0 {
                if let Some(thread) = cb.thread {
                    let events = cb.events;
                    self.signal_thread_i(thread, events);
                }
            }
        }
    }

    pub fn broadcast_i(&mut self, source: EventSource) {
        self.broadcast_flags_i(source, 0);
    }

    fn register_listener(
        &mut self,
        source: EventSource,
        listener: EventListener,
        events: EventMask,
        wflags: EventFlags,
    ) {
        crate::halt::kassert!(
            self.listeners[listener.index()].source.is_none(),
            "listener already registered"
        );
        let thread = self.current;
        let cb = &mut self.listeners[listener.index()];
        *cb = ListenerCb {
            next: None,
            source: Some(source),
            thread: Some(thread),
            events,
            flags: 0,
            wflags,
        };

        match self.sources[source.index()].head {
            None => self.sources[source.index()].head = Some(listener),
            Some(mut tail) => {
                while let Some(next) = self.listeners[tail.index()].next {
                    tail = next;
                }
                self.listeners[tail.index()].next = Some(listener);
            }
        }
    }

    fn unregister_listener(&mut self, source: EventSource, listener: EventListener) {
        let mut prev: Option<EventListener> = None;
        let mut cursor = self.sources[source.index()].head;
        while let Some(current) = cursor {
            let next = self.listeners[current.index()].next;
            if current == listener {
                match prev {
                    None => self.sources[source.index()].head = next,
                    Some(p) => self.listeners[p.index()].next = next,
                }
                self.listeners[listener.index()] = ListenerCb::new();
                return;
            }
            prev = Some(current);
            cursor = next;
        }
    }

    /// Takes and clears the flags accumulated by `listener`.
    pub fn get_and_clear_flags_i(&mut self, listener: EventListener) -> EventFlags {
        core::mem::take(&mut self.listeners[listener.index()].flags)
    }
}

/// How a wait decides the caller's pending events satisfy it.
#[derive(Clone, Copy, PartialEq, Eq)]
enum WaitMode {
    One,
    Any,
    All,
}

impl<P: Port> SysLock<'_, P> {
    pub fn signal_thread_s(&mut self, tid: ThreadId, mask: EventMask) {
        self.signal_thread_i(tid, mask);
        self.reschedule_s();
    }

    pub fn broadcast_flags_s(&mut self, source: EventSource, flags: EventFlags) {
        self.broadcast_flags_i(source, flags);
        self.reschedule_s();
    }

    fn wait_events_s(&mut self, mode: WaitMode, mask: EventMask, timeout: Interval) -> EventMask {
        let cur = self.current();
        let ready = |pending: EventMask| match mode {
            WaitMode::One | WaitMode::Any => pending & mask != 0,
            WaitMode::All => pending & mask == mask,
        };
        if !ready(self.threads[cur].pending_events) {
            if timeout.is_immediate() {
                return 0;
            }
            self.threads[cur].wait_mask = mask;
            let state = match mode {
                WaitMode::All => ThreadState::WaitingEventsAll,
                _ => ThreadState::WaitingEventsAny,
            };
            if self.go_to_sleep_timeout_s(state, timeout) != Msg::Ok {
                return 0;
            }
        }

        let tcb = &mut self.state_mut().threads[cur];
        let delivered = match mode {
            WaitMode::One => {
                let m = tcb.pending_events & mask;
                m & m.wrapping_neg()
            }
            WaitMode::Any => tcb.pending_events & mask,
            WaitMode::All => mask,
        };
        tcb.pending_events &= !delivered;
        delivered
    }
}

impl<P: Port> Kernel<P> {
    pub fn create_event_source(&self) -> EventSource {
        let mut sys = self.lock();
        if sys.sources.len() >= usize::from(u16::MAX) {
            sys.halt("event source table full");
        }
        sys.sources.push(SourceCb::default());
        EventSource((sys.sources.len() - 1) as u16)
    }

    pub fn create_listener(&self) -> EventListener {
        let mut sys = self.lock();
        if sys.listeners.len() >= usize::from(u16::MAX) {
            sys.halt("event listener table full");
        }
        sys.listeners.push(ListenerCb::new());
        EventListener((sys.listeners.len() - 1) as u16)
    }

    /// Registers `listener` on `source` for the calling thread. Broadcasts
    /// will OR `events` into the caller's pending events.
    pub fn register(&self, source: EventSource, listener: EventListener, events: EventMask) {
        self.register_with_flags(source, listener, events, ALL_FLAGS);
    }

    /// As [`Self::register`], signalling only for broadcasts whose flags
    /// intersect `wflags`.
    pub fn register_with_flags(
        &self,
        source: EventSource,
        listener: EventListener,
        events: EventMask,
        wflags: EventFlags,
    ) {
        self.lock().register_listener(source, listener, events, wflags);
    }

    /// Removes `listener` from `source`; a listener not registered there is
    /// ignored.
    pub fn unregister(&self, source: EventSource, listener: EventListener) {
        self.lock().unregister_listener(source, listener);
    }

    pub fn signal_thread(&self, tid: ThreadId, mask: EventMask) {
        self.lock().signal_thread_s(tid, mask);
    }

    pub fn broadcast(&self, source: EventSource) {
        self.lock().broadcast_flags_s(source, 0);
    }

    pub fn broadcast_flags(&self, source: EventSource, flags: EventFlags) {
        self.lock().broadcast_flags_s(source, flags);
    }

    /// Waits for any event in `mask` and returns only the lowest pending one.
    pub fn wait_one(&self, mask: EventMask) -> EventMask {
        self.lock().wait_events_s(WaitMode::One, mask, Interval::INFINITE)
    }

    pub fn wait_one_timeout(&self, mask: EventMask, timeout: Interval) -> EventMask {
        self.lock().wait_events_s(WaitMode::One, mask, timeout)
    }

    /// Waits for any event in `mask` and returns every pending one of them.
    pub fn wait_any(&self, mask: EventMask) -> EventMask {
        self.lock().wait_events_s(WaitMode::Any, mask, Interval::INFINITE)
    }

    pub fn wait_any_timeout(&self, mask: EventMask, timeout: Interval) -> EventMask {
        self.lock().wait_events_s(WaitMode::Any, mask, timeout)
    }

    /// Waits until every event in `mask` is pending and clears exactly those.
    pub fn wait_all(&self, mask: EventMask) -> EventMask {
        self.lock().wait_events_s(WaitMode::All, mask, Interval::INFINITE)
    }

    pub fn wait_all_timeout(&self, mask: EventMask, timeout: Interval) -> EventMask {
        self.lock().wait_events_s(WaitMode::All, mask, timeout)
    }

    /// Adds `mask` to the caller's pending events and returns the new set.
    pub fn add_events(&self, mask: EventMask) -> EventMask {
        let mut sys = self.lock();
        let cur = sys.current();
        let tcb = &mut sys.threads[cur];
        tcb.pending_events |= mask;
        tcb.pending_events
    }

    /// Clears `mask` from the caller's pending events and returns the bits
    /// that were set.
    pub fn get_and_clear_events(&self, mask: EventMask) -> EventMask {
        let mut sys = self.lock();
        let cur = sys.current();
        let tcb = &mut sys.threads[cur];
        let taken = tcb.pending_events & mask;
        tcb.pending_events &= !mask;
        taken
    }

    pub fn get_and_clear_flags(&self, listener: EventListener) -> EventFlags {
        self.lock().get_and_clear_flags_i(listener)
    }
}
