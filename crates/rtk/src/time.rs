//! System time, intervals and the virtual timer list.
//!
//! Time is counted in ticks of a free-running `u32` counter that wraps. The
//! timer list is a delta list: each entry stores the ticks remaining after the
//! entry before it, so a tick only ever touches the head.

use alloc::vec::Vec;
use core::fmt;

use crate::thread::ThreadId;

/// Absolute system time in ticks since the kernel started (wrapping).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct SysTime(pub u32);

impl SysTime {
    pub const fn ticks(self) -> u32 {
        self.0
    }

    /// Time `interval` ticks after `self`, wrapping around the counter.
    pub const fn wrapping_add(self, interval: Interval) -> SysTime {
        SysTime(self.0.wrapping_add(interval.0))
    }

    /// Ticks from `earlier` to `self`, modulo the counter width.
    pub const fn wrapping_since(self, earlier: SysTime) -> Interval {
        Interval(self.0.wrapping_sub(earlier.0))
    }
}

impl fmt::Display for SysTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// A relative duration in ticks, used for sleeps and timeouts.
///
/// Two values are special: [`Interval::IMMEDIATE`] never blocks and
/// [`Interval::INFINITE`] never times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Interval(u32);

impl Interval {
    /// Do not wait at all.
    pub const IMMEDIATE: Interval = Interval(0);
    /// Wait without a deadline.
    pub const INFINITE: Interval = Interval(u32::MAX);

    pub const fn ticks(ticks: u32) -> Self {
        Interval(ticks)
    }

    pub const fn as_ticks(self) -> u32 {
        self.0
    }

    pub const fn is_immediate(self) -> bool {
        self.0 == 0
    }

    pub const fn is_infinite(self) -> bool {
        self.0 == u32::MAX
    }
}

/// Identifies one arming of a virtual timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u32);

#[derive(Debug, Clone, Copy)]
struct Entry {
    id: TimerId,
    delta: u32,
    thread: ThreadId,
}

/// Delta-encoded list of armed timeouts, each waking one thread.
#[derive(Debug)]
pub(crate) struct TimerList {
    now: SysTime,
    entries: Vec<Entry>,
    next_id: u32,
}

impl TimerList {
    /// Every thread arms at most one timer, so `capacity` slots never grow.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            now: SysTime::default(),
            entries: Vec::with_capacity(capacity),
            next_id: 0,
        }
    }

    pub(crate) fn now(&self) -> SysTime {
        self.now
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    /// Arms a timer that expires `delay` ticks from now. Timers sharing a
    /// deadline expire in arming order.
    pub(crate) fn arm(&mut self, delay: u32, thread: ThreadId) -> TimerId {
        debug_assert!(delay > 0);
        let id = TimerId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);

        let mut delta = delay;
        let mut pos = 0;
        while pos < self.entries.len() && self.entries[pos].delta <= delta {
            delta -= self.entries[pos].delta;
            pos += 1;
        }
        if let Some(next) = self.entries.get_mut(pos) {
            next.delta -= delta;
        }
        self.entries.insert(pos, Entry { id, delta, thread });
        id
    }

    /// Removes an armed timer; returns `false` if it already fired.
    pub(crate) fn disarm(&mut self, id: TimerId) -> bool {
        let Some(pos) = self.entries.iter().position(|e| e.id == id) else {
            return false;
        };
        let removed = self.entries.remove(pos);
        if let Some(next) = self.entries.get_mut(pos) {
            next.delta += removed.delta;
        }
        true
    }

    pub(crate) fn is_armed(&self, id: TimerId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    /// Advances time by `ticks`, never past the head deadline.
    pub(crate) fn advance(&mut self, ticks: u32) {
        self.now = self.now.wrapping_add(Interval(ticks));
        if let Some(head) = self.entries.first_mut() {
            head.delta = head.delta.saturating_sub(ticks);
        }
    }

    /// Pops the next timer whose deadline has been reached.
    pub(crate) fn pop_expired(&mut self) -> Option<(TimerId, ThreadId)> {
        match self.entries.first() {
            Some(head) if head.delta == 0 => {
                let head = self.entries.remove(0);
                Some((head.id, head.thread))
            }
            _ => None,
        }
    }

    /// Ticks until the earliest deadline.
    pub(crate) fn next_deadline(&self) -> Option<u32> {
        self.entries.first().map(|e| e.delta)
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (TimerId, ThreadId)> + '_ {
        self.entries.iter().map(|e| (e.id, e.thread))
    }
}
