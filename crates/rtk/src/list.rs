//! Intrusive, priority-ordered thread queues.
//!
//! Every TCB carries one [`Link`]; a thread sits in at most one queue at a
//! time (the ready list or exactly one wait queue). Queues only store the
//! head, tail and length and walk the links stored in the thread table.

use crate::halt::kassert;
use crate::thread::{ThreadId, ThreadTable};

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Link {
    prev: Option<ThreadId>,
    next: Option<ThreadId>,
    linked: bool,
}

impl Link {
    pub(crate) fn is_linked(&self) -> bool {
        self.linked
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct Queue {
    head: Option<ThreadId>,
    tail: Option<ThreadId>,
    len: usize,
}

impl Queue {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn first(&self) -> Option<ThreadId> {
        self.head
    }

    /// Inserts behind every thread of greater or equal priority.
    pub(crate) fn insert_behind(&mut self, threads: &mut ThreadTable, tid: ThreadId) {
        let prio = threads[tid].priority;
        let mut cursor = self.head;
        while let Some(cur) = cursor {
            if threads[cur].priority < prio {
                break;
            }
            cursor = threads[cur].link.next;
        }
        self.link_before(threads, tid, cursor);
    }

    /// Inserts ahead of every thread of equal priority.
    pub(crate) fn insert_ahead(&mut self, threads: &mut ThreadTable, tid: ThreadId) {
        let prio = threads[tid].priority;
        let mut cursor = self.head;
        while let Some(cur) = cursor {
            if threads[cur].priority <= prio {
                break;
            }
            cursor = threads[cur].link.next;
        }
        self.link_before(threads, tid, cursor);
    }

    pub(crate) fn pop_front(&mut self, threads: &mut ThreadTable) -> Option<ThreadId> {
        let head = self.head?;
        self.remove(threads, head);
        Some(head)
    }

    /// Unlinks `tid`, which must be a member of this queue.
    pub(crate) fn remove(&mut self, threads: &mut ThreadTable, tid: ThreadId) {
        let link = threads[tid].link;
        kassert!(link.linked, "removing a thread that is not queued");
        match link.prev {
            Some(prev) => threads[prev].link.next = link.next,
            None => self.head = link.next,
        }
        match link.next {
            Some(next) => threads[next].link.prev = link.prev,
            None => self.tail = link.prev,
        }
        threads[tid].link = Link::default();
        self.len -= 1;
    }

    /// Re-sorts `tid` after its priority changed.
    pub(crate) fn requeue(&mut self, threads: &mut ThreadTable, tid: ThreadId) {
        self.remove(threads, tid);
        self.insert_behind(threads, tid);
    }

    pub(crate) fn iter<'a>(&self, threads: &'a ThreadTable) -> QueueIter<'a> {
        QueueIter {
            threads,
            cursor: self.head,
        }
    }

    pub(crate) fn contains(&self, threads: &ThreadTable, tid: ThreadId) -> bool {
        self.iter(threads).any(|t| t == tid)
    }

    fn link_before(&mut self, threads: &mut ThreadTable, tid: ThreadId, at: Option<ThreadId>) {
        kassert!(!threads[tid].link.linked, "thread already queued");
        let prev = match at {
            Some(next) => threads[next].link.prev,
            None => self.tail,
        };
        threads[tid].link = Link {
            prev,
            next: at,
            linked: true,
        };
        match prev {
            Some(prev) => threads[prev].link.next = Some(tid),
            None => self.head = Some(tid),
        }
        match at {
            Some(next) => threads[next].link.prev = Some(tid),
            None => self.tail = Some(tid),
        }
        self.len += 1;
    }
}

pub(crate) struct QueueIter<'a> {
    threads: &'a ThreadTable,
    cursor: Option<ThreadId>,
}

impl Iterator for QueueIter<'_> {
    type Item = ThreadId;

    fn next(&mut self) -> Option<ThreadId> {
        let cur = self.cursor?;
        self.cursor = self.threads.get(cur).and_then(|tcb| tcb.link.next);
        Some(cur)
    }
}
