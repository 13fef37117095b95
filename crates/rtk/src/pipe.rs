//! Bounded byte pipes.
//!
//! A pipe is a fixed ring buffer with one thread queue for blocked writers
//! and one for blocked readers. Transfers move as much as fits, then wait for
//! the other side. A reset empties the buffer and poisons the pipe: every
//! waiting and later transfer fails with [`PipeError::Reset`] until
//! [`Kernel::resume_pipe`].

use alloc::boxed::Box;
use alloc::vec;

use crate::error::{KernelError, Msg, PipeError};
use crate::kernel::Kernel;
use crate::port::Port;
use crate::queue::ThreadQueue;
use crate::scheduler::{KernelState, SysLock};
use crate::time::{Interval, SysTime};
use crate::trace::records;

/// Handle to a kernel pipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Pipe(u16);

impl Pipe {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Circular byte buffer.
#[derive(Debug)]
struct RingBuffer {
    buffer: Box<[u8]>,
    rd: usize,
    wr: usize,
    count: usize,
}

impl RingBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            rd: 0,
            wr: 0,
            count: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    fn len(&self) -> usize {
        self.count
    }

    fn clear(&mut self) {
        self.rd = 0;
        self.wr = 0;
        self.count = 0;
    }

    /// Copies as much of `data` as fits and returns the number of bytes taken.
    fn push(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.capacity() - self.count);
        let first = n.min(self.capacity() - self.wr);
        self.buffer[self.wr..self.wr + first].copy_from_slice(&data[..first]);
        self.buffer[..n - first].copy_from_slice(&data[first..n]);
        self.wr = (self.wr + n) % self.capacity();
        self.count += n;
        n
    }

    /// Fills as much of `out` as data allows and returns the byte count.
    fn pop(&mut self, out: &mut [u8]) -> usize {
        let n = out.len().min(self.count);
        let first = n.min(self.capacity() - self.rd);
        out[..first].copy_from_slice(&self.buffer[self.rd..self.rd + first]);
        out[first..n].copy_from_slice(&self.buffer[..n - first]);
        self.rd = (self.rd + n) % self.capacity();
        self.count -= n;
        n
    }
}

#[derive(Debug)]
pub(crate) struct PipeCb {
    ring: RingBuffer,
    reset: bool,
    writers: ThreadQueue,
    readers: ThreadQueue,
}

impl KernelState {
    /// Empties `pipe`, poisons it and fails every waiter with `Reset`.
    pub fn pipe_reset_i(&mut self, pipe: Pipe) {
        let cb = &mut self.pipes[pipe.index()];
        cb.ring.clear();
        cb.reset = true;
        let (writers, readers) = (cb.writers, cb.readers);
        self.dequeue_all_i(writers, Msg::Reset);
        self.dequeue_all_i(readers, Msg::Reset);
        self.emit(records::pipe::RESET, &pipe.0.to_le_bytes());
    }

    /// Bytes currently buffered in `pipe`.
    pub fn pipe_len(&self, pipe: Pipe) -> usize {
        self.pipes[pipe.index()].ring.len()
    }

    pub fn pipe_capacity(&self, pipe: Pipe) -> usize {
        self.pipes[pipe.index()].ring.capacity()
    }
}

/// Ticks left of `budget` counted from `start`.
fn remaining(now: SysTime, start: SysTime, budget: Interval) -> Interval {
    if budget.is_infinite() {
        return Interval::INFINITE;
    }
    let elapsed = now.wrapping_since(start).as_ticks();
    Interval::ticks(budget.as_ticks().saturating_sub(elapsed))
}

impl<P: Port> SysLock<'_, P> {
    /// Writes all of `data` unless the timeout elapses first, returning the
    /// byte count. A timeout after a partial transfer reports the partial
    /// count; a timeout with nothing written is an error.
    pub fn pipe_write_s(
        &mut self,
        pipe: Pipe,
        data: &[u8],
        timeout: Interval,
    ) -> Result<usize, PipeError> {
        let start = self.now();
        let mut done = 0;
        while done < data.len() {
            let st = self.state_mut();
            let cb = &mut st.pipes[pipe.index()];
            if cb.reset {
                return Err(PipeError::Reset);
            }
            let n = cb.ring.push(&data[done..]);
            let (writers, readers) = (cb.writers, cb.readers);
            if n > 0 {
                done += n;
                st.dequeue_all_i(readers, Msg::Ok);
                continue;
            }
            let left = remaining(st.now(), start, timeout);
            match self.enqueue_timeout_s(writers, left) {
                Msg::Ok => {}
                Msg::Timeout => break,
                Msg::Reset => return Err(PipeError::Reset),
            }
        }
        self.reschedule_s();
        if done == 0 && !data.is_empty() {
            return Err(PipeError::Timeout);
        }
        Ok(done)
    }

    /// Reads until `out` is full or the timeout elapses. Same result rules
    /// as [`Self::pipe_write_s`].
    pub fn pipe_read_s(
        &mut self,
        pipe: Pipe,
        out: &mut [u8],
        timeout: Interval,
    ) -> Result<usize, PipeError> {
        let start = self.now();
        let mut done = 0;
        while done < out.len() {
            let st = self.state_mut();
            let cb = &mut st.pipes[pipe.index()];
            if cb.reset {
                return Err(PipeError::Reset);
            }
            let n = cb.ring.pop(&mut out[done..]);
            let (writers, readers) = (cb.writers, cb.readers);
            if n > 0 {
                done += n;
                st.dequeue_all_i(writers, Msg::Ok);
                continue;
            }
            let left = remaining(st.now(), start, timeout);
            match self.enqueue_timeout_s(readers, left) {
                Msg::Ok => {}
                Msg::Timeout => break,
                Msg::Reset => return Err(PipeError::Reset),
            }
        }
        self.reschedule_s();
        if done == 0 && !out.is_empty() {
            return Err(PipeError::Timeout);
        }
        Ok(done)
    }
}

impl<P: Port> Kernel<P> {
    /// Creates a pipe buffering up to `capacity` bytes.
    pub fn create_pipe(&self, capacity: usize) -> Result<Pipe, KernelError> {
        if capacity == 0 {
            return Err(KernelError::ZeroCapacity);
        }
        let mut sys = self.lock();
        if sys.pipes.len() >= usize::from(u16::MAX) {
            sys.halt("pipe table full");
        }
        let writers = sys.new_thread_queue();
        let readers = sys.new_thread_queue();
        sys.pipes.push(PipeCb {
            ring: RingBuffer::new(capacity),
            reset: false,
            writers,
            readers,
        });
        Ok(Pipe((sys.pipes.len() - 1) as u16))
    }

    pub fn pipe_write(&self, pipe: Pipe, data: &[u8], timeout: Interval) -> Result<usize, PipeError> {
        self.lock().pipe_write_s(pipe, data, timeout)
    }

    pub fn pipe_read(&self, pipe: Pipe, out: &mut [u8], timeout: Interval) -> Result<usize, PipeError> {
        self.lock().pipe_read_s(pipe, out, timeout)
    }

    pub fn reset_pipe(&self, pipe: Pipe) {
        let mut sys = self.lock();
        sys.pipe_reset_i(pipe);
        sys.reschedule_s();
    }

    /// Clears the poison left by a reset; the pipe starts out empty.
    pub fn resume_pipe(&self, pipe: Pipe) {
        let mut sys = self.lock();
        let cb = &mut sys.pipes[pipe.index()];
        cb.ring.clear();
        cb.reset = false;
        sys.emit(records::pipe::RESUME, &pipe.0.to_le_bytes());
    }

    pub fn pipe_len(&self, pipe: Pipe) -> usize {
        self.state.lock().pipe_len(pipe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_wraps_and_keeps_order() {
        let mut ring = RingBuffer::new(4);
        assert_eq!(ring.push(b"abc"), 3);
        let mut out = [0u8; 2];
        assert_eq!(ring.pop(&mut out), 2);
        assert_eq!(&out, b"ab");

        assert_eq!(ring.push(b"defg"), 3);
        assert_eq!(ring.len(), 4);
        let mut out = [0u8; 8];
        assert_eq!(ring.pop(&mut out), 4);
        assert_eq!(&out[..4], b"cdef");
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn ring_push_is_bounded_by_free_space() {
        let mut ring = RingBuffer::new(3);
        assert_eq!(ring.push(b"12345"), 3);
        assert_eq!(ring.push(b"6"), 0);
        ring.clear();
        assert_eq!(ring.push(b"6"), 1);
    }

    #[test]
    fn remaining_budget_shrinks_with_elapsed_time() {
        let start = SysTime(u32::MAX - 1);
        let later = SysTime(3);
        assert_eq!(remaining(later, start, Interval::ticks(10)), Interval::ticks(5));
        assert_eq!(remaining(later, start, Interval::ticks(2)), Interval::IMMEDIATE);
        assert_eq!(remaining(later, start, Interval::INFINITE), Interval::INFINITE);
    }
}
