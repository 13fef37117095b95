//! Binary trace stream for the rtk kernel.
//!
//! The kernel hands every traceable action to a [`TraceHook`] as a
//! [`TraceEvent`]: a record identifier from [`records`], the kernel tick at
//! which it happened and a short payload. A [`Spy`] filters events, frames
//! them and passes the frames to a [`FrameSink`].
//!
//! Frame layout, HDLC-style:
//!
//! ```text
//! seq | record | tick (u32 LE, optional) | payload.. | !sum | 0x7E
//! ```
//!
//! Every byte up to the checksum is summed; `0x7E` and `0x7D` inside a frame
//! are escaped as `0x7D, byte ^ 0x20`. [`FrameDecoder`] reverses this on the
//! host side.

use std::io::{self, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use thiserror::Error;

mod decoder;
mod filter;

pub mod records;

pub use decoder::{DecodeError, FrameDecoder, SpyFrame};
pub use filter::RecordFilter;

pub(crate) const FLAG: u8 = 0x7E;
pub(crate) const ESC: u8 = 0x7D;
pub(crate) const ESC_XOR: u8 = 0x20;

/// One traceable kernel action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TraceEvent<'a> {
    pub record: u8,
    /// Kernel time in ticks.
    pub tick: u32,
    pub payload: &'a [u8],
}

/// Callback the kernel invokes for every [`TraceEvent`].
pub type TraceHook = Arc<dyn Fn(&TraceEvent<'_>) -> Result<(), TraceError> + Send + Sync>;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("record {record} payload of {len} bytes exceeds the frame limit")]
    Oversized { record: u8, len: usize },
    #[error("trace sink failed: {0}")]
    Sink(#[from] io::Error),
}

#[derive(Debug, Clone)]
pub struct SpyConfig {
    /// Largest payload accepted, tick excluded.
    pub max_payload: usize,
    /// Whether frames carry the kernel tick.
    pub ticks: bool,
    pub filter: RecordFilter,
}

impl Default for SpyConfig {
    fn default() -> Self {
        Self {
            max_payload: 64,
            ticks: true,
            filter: RecordFilter::all(),
        }
    }
}

/// Destination for encoded frames.
pub trait FrameSink: Send {
    fn accept(&mut self, frame: &[u8]) -> Result<(), TraceError>;
}

/// Sink writing frames to any [`Write`] implementation.
#[derive(Debug)]
pub struct IoSink<W: Write + Send>(pub W);

impl<W: Write + Send> FrameSink for IoSink<W> {
    fn accept(&mut self, frame: &[u8]) -> Result<(), TraceError> {
        self.0.write_all(frame)?;
        Ok(())
    }
}

/// Sink collecting frames in memory. Clones share the same buffer, so a test
/// can keep one clone and give the other to the spy.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn buffer(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Raw bytes captured so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buffer().clone()
    }

    /// Decodes everything captured so far. `ticks` must match the spy
    /// configuration that produced the stream.
    pub fn frames(&self, ticks: bool) -> Result<Vec<SpyFrame>, DecodeError> {
        FrameDecoder::new(ticks).push_bytes(&self.buffer())
    }
}

impl FrameSink for MemorySink {
    fn accept(&mut self, frame: &[u8]) -> Result<(), TraceError> {
        self.buffer().extend_from_slice(frame);
        Ok(())
    }
}

/// Counters kept by a [`Spy`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpyStats {
    pub framed: u32,
    pub filtered: u32,
}

/// Filters and frames trace events.
#[derive(Debug)]
pub struct Spy<S: FrameSink> {
    sink: S,
    config: SpyConfig,
    seq: u8,
    stats: SpyStats,
    scratch: Vec<u8>,
}

impl<S: FrameSink> Spy<S> {
    pub fn new(config: SpyConfig, sink: S) -> Self {
        let scratch = Vec::with_capacity(2 * config.max_payload + 16);
        Self {
            sink,
            config,
            seq: 0,
            stats: SpyStats::default(),
            scratch,
        }
    }

    /// Frames `event` unless the filter drops it. Returns whether a frame
    /// was produced.
    pub fn record(&mut self, event: &TraceEvent<'_>) -> Result<bool, TraceError> {
        if !self.config.filter.is_enabled(event.record) {
            self.stats.filtered = self.stats.filtered.wrapping_add(1);
            return Ok(false);
        }
        if event.payload.len() > self.config.max_payload {
            return Err(TraceError::Oversized {
                record: event.record,
                len: event.payload.len(),
            });
        }
        self.seq = self.seq.wrapping_add(1);
        let tick = self.config.ticks.then_some(event.tick);
        self.scratch.clear();
        encode_frame(&mut self.scratch, self.seq, event.record, tick, event.payload);
        self.sink.accept(&self.scratch)?;
        self.stats.framed = self.stats.framed.wrapping_add(1);
        Ok(true)
    }

    pub fn filter_mut(&mut self) -> &mut RecordFilter {
        &mut self.config.filter
    }

    pub fn stats(&self) -> SpyStats {
        self.stats
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_shared(self) -> SharedSpy<S> {
        SharedSpy {
            inner: Arc::new(Mutex::new(self)),
        }
    }
}

fn encode_frame(out: &mut Vec<u8>, seq: u8, record: u8, tick: Option<u32>, payload: &[u8]) {
    fn stuff(out: &mut Vec<u8>, byte: u8) {
        match byte {
            FLAG | ESC => out.extend_from_slice(&[ESC, byte ^ ESC_XOR]),
            _ => out.push(byte),
        }
    }

    let tick_bytes = tick.map(u32::to_le_bytes);
    let body = [seq, record]
        .into_iter()
        .chain(tick_bytes.into_iter().flatten())
        .chain(payload.iter().copied());
    let mut sum = 0u8;
    for byte in body {
        sum = sum.wrapping_add(byte);
        stuff(out, byte);
    }
    stuff(out, !sum);
    out.push(FLAG);
}

/// A [`Spy`] shared between the kernel hook and its owner.
pub struct SharedSpy<S: FrameSink> {
    inner: Arc<Mutex<Spy<S>>>,
}

impl<S: FrameSink> Clone for SharedSpy<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: FrameSink + 'static> SharedSpy<S> {
    fn lock(&self) -> MutexGuard<'_, Spy<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn record(&self, event: &TraceEvent<'_>) -> Result<bool, TraceError> {
        self.lock().record(event)
    }

    /// Adjusts the filter while the kernel is running.
    pub fn update_filter(&self, f: impl FnOnce(&mut RecordFilter)) {
        f(self.lock().filter_mut());
    }

    pub fn stats(&self) -> SpyStats {
        self.lock().stats()
    }

    /// The hook to install in the kernel.
    pub fn hook(&self) -> TraceHook {
        let inner = Arc::clone(&self.inner);
        Arc::new(move |event: &TraceEvent<'_>| {
            let mut spy = inner.lock().unwrap_or_else(PoisonError::into_inner);
            spy.record(event).map(drop)
        })
    }
}

/// Spy writing frames to stdout, for bring-up on a host.
pub fn stdout_spy(config: SpyConfig) -> SharedSpy<IoSink<io::Stdout>> {
    Spy::new(config, IoSink(io::stdout())).into_shared()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(record: u8, tick: u32, payload: &[u8]) -> TraceEvent<'_> {
        TraceEvent {
            record,
            tick,
            payload,
        }
    }

    #[test]
    fn reserved_bytes_are_escaped() {
        let sink = MemorySink::new();
        let config = SpyConfig {
            ticks: false,
            ..SpyConfig::default()
        };
        let mut spy = Spy::new(config, sink.clone());
        spy.record(&event(records::sched::SWITCH, 0, &[FLAG, ESC, 1])).unwrap();

        let bytes = sink.contents();
        assert_eq!(bytes.iter().filter(|&&b| b == FLAG).count(), 1);
        assert_eq!(bytes.last(), Some(&FLAG));

        let frames = sink.frames(false).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].record, records::sched::SWITCH);
        assert_eq!(frames[0].tick, None);
        assert_eq!(frames[0].payload, vec![FLAG, ESC, 1]);
    }

    #[test]
    fn tick_travels_ahead_of_payload() {
        let sink = MemorySink::new();
        let mut spy = Spy::new(SpyConfig::default(), sink.clone());
        spy.record(&event(records::sched::TIMEOUT, 0x7E7D, &[4])).unwrap();

        let frames = sink.frames(true).unwrap();
        assert_eq!(frames[0].tick, Some(0x7E7D));
        assert_eq!(frames[0].payload, vec![4]);
    }

    #[test]
    fn filtered_records_consume_no_sequence_number() {
        let sink = MemorySink::new();
        let mut config = SpyConfig::default();
        config.filter.disable_group(records::sched::GROUP);
        let mut spy = Spy::new(config, sink.clone());

        assert!(!spy.record(&event(records::sched::READY, 1, &[1, 2])).unwrap());
        assert!(spy.record(&event(records::mutex::LOCK, 2, &[0, 0, 1])).unwrap());
        assert_eq!(spy.stats(), SpyStats { framed: 1, filtered: 1 });

        let frames = sink.frames(true).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].seq, 1);
        assert_eq!(frames[0].record, records::mutex::LOCK);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let config = SpyConfig {
            max_payload: 4,
            ..SpyConfig::default()
        };
        let mut spy = Spy::new(config, MemorySink::new());
        let err = spy.record(&event(records::sys::HALT, 0, b"too long")).unwrap_err();
        assert!(matches!(
            err,
            TraceError::Oversized { record, len: 8 } if record == records::sys::HALT
        ));
    }

    #[test]
    fn hook_and_handle_share_one_sequence() {
        let sink = MemorySink::new();
        let spy = Spy::new(SpyConfig::default(), sink.clone()).into_shared();
        let hook = spy.hook();

        hook(&event(records::mutex::LOCK, 5, &[3])).unwrap();
        spy.record(&event(records::mutex::UNLOCK, 6, &[3])).unwrap();

        let frames = sink.frames(true).unwrap();
        let seqs: Vec<u8> = frames.iter().map(|f| f.seq).collect();
        assert_eq!(seqs, vec![1, 2]);
        assert_eq!(spy.stats().framed, 2);
    }
}
