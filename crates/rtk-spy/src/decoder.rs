use std::fmt;

use thiserror::Error;

use crate::{records, ESC, ESC_XOR, FLAG};

/// A verified trace frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpyFrame {
    pub seq: u8,
    pub record: u8,
    /// Kernel tick, when the stream carries ticks.
    pub tick: Option<u32>,
    pub payload: Vec<u8>,
}

impl fmt::Display for SpyFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:03} ", self.seq)?;
        if let Some(tick) = self.tick {
            write!(f, "@{tick:<6} ")?;
        }
        match records::name(self.record) {
            Some(name) => f.write_str(name)?,
            None => write!(f, "RECORD_{}", self.record)?,
        }
        for byte in &self.payload {
            write!(f, " {byte:02x}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame of {0} bytes is too short")]
    Truncated(usize),
    #[error("checksum mismatch: expected {expected:#04x}, found {found:#04x}")]
    Checksum { expected: u8, found: u8 },
}

/// Incremental decoder: feed it arbitrary chunks of the byte stream and it
/// returns the frames they complete.
#[derive(Debug)]
pub struct FrameDecoder {
    ticks: bool,
    buffer: Vec<u8>,
    escaped: bool,
    last_seq: Option<u8>,
    lost: u32,
}

impl FrameDecoder {
    /// `ticks` must match the producing [`crate::SpyConfig::ticks`].
    pub fn new(ticks: bool) -> Self {
        Self {
            ticks,
            buffer: Vec::new(),
            escaped: false,
            last_seq: None,
            lost: 0,
        }
    }

    /// Frames skipped according to the sequence numbers seen so far.
    pub fn lost(&self) -> u32 {
        self.lost
    }

    /// Drops any partial frame, e.g. after the link was re-established.
    pub fn resync(&mut self) {
        self.buffer.clear();
        self.escaped = false;
        self.last_seq = None;
    }

    pub fn push_bytes(&mut self, input: &[u8]) -> Result<Vec<SpyFrame>, DecodeError> {
        let mut frames = Vec::new();
        for &byte in input {
            match byte {
                FLAG => {
                    self.escaped = false;
                    if self.buffer.is_empty() {
                        continue;
                    }
                    let raw = std::mem::take(&mut self.buffer);
                    let frame = self.decode(&raw)?;
                    self.track(frame.seq);
                    frames.push(frame);
                }
                ESC if !self.escaped => self.escaped = true,
                _ if self.escaped => {
                    self.buffer.push(byte ^ ESC_XOR);
                    self.escaped = false;
                }
                _ => self.buffer.push(byte),
            }
        }
        Ok(frames)
    }

    fn track(&mut self, seq: u8) {
        if let Some(last) = self.last_seq {
            let gap = seq.wrapping_sub(last).wrapping_sub(1);
            self.lost = self.lost.wrapping_add(u32::from(gap));
        }
        self.last_seq = Some(seq);
    }

    fn decode(&self, raw: &[u8]) -> Result<SpyFrame, DecodeError> {
        let header = if self.ticks { 6 } else { 2 };
        let Some((&found, body)) = raw.split_last() else {
            return Err(DecodeError::Truncated(0));
        };
        if body.len() < header {
            return Err(DecodeError::Truncated(raw.len()));
        }
        let expected = !body.iter().fold(0u8, |sum, b| sum.wrapping_add(*b));
        if found != expected {
            return Err(DecodeError::Checksum { expected, found });
        }
        let tick = self
            .ticks
            .then(|| u32::from_le_bytes([body[2], body[3], body[4], body[5]]));
        Ok(SpyFrame {
            seq: body[0],
            record: body[1],
            tick,
            payload: body[header..].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(body: &[u8]) -> Vec<u8> {
        let sum = !body.iter().fold(0u8, |s, b| s.wrapping_add(*b));
        let mut out = Vec::new();
        for &b in body.iter().chain([sum].iter()) {
            if b == FLAG || b == ESC {
                out.extend_from_slice(&[ESC, b ^ ESC_XOR]);
            } else {
                out.push(b);
            }
        }
        out.push(FLAG);
        out
    }

    #[test]
    fn frame_split_across_chunks() {
        let stream = frame(&[1, records::pipe::RESET, FLAG, 0]);
        let mut decoder = FrameDecoder::new(false);
        assert!(decoder.push_bytes(&stream[..3]).unwrap().is_empty());
        let frames = decoder.push_bytes(&stream[3..]).unwrap();
        assert_eq!(
            frames,
            vec![SpyFrame {
                seq: 1,
                record: records::pipe::RESET,
                tick: None,
                payload: vec![FLAG, 0],
            }]
        );
    }

    #[test]
    fn ticks_are_split_from_payload() {
        let stream = frame(&[9, records::sched::IDLE, 42, 0, 0, 0, 5]);
        let frames = FrameDecoder::new(true).push_bytes(&stream).unwrap();
        assert_eq!(frames[0].tick, Some(42));
        assert_eq!(frames[0].payload, vec![5]);
        assert_eq!(frames[0].to_string(), "#009 @42     SCHED_IDLE 05");
    }

    #[test]
    fn sequence_gaps_count_as_lost() {
        let mut stream = frame(&[1, records::sys::START, 0]);
        stream.extend(frame(&[4, records::sys::HALT]));
        stream.extend(frame(&[5, 99]));
        let mut decoder = FrameDecoder::new(false);
        let frames = decoder.push_bytes(&stream).unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(decoder.lost(), 2);
        assert_eq!(frames[2].to_string(), "#005 RECORD_99");
    }

    #[test]
    fn corrupted_checksum_is_reported() {
        let mut decoder = FrameDecoder::new(false);
        let err = decoder.push_bytes(&[1, 2, 3, 0x00, FLAG]).unwrap_err();
        assert!(matches!(err, DecodeError::Checksum { .. }));
    }

    #[test]
    fn missing_tick_is_truncated() {
        let stream = frame(&[1, records::sys::HALT, 7]);
        assert_eq!(
            FrameDecoder::new(true).push_bytes(&stream),
            Err(DecodeError::Truncated(4))
        );
    }
}
