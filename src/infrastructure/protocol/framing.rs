//! Frame synchronization and the shared decode loop.
//!
//! BLE notifications do not line up with protocol frames: one notification
//! may carry several frames, or half of one. A [`FrameSync`] consumes the
//! stream one byte at a time and reports when a complete frame is buffered;
//! [`decode_frames`] drives it over a notification and folds every completed
//! frame into the wheel state.

use crate::domain::commands::WireCommand;
use crate::domain::models::WheelState;
use tracing::{debug, trace};

/// Byte-at-a-time frame reassembly.
pub trait FrameSync {
    /// Feed one byte. Returns `true` when a complete frame is available.
    fn add_byte(&mut self, byte: u8) -> bool;

    /// The assembled frame. Only meaningful after `add_byte` returned `true`.
    fn current_frame(&self) -> &[u8];

    /// Drop the current frame and hunt for the next header.
    fn reset(&mut self);
}

/// Outcome of decoding one or more frames.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeResult {
    pub state: WheelState,
    pub has_new_data: bool,
    pub commands: Vec<WireCommand>,
}

impl DecodeResult {
    pub fn new(state: WheelState, has_new_data: bool) -> Self {
        Self {
            state,
            has_new_data,
            commands: Vec::new(),
        }
    }

    pub fn with_commands(mut self, commands: Vec<WireCommand>) -> Self {
        self.commands = commands;
        self
    }
}

/// Run `data` through `sync` and decode every completed frame.
///
/// Each completed frame is passed to `process_frame` exactly once, with the
/// state produced by the previous frame. `has_new_data` is sticky across the
/// buffer and commands are concatenated in frame order. Frames rejected by
/// `process_frame` leave the state untouched. Returns `None` when no frame
/// was decoded.
pub fn decode_frames<S, F>(
    data: &[u8],
    sync: &mut S,
    initial: &WheelState,
    mut process_frame: F,
) -> Option<DecodeResult>
where
    S: FrameSync + ?Sized,
    F: FnMut(&[u8], WheelState) -> Option<DecodeResult>,
{
    let mut result: Option<DecodeResult> = None;

    for &byte in data {
        if !sync.add_byte(byte) {
            continue;
        }

        let frame = sync.current_frame().to_vec();
        sync.reset();
        trace!("Frame: {:02X?}", frame);

        let current = match &result {
            Some(r) => r.state.clone(),
            None => initial.clone(),
        };

        match process_frame(&frame, current) {
            Some(outcome) => {
                result = Some(match result.take() {
                    Some(mut acc) => {
                        acc.state = outcome.state;
                        acc.has_new_data |= outcome.has_new_data;
                        acc.commands.extend(outcome.commands);
                        acc
                    }
                    None => outcome,
                });
            }
            None => debug!("Skipping undecodable frame ({} bytes)", frame.len()),
        }
    }

    result
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncState {
    Hunting,
    Collecting,
    Done,
}

/// Keeps the trailing `header.len()` bytes while hunting and reports when
/// they match the header.
fn hunt(buffer: &mut Vec<u8>, header: &[u8], byte: u8) -> bool {
    buffer.push(byte);
    if buffer.len() > header.len() {
        let excess = buffer.len() - header.len();
        buffer.drain(..excess);
    }
    buffer.as_slice() == header
}

/// Fixed header, fixed total length, optional fixed footer.
#[derive(Debug, Clone)]
pub struct FixedFrameSync {
    header: &'static [u8],
    footer: &'static [u8],
    frame_len: usize,
    buffer: Vec<u8>,
    state: SyncState,
}

impl FixedFrameSync {
    pub fn new(header: &'static [u8], frame_len: usize, footer: &'static [u8]) -> Self {
        debug_assert!(header.len() + footer.len() <= frame_len);
        Self {
            header,
            footer,
            frame_len,
            buffer: Vec::with_capacity(frame_len),
            state: SyncState::Hunting,
        }
    }
}

impl FrameSync for FixedFrameSync {
    fn add_byte(&mut self, byte: u8) -> bool {
        match self.state {
            SyncState::Done => {
                self.reset();
                self.add_byte(byte)
            }
            SyncState::Hunting => {
                if hunt(&mut self.buffer, self.header, byte) {
                    self.state = SyncState::Collecting;
                }
                false
            }
            SyncState::Collecting => {
                self.buffer.push(byte);
                let index = self.buffer.len() - 1;
                let footer_start = self.frame_len - self.footer.len();
                if index >= footer_start && self.footer[index - footer_start] != byte {
                    trace!("Footer mismatch at byte {}", index);
                    self.buffer.clear();
                    self.state = SyncState::Hunting;
                    if hunt(&mut self.buffer, self.header, byte) {
                        self.state = SyncState::Collecting;
                    }
                    return false;
                }
                if self.buffer.len() == self.frame_len {
                    self.state = SyncState::Done;
                    return true;
                }
                false
            }
        }
    }

    fn current_frame(&self) -> &[u8] {
        &self.buffer
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.state = SyncState::Hunting;
    }
}

/// Fixed header followed by a length byte; total length is
/// `length + overhead`.
#[derive(Debug, Clone)]
pub struct LengthPrefixedSync {
    header: &'static [u8],
    overhead: usize,
    max_len: usize,
    expected: usize,
    buffer: Vec<u8>,
    state: SyncState,
}

impl LengthPrefixedSync {
    /// `overhead` counts every byte that is not covered by the length field,
    /// header and length byte included. Frames longer than `max_len` are
    /// treated as noise.
    pub fn new(header: &'static [u8], overhead: usize, max_len: usize) -> Self {
        Self {
            header,
            overhead,
            max_len,
            expected: 0,
            buffer: Vec::with_capacity(max_len),
            state: SyncState::Hunting,
        }
    }
}

impl FrameSync for LengthPrefixedSync {
    fn add_byte(&mut self, byte: u8) -> bool {
        match self.state {
            SyncState::Done => {
                self.reset();
                self.add_byte(byte)
            }
            SyncState::Hunting => {
                if hunt(&mut self.buffer, self.header, byte) {
                    self.state = SyncState::Collecting;
                    self.expected = 0;
                }
                false
            }
            SyncState::Collecting => {
                self.buffer.push(byte);
                if self.buffer.len() == self.header.len() + 1 {
                    let total = byte as usize + self.overhead;
                    if total > self.max_len || total <= self.buffer.len() {
                        trace!("Implausible frame length {}", total);
                        self.buffer.clear();
                        self.state = SyncState::Hunting;
                        if hunt(&mut self.buffer, self.header, byte) {
                            self.state = SyncState::Collecting;
                        }
                        return false;
                    }
                    self.expected = total;
                }
                if self.expected > 0 && self.buffer.len() == self.expected {
                    self.state = SyncState::Done;
                    return true;
                }
                false
            }
        }
    }

    fn current_frame(&self) -> &[u8] {
        &self.buffer
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.expected = 0;
        self.state = SyncState::Hunting;
    }
}
