//! Ninebot One protocol (legacy)
//!
//! # Frame layout
//!
//! ```text
//! [0-1]      : 55 AA header
//! [2]        : len (data length + 2)
//! [3]        : address
//! [4]        : command (0x01 read, 0x03 write, 0x04 read reply)
//! [5]        : parameter
//! [6..]      : data
//! [last 2]   : checksum, little-endian: (sum of len..data) ^ 0xFFFF
//! ```
//!
//! The wheel only answers reads; the keep-alive tick cycles through the
//! serial, firmware and live-data parameters.

use super::battery::{battery_percent, PackSeries};
use super::bytes::{ascii, i16_le, u16_le, u32_le};
use super::framing::{decode_frames, DecodeResult, FrameSync, LengthPrefixedSync};
use super::WheelDecoder;
use crate::domain::commands::{WheelCommand, WireCommand};
use crate::domain::config::DecoderConfig;
use crate::domain::models::{WheelState, WheelType};
use std::time::Duration;
use tracing::{debug, info};

pub const HEADER: [u8; 2] = [0x55, 0xAA];
const OVERHEAD: usize = 6;
const MAX_FRAME_LEN: usize = 128;

const ADDR_CONTROLLER: u8 = 0x09;
pub const CMD_READ: u8 = 0x01;
pub const CMD_WRITE: u8 = 0x03;

pub const PARAM_SERIAL: u8 = 0x10;
pub const PARAM_FIRMWARE: u8 = 0x1A;
pub const PARAM_LOCK: u8 = 0x70;
pub const PARAM_UNLOCK: u8 = 0x71;
pub const PARAM_LIVE: u8 = 0xB0;

const SERIAL_LEN: u8 = 14;
const FIRMWARE_LEN: u8 = 2;
pub(super) const LIVE_LEN: usize = 32;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(125);

/// `(sum ^ 0xFFFF)` over the bytes, truncated to 16 bits.
pub(super) fn checksum(bytes: &[u8]) -> u16 {
    let sum = bytes.iter().fold(0u32, |acc, b| acc + *b as u32);
    (sum as u16) ^ 0xFFFF
}

/// Firmware word `0x0ABC` -> `A.B.C`
pub(super) fn format_version(raw: u16) -> String {
    format!("{}.{}.{}", (raw >> 8) & 0x0F, (raw >> 4) & 0x0F, raw & 0x0F)
}

/// Live-data block shared by the One and Z series:
/// [8-9] battery %; [10-11] speed, 1/100 km/h; [14-17] total distance, m;
/// [18-19] trip, 10 m; [22-23] temperature, 1/10 °C;
/// [24-25] voltage, 1/100 V; [26-27] current, 1/100 A
pub(super) fn apply_live_data(
    data: &[u8],
    state: &mut WheelState,
    config: &DecoderConfig,
    series: PackSeries,
) {
    let voltage = u16_le(data, 24) as i32;
    let reported = u16_le(data, 8) as i32;
    state.battery_level = if reported > 0 {
        reported.min(100)
    } else {
        battery_percent(voltage, series, config.better_percents)
    };
    state.speed = config.sign_mode.apply(i16_le(data, 10) as i32);
    state.total_distance = u32_le(data, 14) as i64;
    state.wheel_distance = u16_le(data, 18) as i64 * 10;
    state.temperature = i16_le(data, 22) as i32 * 10;
    state.voltage = voltage;
    state.current = config.sign_mode.apply(i16_le(data, 26) as i32);
    state.update_power();
}

/// Complete frame for a request.
pub fn build_frame(addr: u8, cmd: u8, param: u8, data: &[u8]) -> Vec<u8> {
    let mut body = vec![data.len() as u8 + 2, addr, cmd, param];
    body.extend_from_slice(data);
    let check = checksum(&body);

    let mut frame = HEADER.to_vec();
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&check.to_le_bytes());
    frame
}

#[derive(Debug, Default)]
struct NinebotFrames {
    serial: String,
    version: String,
    live_seen: bool,
}

impl NinebotFrames {
    fn process_frame(
        &mut self,
        frame: &[u8],
        mut state: WheelState,
        config: &DecoderConfig,
    ) -> Option<DecodeResult> {
        if frame.len() < OVERHEAD + 2 || frame.len() != frame[2] as usize + OVERHEAD {
            return None;
        }
        let (body, check) = frame[2..].split_at(frame.len() - 4);
        if checksum(body) != u16_le(check, 0) {
            debug!("Ninebot checksum mismatch");
            return None;
        }
        let param = body[3];
        let data = &body[4..];
        state.wheel_type = WheelType::Ninebot;

        match param {
            PARAM_SERIAL => {
                self.serial = ascii(data);
                info!("Ninebot serial: {}", self.serial);
                state.serial = self.serial.clone();
                Some(DecodeResult::new(state, false))
            }
            PARAM_FIRMWARE if data.len() >= 2 => {
                self.version = format_version(u16_le(data, 0));
                state.version = self.version.clone();
                Some(DecodeResult::new(state, false))
            }
            PARAM_LIVE if data.len() >= LIVE_LEN => {
                apply_live_data(data, &mut state, config, PackSeries::S16);
                self.live_seen = true;
                Some(DecodeResult::new(state, true))
            }
            other => {
                debug!("Ignoring Ninebot parameter {:#04X} ({} bytes)", other, data.len());
                None
            }
        }
    }
}

pub struct NinebotDecoder {
    unpacker: LengthPrefixedSync,
    frames: NinebotFrames,
    poll_count: u32,
}

impl NinebotDecoder {
    pub fn new() -> Self {
        Self {
            unpacker: LengthPrefixedSync::new(&HEADER, OVERHEAD, MAX_FRAME_LEN),
            frames: NinebotFrames::default(),
            poll_count: 0,
        }
    }
}

impl Default for NinebotDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn read(param: u8, len: u8) -> WireCommand {
    WireCommand::send(build_frame(ADDR_CONTROLLER, CMD_READ, param, &[len]))
}

impl WheelDecoder for NinebotDecoder {
    fn wheel_type(&self) -> WheelType {
        WheelType::Ninebot
    }

    fn decode(
        &mut self,
        data: &[u8],
        state: &WheelState,
        config: &DecoderConfig,
    ) -> Option<DecodeResult> {
        let frames = &mut self.frames;
        decode_frames(data, &mut self.unpacker, state, |frame, current| {
            frames.process_frame(frame, current, config)
        })
    }

    fn encode(&self, command: &WheelCommand) -> Vec<WireCommand> {
        match command {
            WheelCommand::SetLock(locked) => {
                let param = if *locked { PARAM_LOCK } else { PARAM_UNLOCK };
                vec![WireCommand::send(build_frame(
                    ADDR_CONTROLLER,
                    CMD_WRITE,
                    param,
                    &[0x01, 0x00],
                ))]
            }
            WheelCommand::RequestSerial | WheelCommand::RequestName => {
                vec![read(PARAM_SERIAL, SERIAL_LEN)]
            }
            WheelCommand::RequestFirmware => vec![read(PARAM_FIRMWARE, FIRMWARE_LEN)],
            _ => Vec::new(),
        }
    }

    fn is_ready(&self) -> bool {
        !self.frames.serial.is_empty() && self.frames.live_seen
    }

    fn reset(&mut self) {
        self.frames = NinebotFrames::default();
        self.unpacker.reset();
        self.poll_count = 0;
    }

    fn keep_alive_interval(&self) -> Option<Duration> {
        Some(KEEP_ALIVE_INTERVAL)
    }

    fn keep_alive_request(&mut self) -> Option<WireCommand> {
        let step = self.poll_count % 3;
        self.poll_count = self.poll_count.wrapping_add(1);
        let request = match step {
            0 if self.frames.serial.is_empty() => read(PARAM_SERIAL, SERIAL_LEN),
            1 if self.frames.version.is_empty() => read(PARAM_FIRMWARE, FIRMWARE_LEN),
            _ => read(PARAM_LIVE, LIVE_LEN as u8),
        };
        Some(request)
    }
}
