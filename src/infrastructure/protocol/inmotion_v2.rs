//! InMotion protocol, V11 and later
//!
//! ```text
//! AA AA | escaped( flags | len | cmd | data[len - 1] | check )
//!
//! flags : 0x11 initialization, 0x14 default
//! len   : command byte plus data
//! check : XOR of flags through data
//! escape: 0xA5 precedes any 0xAA, 0x55 or 0xA5 after the header
//! ```
//!
//! Like the older generation, the wheel only answers requests; the
//! keep-alive tick walks through identification first and then polls
//! real-time data.

use super::bytes::{ascii, i16_le, u16_le, u32_le};
use super::framing::{decode_frames, DecodeResult, FrameSync};
use super::WheelDecoder;
use crate::domain::commands::{WheelCommand, WireCommand};
use crate::domain::config::DecoderConfig;
use crate::domain::models::{WheelState, WheelType};
use std::time::Duration;
use tracing::{debug, info, trace};

const START: u8 = 0xAA;
const ESCAPE: u8 = 0xA5;

pub const FLAGS_INIT: u8 = 0x11;
pub const FLAGS_DEFAULT: u8 = 0x14;

pub const CMD_MAIN_INFO: u8 = 0x02;
pub const CMD_REAL_TIME: u8 = 0x04;
pub const CMD_TOTAL_STATS: u8 = 0x11;
pub const CMD_CONTROL: u8 = 0x60;

const INFO_CAR_TYPE: u8 = 0x01;
const INFO_SERIAL: u8 = 0x02;
const INFO_VERSIONS: u8 = 0x06;

const CTRL_TILT_BACK: u8 = 0x21;
const CTRL_RIDE_MODE: u8 = 0x23;
const CTRL_BEEPER_VOLUME: u8 = 0x26;
const CTRL_LOCK: u8 = 0x31;
const CTRL_PLAY_SOUND: u8 = 0x41;
const CTRL_CALIBRATE: u8 = 0x42;
const CTRL_LIGHT: u8 = 0x50;

const REAL_TIME_LEN: usize = 31;
/// flags, len, cmd, up to 254 data bytes, check
const MAX_FRAME_LEN: usize = u8::MAX as usize + 3;
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(25);
/// Once identified, every n-th poll asks for total statistics
const TOTAL_STATS_EVERY: u32 = 100;

/// One unescaped message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub flags: u8,
    pub command: u8,
    pub data: Vec<u8>,
}

impl Message {
    pub fn new(flags: u8, command: u8, data: Vec<u8>) -> Self {
        Self {
            flags,
            command,
            data,
        }
    }

    /// Parse `flags | len | cmd | data | check`.
    pub fn parse(frame: &[u8]) -> Option<Self> {
        if frame.len() < 4 || frame.len() != frame[1] as usize + 3 {
            return None;
        }
        let (body, check) = frame.split_at(frame.len() - 1);
        if xor(body) != check[0] {
            debug!("InMotion V2 check mismatch");
            return None;
        }
        Some(Self::new(body[0], body[2], body[3..].to_vec()))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = vec![self.flags, self.data.len() as u8 + 1, self.command];
        body.extend_from_slice(&self.data);
        body.push(xor(&body));

        let mut out = vec![START, START];
        for byte in body {
            if matches!(byte, START | 0x55 | ESCAPE) {
                out.push(ESCAPE);
            }
            out.push(byte);
        }
        out
    }
}

fn xor(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnpackState {
    Hunting,
    Collecting,
    Done,
}

/// Header hunt plus unescaping; the frame ends when `len + 3` bytes are in.
#[derive(Debug)]
pub struct V2FrameSync {
    buffer: Vec<u8>,
    state: UnpackState,
    escaped: bool,
    last_raw: Option<u8>,
}

impl V2FrameSync {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            state: UnpackState::Hunting,
            escaped: false,
            last_raw: None,
        }
    }
}

impl Default for V2FrameSync {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSync for V2FrameSync {
    fn add_byte(&mut self, byte: u8) -> bool {
        match self.state {
            UnpackState::Done => {
                self.reset();
                self.add_byte(byte)
            }
            UnpackState::Hunting => {
                if byte == START && self.last_raw == Some(START) {
                    self.state = UnpackState::Collecting;
                    self.buffer.clear();
                    self.last_raw = None;
                } else {
                    self.last_raw = Some(byte);
                }
                false
            }
            UnpackState::Collecting => {
                if self.escaped {
                    self.escaped = false;
                    self.buffer.push(byte);
                    self.last_raw = None;
                } else if byte == ESCAPE {
                    self.escaped = true;
                    return false;
                } else if byte == START && self.last_raw == Some(START) {
                    // Unescaped AA AA never occurs inside a body
                    trace!("InMotion V2 frame restarted");
                    self.buffer.clear();
                    self.last_raw = None;
                    return false;
                } else {
                    self.buffer.push(byte);
                    self.last_raw = Some(byte);
                }
                let len = self.buffer.len();
                if len >= 2 && len == self.buffer[1] as usize + 3 {
                    self.state = UnpackState::Done;
                    return true;
                }
                if len >= MAX_FRAME_LEN {
                    self.reset();
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
        self.state = UnpackState::Hunting;
        self.escaped = false;
        self.last_raw = None;
    }
}

fn model_for(series: u8, kind: u8) -> String {
    let name = match (series, kind) {
        (6, 1) => "V11",
        (7, 1) => "V12 HS",
        (7, 2) => "V12 HT",
        (7, 3) => "V12 PRO",
        (8, 1) => "V13",
        (8, 2) => "V13 PRO",
        (9, 1) => "V14 g",
        (9, 2) => "V14 s",
        (12, 1) => "V9",
        _ => return format!("InMotion {}.{}", series, kind),
    };
    name.to_string()
}

/// Temperature byte: °C offset by 176.
fn temperature(byte: u8) -> i32 {
    (byte as i32 + 80 - 256) * 100
}

#[derive(Debug, Default)]
struct V2Frames {
    model: String,
    serial: String,
    version: String,
    real_time_seen: bool,
}

impl V2Frames {
    fn process_frame(
        &mut self,
        frame: &[u8],
        mut state: WheelState,
        config: &DecoderConfig,
    ) -> Option<DecodeResult> {
        let message = Message::parse(frame)?;
        state.wheel_type = WheelType::InmotionV2;
        let data = &message.data;
        match message.command & 0x7F {
            CMD_MAIN_INFO => self.main_info(data, state),
            CMD_REAL_TIME => self.real_time(data, state, config),
            CMD_TOTAL_STATS if data.len() >= 4 => {
                state.total_distance = u32_le(data, 0) as i64 * 10;
                Some(DecodeResult::new(state, false))
            }
            other => {
                debug!("Ignoring InMotion V2 command {:#04X}", other);
                None
            }
        }
    }

    fn main_info(&mut self, data: &[u8], mut state: WheelState) -> Option<DecodeResult> {
        match data.first().copied()? {
            INFO_CAR_TYPE if data.len() >= 4 => {
                let model = model_for(data[2], data[3]);
                if self.model != model {
                    info!("InMotion model: {}", model);
                }
                self.model = model;
                state.model = self.model.clone();
                state.name = self.model.clone();
            }
            INFO_SERIAL if data.len() >= 2 => {
                self.serial = ascii(&data[1..data.len().min(17)]);
                state.serial = self.serial.clone();
            }
            INFO_VERSIONS if data.len() >= 5 => {
                self.version = format!("{}.{}.{}", data[4], data[3], u16_le(data, 1));
                state.version = self.version.clone();
            }
            _ => return None,
        }
        Some(DecodeResult::new(state, false))
    }

    /// [0-1] voltage, 1/100 V; [2-3] current, 1/100 A; [4-5] speed,
    /// 1/100 km/h; [8-9] PWM, 1/100 %; [10-11] battery power, W;
    /// [14-15] pitch, 1/100 °; [16-17] roll, 1/100 °; [18-19] trip, 10 m;
    /// [20-21] battery, 1/100 %; [22-23] speed limit, 1/100 km/h;
    /// [26] MOS temperature; [27] motor temperature;
    /// [30] state flags (bit 0 light, bit 3 lock, bit 7 charging)
    fn real_time(&mut self, data: &[u8], mut state: WheelState, config: &DecoderConfig) -> Option<DecodeResult> {
        if data.len() < REAL_TIME_LEN {
            debug!("Short InMotion V2 real-time info ({} bytes)", data.len());
            return None;
        }
        let flags = data[30];
        state.voltage = u16_le(data, 0) as i32;
        state.current = config.sign_mode.apply(i16_le(data, 2) as i32);
        state.speed = config.sign_mode.apply(i16_le(data, 4) as i32);
        state.output = (i16_le(data, 8) as i32).abs();
        state.power = i16_le(data, 10) as i32 * 100;
        state.angle = i16_le(data, 14) as f64 / 100.0;
        state.roll = i16_le(data, 16) as f64 / 100.0;
        state.wheel_distance = u16_le(data, 18) as i64 * 10;
        state.battery_level = (u16_le(data, 20) / 100) as i32;
        state.speed_limit = (u16_le(data, 22) / 100) as i32;
        state.temperature = temperature(data[26]);
        state.temperature2 = temperature(data[27]);
        state.light_mode = (flags & 0x01) as i32;
        state.locked = flags & 0x08 != 0;
        state.charging = flags & 0x80 != 0;

        self.real_time_seen = true;
        Some(DecodeResult::new(state, true))
    }
}

pub struct InmotionV2Decoder {
    unpacker: V2FrameSync,
    frames: V2Frames,
    poll_count: u32,
}

impl InmotionV2Decoder {
    pub fn new() -> Self {
        Self {
            unpacker: V2FrameSync::new(),
            frames: V2Frames::default(),
            poll_count: 0,
        }
    }
}

impl Default for InmotionV2Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn control(data: Vec<u8>) -> Vec<WireCommand> {
    vec![WireCommand::send(
        Message::new(FLAGS_DEFAULT, CMD_CONTROL, data).to_bytes(),
    )]
}

fn info_request(kind: u8) -> WireCommand {
    WireCommand::send(Message::new(FLAGS_INIT, CMD_MAIN_INFO, vec![kind]).to_bytes())
}

impl WheelDecoder for InmotionV2Decoder {
    fn wheel_type(&self) -> WheelType {
        WheelType::InmotionV2
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
            WheelCommand::Beep => control(vec![CTRL_PLAY_SOUND, 0x18, 0x01]),
            WheelCommand::SetLight(on) => control(vec![CTRL_LIGHT, *on as u8]),
            WheelCommand::Calibrate => control(vec![CTRL_CALIBRATE, 0x01, 0x00, 0x01]),
            WheelCommand::SetLock(locked) => control(vec![CTRL_LOCK, *locked as u8]),
            WheelCommand::SetPedalsMode(mode) if *mode <= 1 => control(vec![CTRL_RIDE_MODE, *mode]),
            WheelCommand::SetBeeperVolume(volume) if *volume <= 100 => {
                control(vec![CTRL_BEEPER_VOLUME, *volume])
            }
            WheelCommand::SetTiltBackSpeed(kmh) => {
                let [lo, hi] = (*kmh as u16 * 100).to_le_bytes();
                control(vec![CTRL_TILT_BACK, lo, hi])
            }
            WheelCommand::RequestName => vec![info_request(INFO_CAR_TYPE)],
            WheelCommand::RequestSerial => vec![info_request(INFO_SERIAL)],
            WheelCommand::RequestFirmware => vec![info_request(INFO_VERSIONS)],
            _ => Vec::new(),
        }
    }

    fn is_ready(&self) -> bool {
        !self.frames.model.is_empty() && self.frames.real_time_seen
    }

    fn reset(&mut self) {
        self.unpacker.reset();
        self.frames = V2Frames::default();
        self.poll_count = 0;
    }

    fn keep_alive_interval(&self) -> Option<Duration> {
        Some(KEEP_ALIVE_INTERVAL)
    }

    fn keep_alive_request(&mut self) -> Option<WireCommand> {
        if self.frames.model.is_empty() {
            return Some(info_request(INFO_CAR_TYPE));
        }
        if self.frames.serial.is_empty() {
            return Some(info_request(INFO_SERIAL));
        }
        if self.frames.version.is_empty() {
            return Some(info_request(INFO_VERSIONS));
        }
        self.poll_count = self.poll_count.wrapping_add(1);
        let command = if self.poll_count % TOTAL_STATS_EVERY == 0 {
            CMD_TOTAL_STATS
        } else {
            CMD_REAL_TIME
        };
        Some(WireCommand::send(
            Message::new(FLAGS_DEFAULT, command, Vec::new()).to_bytes(),
        ))
    }
}
