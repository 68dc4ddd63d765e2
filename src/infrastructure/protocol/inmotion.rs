//! InMotion protocol, V5 / V8 / V10 generation
//!
//! Every frame carries one CAN message wrapped in a byte-stuffed serial
//! envelope:
//!
//! ```text
//! AA AA | escaped( content | checksum ) | 55 55
//!
//! content:
//! [0-3]   : message id (little-endian)
//! [4-11]  : data
//! [12]    : data length, 0xFE when extended data follows
//! [13]    : channel
//! [14]    : format
//! [15]    : type (0 data, 1 remote request)
//! [16..]  : extended data, length in data[0-3]
//!
//! checksum: sum of the content bytes, modulo 256
//! escape  : 0xA5 precedes any 0xAA, 0x55 or 0xA5 inside the envelope
//! ```
//!
//! The wheel only answers requests, so the session polls it with fast-info
//! requests on the keep-alive tick.

use super::battery::{battery_percent, PackSeries};
use super::bytes::{round_half_up, u32_le};
use super::framing::{decode_frames, DecodeResult, FrameSync};
use super::WheelDecoder;
use crate::domain::commands::{WheelCommand, WireCommand};
use crate::domain::config::DecoderConfig;
use crate::domain::models::{WheelState, WheelType};
use std::time::Duration;
use tracing::{debug, info, trace};

const START: u8 = 0xAA;
const END: u8 = 0x55;
const ESCAPE: u8 = 0xA5;
const MAX_CONTENT_LEN: usize = 512;

pub const ID_FAST_INFO: u32 = 0x0F55_0113;
pub const ID_SLOW_INFO: u32 = 0x0F55_0114;
pub const ID_RIDE_MODE: u32 = 0x0F55_0115;
pub const ID_REMOTE_CONTROL: u32 = 0x0F55_0116;
pub const ID_CALIBRATION: u32 = 0x0F55_0119;
pub const ID_LIGHT: u32 = 0x0F55_010D;
pub const ID_PLAY_SOUND: u32 = 0x0F55_0609;

const LEN_EXTENDED: u8 = 0xFE;
const CHANNEL: u8 = 0x05;
const TYPE_DATA: u8 = 0x00;
const TYPE_REMOTE: u8 = 0x01;

/// Wheel-speed counts per m/s
const SPEED_FACTOR: f64 = 3812.0;
const FAST_INFO_LEN: usize = 76;
const SLOW_INFO_LEN: usize = 108;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(25);
/// While the wheel is unidentified, every n-th poll asks for slow info
const SLOW_INFO_EVERY: u32 = 4;

/// One CAN message as carried on the serial link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanMessage {
    pub id: u32,
    pub data: [u8; 8],
    pub len: u8,
    pub channel: u8,
    pub format: u8,
    pub kind: u8,
    pub ex_data: Vec<u8>,
}

impl CanMessage {
    fn standard(id: u32, data: [u8; 8], kind: u8) -> Self {
        Self {
            id,
            data,
            len: 8,
            channel: CHANNEL,
            format: 0,
            kind,
            ex_data: Vec::new(),
        }
    }

    /// Polling request for `id`.
    pub fn request(id: u32) -> Self {
        Self::standard(id, [0xFF; 8], TYPE_REMOTE)
    }

    pub fn command(id: u32, data: [u8; 8]) -> Self {
        Self::standard(id, data, TYPE_DATA)
    }

    /// Parse unescaped content; the trailing checksum byte is verified.
    pub fn parse(content: &[u8]) -> Option<Self> {
        if content.len() < 17 {
            return None;
        }
        let (body, check) = content.split_at(content.len() - 1);
        if checksum(body) != check[0] {
            debug!("InMotion checksum mismatch");
            return None;
        }

        let mut data = [0u8; 8];
        data.copy_from_slice(&body[4..12]);
        let len = body[12];
        let ex_data = if len == LEN_EXTENDED {
            let ex_len = u32_le(&data, 0) as usize;
            if body.len() != 16 + ex_len {
                debug!("InMotion extended length mismatch");
                return None;
            }
            body[16..].to_vec()
        } else {
            Vec::new()
        };

        Some(Self {
            id: u32_le(body, 0),
            data,
            len,
            channel: body[13],
            format: body[14],
            kind: body[15],
            ex_data,
        })
    }

    /// Full escaped frame, envelope included.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut content = Vec::with_capacity(17 + self.ex_data.len());
        content.extend_from_slice(&self.id.to_le_bytes());
        content.extend_from_slice(&self.data);
        content.extend_from_slice(&[self.len, self.channel, self.format, self.kind]);
        content.extend_from_slice(&self.ex_data);
        content.push(checksum(&content));

        let mut out = vec![START, START];
        for byte in content {
            if matches!(byte, START | END | ESCAPE) {
                out.push(ESCAPE);
            }
            out.push(byte);
        }
        out.extend_from_slice(&[END, END]);
        out
    }
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc.wrapping_add(*b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UnpackState {
    Hunting,
    Collecting,
    Done,
}

/// Strips the `AA AA .. 55 55` envelope and the byte stuffing.
#[derive(Debug)]
pub struct EscapedFrameSync {
    buffer: Vec<u8>,
    state: UnpackState,
    escaped: bool,
    last_raw: Option<u8>,
}

impl EscapedFrameSync {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            state: UnpackState::Hunting,
            escaped: false,
            last_raw: None,
        }
    }
}

impl Default for EscapedFrameSync {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameSync for EscapedFrameSync {
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
                } else if byte == END && self.last_raw == Some(END) {
                    self.buffer.pop();
                    self.state = UnpackState::Done;
                    return true;
                } else if byte == START && self.last_raw == Some(START) {
                    trace!("InMotion frame restarted");
                    self.buffer.clear();
                    self.last_raw = None;
                } else {
                    self.buffer.push(byte);
                    self.last_raw = Some(byte);
                }
                if self.buffer.len() > MAX_CONTENT_LEN {
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

/// Model name and pack configuration by model code.
fn model_for(code: u32) -> Option<(&'static str, PackSeries)> {
    let model = match code {
        0 => ("R1N", PackSeries::S16),
        1 => ("R1S", PackSeries::S16),
        7 => ("R10", PackSeries::S16),
        10 => ("V3", PackSeries::S16),
        12 => ("V3PRO", PackSeries::S16),
        20 => ("R2", PackSeries::S16),
        30 => ("R0", PackSeries::S16),
        50 => ("V5", PackSeries::S16),
        51 => ("V5PLUS", PackSeries::S16),
        52 => ("V5F", PackSeries::S16),
        53 => ("V5D", PackSeries::S16),
        60 => ("L6", PackSeries::S16),
        80 => ("V8", PackSeries::S20),
        85 => ("V8F", PackSeries::S20),
        86 => ("V8S", PackSeries::S20),
        100 => ("V10S", PackSeries::S20),
        101 => ("V10SF", PackSeries::S20),
        140 => ("V10", PackSeries::S20),
        141 => ("V10F", PackSeries::S20),
        142 => ("V10T", PackSeries::S20),
        143 => ("V10FT", PackSeries::S20),
        _ => return None,
    };
    Some(model)
}

#[derive(Debug)]
struct InmotionFrames {
    series: PackSeries,
    model: String,
    slow_info_seen: bool,
    fast_info_seen: bool,
}

impl Default for InmotionFrames {
    fn default() -> Self {
        Self {
            series: PackSeries::S20,
            model: String::new(),
            slow_info_seen: false,
            fast_info_seen: false,
        }
    }
}

impl InmotionFrames {
    fn process_frame(
        &mut self,
        content: &[u8],
        mut state: WheelState,
        config: &DecoderConfig,
    ) -> Option<DecodeResult> {
        let message = CanMessage::parse(content)?;
        state.wheel_type = WheelType::Inmotion;
        match message.id {
            ID_FAST_INFO => self.fast_info(&message.ex_data, state, config),
            ID_SLOW_INFO => self.slow_info(&message.ex_data, state),
            other => {
                debug!("Ignoring InMotion message {:#010X}", other);
                None
            }
        }
    }

    /// Extended data:
    /// [0-3] pitch, 1/65536 °; [12-15], [16-19] wheel speed counts;
    /// [20-23] phase current, 1/100 A; [24-27] voltage, 1/100 V;
    /// [32] temperature, °C; [44-47] total distance, m;
    /// [48-51] trip distance, m; [72-75] roll, 1/90 °
    fn fast_info(&mut self, ex: &[u8], mut state: WheelState, config: &DecoderConfig) -> Option<DecodeResult> {
        if ex.len() < FAST_INFO_LEN {
            debug!("Short InMotion fast info ({} bytes)", ex.len());
            return None;
        }
        let counts = (u32_le(ex, 12) as i32 as f64 + u32_le(ex, 16) as i32 as f64) / 2.0;
        let speed = counts / SPEED_FACTOR * 3.6 * 100.0;
        let phase = u32_le(ex, 20) as i32;
        let voltage = u32_le(ex, 24) as i32;

        state.angle = u32_le(ex, 0) as i32 as f64 / 65536.0;
        state.speed = config.sign_mode.apply(round_half_up(speed) as i32);
        state.phase_current = config.sign_mode.apply(phase);
        state.current = state.phase_current;
        state.voltage = voltage;
        state.temperature = ex[32] as i8 as i32 * 100;
        state.total_distance = u32_le(ex, 44) as i64;
        state.wheel_distance = u32_le(ex, 48) as i64;
        state.roll = u32_le(ex, 72) as i32 as f64 / 90.0;
        state.battery_level = battery_percent(voltage, self.series, config.better_percents);
        state.update_power();

        self.fast_info_seen = true;
        Some(DecodeResult::new(state, true))
    }

    /// Extended data:
    /// [0-7] serial (reversed); [24-27] firmware; [60-63] max speed,
    /// 1/1000 km/h; [80] light; [104] and [107] model code
    fn slow_info(&mut self, ex: &[u8], mut state: WheelState) -> Option<DecodeResult> {
        if ex.len() < SLOW_INFO_LEN {
            debug!("Short InMotion slow info ({} bytes)", ex.len());
            return None;
        }
        let serial: String = ex[..8].iter().rev().map(|b| format!("{:02X}", b)).collect();
        let firmware = u32_le(ex, 24);
        let code = ex[104] as u32 * 10 + ex[107] as u32;

        if let Some((model, series)) = model_for(code) {
            if self.model != model {
                info!("InMotion model: {}", model);
            }
            self.model = model.to_string();
            self.series = series;
        } else {
            debug!("Unknown InMotion model code {}", code);
            self.model = format!("InMotion {}", code);
        }

        state.serial = serial;
        state.model = self.model.clone();
        state.name = self.model.clone();
        state.version = format!(
            "{}.{}.{}",
            firmware >> 24,
            (firmware >> 16) & 0xFF,
            firmware & 0xFFFF
        );
        state.speed_limit = (u32_le(ex, 60) / 1000) as i32;
        state.light_mode = ex[80] as i32;

        self.slow_info_seen = true;
        Some(DecodeResult::new(state, false))
    }
}

pub struct InmotionDecoder {
    unpacker: EscapedFrameSync,
    frames: InmotionFrames,
    poll_count: u32,
}

impl InmotionDecoder {
    pub fn new() -> Self {
        Self {
            unpacker: EscapedFrameSync::new(),
            frames: InmotionFrames::default(),
            poll_count: 0,
        }
    }
}

impl Default for InmotionDecoder {
    fn default() -> Self {
        Self::new()
    }
}

fn message(msg: CanMessage) -> Vec<WireCommand> {
    vec![WireCommand::send(msg.to_bytes())]
}

fn u32_pair(first: u32, second: u32) -> [u8; 8] {
    let mut data = [0u8; 8];
    data[..4].copy_from_slice(&first.to_le_bytes());
    data[4..].copy_from_slice(&second.to_le_bytes());
    data
}

impl WheelDecoder for InmotionDecoder {
    fn wheel_type(&self) -> WheelType {
        WheelType::Inmotion
    }

    fn decode(
        &mut self,
        data: &[u8],
        state: &WheelState,
        config: &DecoderConfig,
    ) -> Option<DecodeResult> {
        let frames = &mut self.frames;
        decode_frames(data, &mut self.unpacker, state, |content, current| {
            frames.process_frame(content, current, config)
        })
    }

    fn encode(&self, command: &WheelCommand) -> Vec<WireCommand> {
        match command {
            WheelCommand::Beep => message(CanMessage::command(
                ID_PLAY_SOUND,
                [0x18, 0, 0x01, 0, 0, 0, 0, 0],
            )),
            WheelCommand::SetLight(on) => {
                message(CanMessage::command(ID_LIGHT, [*on as u8, 0, 0, 0, 0, 0, 0, 0]))
            }
            WheelCommand::Calibrate => message(CanMessage::command(
                ID_CALIBRATION,
                [0x32, 0x54, 0x76, 0x98, 0, 0, 0, 0],
            )),
            WheelCommand::SetPedalsMode(mode) if *mode <= 1 => message(CanMessage::command(
                ID_RIDE_MODE,
                u32_pair(0, *mode as u32),
            )),
            WheelCommand::SetTiltBackSpeed(kmh) => message(CanMessage::command(
                ID_RIDE_MODE,
                u32_pair(1, *kmh as u32 * 1000),
            )),
            WheelCommand::PowerOff => message(CanMessage::command(
                ID_REMOTE_CONTROL,
                u32_pair(0xB2, 0x05),
            )),
            WheelCommand::RequestName | WheelCommand::RequestSerial | WheelCommand::RequestFirmware => {
                message(CanMessage::request(ID_SLOW_INFO))
            }
            _ => Vec::new(),
        }
    }

    fn is_ready(&self) -> bool {
        self.frames.slow_info_seen && self.frames.fast_info_seen
    }

    fn reset(&mut self) {
        self.unpacker.reset();
        self.frames = InmotionFrames::default();
        self.poll_count = 0;
    }

    fn keep_alive_interval(&self) -> Option<Duration> {
        Some(KEEP_ALIVE_INTERVAL)
    }

    fn keep_alive_request(&mut self) -> Option<WireCommand> {
        self.poll_count = self.poll_count.wrapping_add(1);
        let id = if !self.frames.slow_info_seen && self.poll_count % SLOW_INFO_EVERY == 1 {
            ID_SLOW_INFO
        } else {
            ID_FAST_INFO
        };
        Some(WireCommand::send(CanMessage::request(id).to_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extended(id: u32, ex: Vec<u8>) -> Vec<u8> {
        let mut data = [0u8; 8];
        data[..4].copy_from_slice(&(ex.len() as u32).to_le_bytes());
        CanMessage {
            id,
            data,
            len: LEN_EXTENDED,
            channel: CHANNEL,
            format: 0,
            kind: TYPE_DATA,
            ex_data: ex,
        }
        .to_bytes()
    }

    fn put(ex: &mut [u8], offset: usize, value: i32) {
        ex[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn fast_info() -> Vec<u8> {
        let mut ex = vec![0u8; FAST_INFO_LEN];
        put(&mut ex, 0, 65536 * 3);
        put(&mut ex, 12, 38120);
        put(&mut ex, 16, 38120);
        put(&mut ex, 20, -1234);
        put(&mut ex, 24, 8150);
        ex[32] = 35;
        put(&mut ex, 44, 987_654);
        put(&mut ex, 48, 4321);
        put(&mut ex, 72, 180);
        extended(ID_FAST_INFO, ex)
    }

    fn slow_info() -> Vec<u8> {
        let mut ex = vec![0u8; SLOW_INFO_LEN];
        ex[..8].copy_from_slice(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        put(&mut ex, 24, (1 << 24) | (4 << 16) | 17);
        put(&mut ex, 60, 30_000);
        ex[80] = 1;
        ex[104] = 8;
        ex[107] = 0;
        extended(ID_SLOW_INFO, ex)
    }

    #[test]
    fn test_round_trip_escaping() {
        let msg = CanMessage::command(ID_LIGHT, [0xAA, 0x55, 0xA5, 0, 0, 0, 0, 0]);
        let bytes = msg.to_bytes();
        let mut sync = EscapedFrameSync::new();
        let mut decoded = None;
        for b in bytes {
            if sync.add_byte(b) {
                decoded = CanMessage::parse(sync.current_frame());
            }
        }
        assert_eq!(decoded, Some(msg));
    }

    #[test]
    fn test_truncated_frames_are_none() {
        let full = fast_info();
        for n in 0..full.len() {
            let mut decoder = InmotionDecoder::new();
            assert!(decoder
                .decode(&full[..n], &WheelState::default(), &DecoderConfig::default())
                .is_none());
        }
    }

    #[test]
    fn test_fast_info() {
        let mut decoder = InmotionDecoder::new();
        let result = decoder
            .decode(&fast_info(), &WheelState::default(), &DecoderConfig::default())
            .unwrap();
        let state = result.state;
        assert!(result.has_new_data);
        assert_eq!(state.wheel_type, WheelType::Inmotion);
        assert_eq!(state.speed, 3600);
        assert_eq!(state.current, 1234);
        assert_eq!(state.voltage, 8150);
        assert_eq!(state.temperature, 3500);
        assert_eq!(state.total_distance, 987_654);
        assert_eq!(state.wheel_distance, 4321);
        assert_eq!(state.angle, 3.0);
        assert_eq!(state.roll, 2.0);
        assert!(!decoder.is_ready());
    }

    #[test]
    fn test_slow_info_identifies_wheel() {
        let mut decoder = InmotionDecoder::new();
        let config = DecoderConfig::default();
        let data = [slow_info(), fast_info()].concat();
        let result = decoder.decode(&data, &WheelState::default(), &config).unwrap();
        let state = result.state;
        assert_eq!(state.model, "V8");
        assert_eq!(state.serial, "0807060504030201");
        assert_eq!(state.version, "1.4.17");
        assert_eq!(state.speed_limit, 30);
        assert_eq!(state.light_mode, 1);
        assert!(result.has_new_data);
        assert!(decoder.is_ready());
    }

    fn unwrap_content(frame: &[u8]) -> Vec<u8> {
        let mut sync = EscapedFrameSync::new();
        for &b in frame {
            if sync.add_byte(b) {
                return sync.current_frame().to_vec();
            }
        }
        panic!("no frame");
    }

    fn wrap_content(content: &[u8]) -> Vec<u8> {
        let mut out = vec![START, START];
        for &b in content {
            if matches!(b, START | END | ESCAPE) {
                out.push(ESCAPE);
            }
            out.push(b);
        }
        out.extend_from_slice(&[END, END]);
        out
    }

    #[test]
    fn test_bad_checksum_is_none() {
        let mut content = unwrap_content(&fast_info());
        let last = content.len() - 1;
        content[last] = content[last].wrapping_add(1);
        assert!(CanMessage::parse(&content).is_none());

        let mut decoder = InmotionDecoder::new();
        assert!(decoder
            .decode(&wrap_content(&content), &WheelState::default(), &DecoderConfig::default())
            .is_none());
    }

    #[test]
    fn test_keep_alive_polls() {
        let mut decoder = InmotionDecoder::new();
        assert_eq!(decoder.keep_alive_interval(), Some(Duration::from_millis(25)));

        let slow = WireCommand::send(CanMessage::request(ID_SLOW_INFO).to_bytes());
        let fast = WireCommand::send(CanMessage::request(ID_FAST_INFO).to_bytes());
        assert_eq!(decoder.keep_alive_request(), Some(slow));
        assert_eq!(decoder.keep_alive_request(), Some(fast.clone()));

        decoder.decode(&slow_info(), &WheelState::default(), &DecoderConfig::default());
        for _ in 0..8 {
            assert_eq!(decoder.keep_alive_request(), Some(fast.clone()));
        }
    }

    #[test]
    fn test_commands() {
        let decoder = InmotionDecoder::new();
        let light = decoder.build_command(&WheelCommand::SetLight(true));
        assert_eq!(light.len(), 1);
        assert_eq!(&light[0].bytes()[..2], &[0xAA, 0xAA]);
        let parsed = CanMessage::parse(&unwrap_content(light[0].bytes())).unwrap();
        assert_eq!(parsed.id, ID_LIGHT);
        assert_eq!(parsed.data[0], 1);
        assert!(decoder.build_command(&WheelCommand::ResetTrip).is_empty());
    }
}
