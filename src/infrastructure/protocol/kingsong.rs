//! KingSong protocol
//!
//! # Frame layout (20 bytes, little-endian fields)
//!
//! ```text
//! [0-1]   : AA 55 header
//! [2-15]  : payload
//! [16]    : frame type
//! [17]    : sub type / page (0x14 on most frames)
//! [18-19] : 5A 5A
//! ```
//!
//! Distances are sent as two little-endian words with the high word first.
//! Outgoing commands use the same layout with the command byte at offset 16.

use super::battery::{battery_percent, PackSeries};
use super::bytes::{ascii, i16_le, round_half_up, u16_le, u32_swapped_words};
use super::framing::{decode_frames, DecodeResult, FixedFrameSync};
use super::WheelDecoder;
use crate::domain::commands::{WheelCommand, WireCommand};
use crate::domain::config::DecoderConfig;
use crate::domain::models::{WheelState, WheelType, MAX_BMS_CELLS};
use tracing::{debug, info};

pub const HEADER: [u8; 2] = [0xAA, 0x55];
pub const FOOTER: [u8; 2] = [0x5A, 0x5A];
pub const FRAME_LEN: usize = 20;

const TYPE_LIVE: u8 = 0xA9;
const TYPE_ALARMS_LEGACY: u8 = 0xA4;
const TYPE_SERIAL: u8 = 0xB3;
const TYPE_ALARMS: u8 = 0xB5;
const TYPE_TRIP: u8 = 0xB9;
const TYPE_NAME: u8 = 0xBB;
const TYPE_BMS1: u8 = 0xF1;
const TYPE_BMS2: u8 = 0xF2;
const TYPE_CPU: u8 = 0xF5;
const TYPE_SPEED_LIMIT: u8 = 0xF6;

const CMD_LOCK: u8 = 0x5D;
const CMD_SERIAL_REQUEST: u8 = 0x63;
const CMD_LED_MODE: u8 = 0x6C;
const CMD_LIGHT: u8 = 0x73;
const CMD_POWER_OFF: u8 = 0x40;
const CMD_SET_ALARMS: u8 = 0x85;
const CMD_PEDALS: u8 = 0x87;
const CMD_BEEP: u8 = 0x88;
const CMD_CALIBRATE: u8 = 0x89;
const CMD_NAME_REQUEST: u8 = 0x9B;
const CMD_ALARMS_REQUEST: u8 = 0x98;

/// Distance correction for early KS-18L firmware
const KS18L_SCALER: f64 = 0.83;

const CELLS_PER_PAGE: usize = 7;

#[derive(Debug, Default)]
struct KingsongFrames {
    model: String,
    serial: String,
    live_voltage_seen: bool,
    name_requested: bool,
    serial_requested: bool,
}

pub struct KingsongDecoder {
    unpacker: FixedFrameSync,
    frames: KingsongFrames,
}

impl KingsongDecoder {
    pub fn new() -> Self {
        Self {
            unpacker: FixedFrameSync::new(&HEADER, FRAME_LEN, &FOOTER),
            frames: KingsongFrames::default(),
        }
    }
}

impl Default for KingsongDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Pack configuration by model name.
fn pack_series(model: &str) -> PackSeries {
    let model = model.to_ascii_uppercase();
    if ["S20", "S21", "S22"].iter().any(|m| model.contains(m)) {
        PackSeries::S30
    } else if model.contains("S19") {
        PackSeries::S24
    } else if ["16X", "18L", "18XL", "S18", "F22"]
        .iter()
        .any(|m| model.contains(m))
    {
        PackSeries::S20
    } else {
        PackSeries::S16
    }
}

/// `KS-S18-0205` -> (`KS-S18`, `2.05`)
fn split_name(name: &str) -> (String, String) {
    match name.rsplit_once('-') {
        Some((model, version))
            if version.len() == 4 && version.chars().all(|c| c.is_ascii_digit()) =>
        {
            let number: u32 = version.parse().unwrap_or(0);
            (model.to_string(), format!("{}.{:02}", number / 100, number % 100))
        }
        _ => (name.to_string(), String::new()),
    }
}

impl KingsongFrames {
    fn process_frame(
        &mut self,
        frame: &[u8],
        mut state: WheelState,
        config: &DecoderConfig,
    ) -> Option<DecodeResult> {
        if frame.len() != FRAME_LEN || frame[..2] != HEADER {
            return None;
        }
        state.wheel_type = WheelType::Kingsong;

        let result = match frame[16] {
            TYPE_LIVE => self.live_data(frame, state, config),
            TYPE_TRIP => self.trip_data(frame, state, config),
            TYPE_NAME => self.name(frame, state),
            TYPE_SERIAL => {
                self.serial = ascii(&frame[2..16]);
                info!("KingSong serial: {}", self.serial);
                state.serial = self.serial.clone();
                DecodeResult::new(state, false)
            }
            TYPE_ALARMS | TYPE_ALARMS_LEGACY => {
                state.alarm_speeds = [frame[4] as i32, frame[6] as i32, frame[8] as i32];
                state.top_speed = frame[10] as i32 * 100;
                DecodeResult::new(state, false)
            }
            TYPE_CPU => {
                state.cpu_load = frame[14] as i32;
                state.output = frame[15] as i32 * 100;
                DecodeResult::new(state, false)
            }
            TYPE_SPEED_LIMIT => {
                state.speed_limit = round_half_up(u16_le(frame, 2) as f64 / 100.0) as i32;
                DecodeResult::new(state, false)
            }
            TYPE_BMS1 => self.bms(frame, state, 1),
            TYPE_BMS2 => self.bms(frame, state, 2),
            other => {
                debug!("Unknown KingSong frame type {:#04X}", other);
                return None;
            }
        };
        Some(result)
    }

    fn distance(&self, raw: u32, config: &DecoderConfig) -> i64 {
        if config.ks18l_scaler && self.model.to_ascii_uppercase().contains("18L") {
            round_half_up(raw as f64 * KS18L_SCALER)
        } else {
            raw as i64
        }
    }

    fn live_data(&mut self, frame: &[u8], mut state: WheelState, config: &DecoderConfig) -> DecodeResult {
        let voltage = u16_le(frame, 2) as i32;
        state.voltage = voltage;
        state.speed = config.sign_mode.apply(i16_le(frame, 4) as i32);
        state.total_distance = self.distance(u32_swapped_words(frame, 6), config);
        state.current = i16_le(frame, 10) as i32;
        state.temperature = i16_le(frame, 12) as i32;
        if frame[15] == 0xE0 {
            state.pedals_mode = frame[14] as i32;
        }
        state.battery_level =
            battery_percent(voltage, pack_series(&self.model), config.better_percents);
        state.update_power();

        if voltage != 0 {
            self.live_voltage_seen = true;
        }

        let mut commands = Vec::new();
        if self.model.is_empty() && !self.name_requested {
            self.name_requested = true;
            commands.push(command(CMD_NAME_REQUEST));
        }
        if self.serial.is_empty() && !self.serial_requested {
            self.serial_requested = true;
            commands.push(command(CMD_SERIAL_REQUEST));
        }
        DecodeResult::new(state, true).with_commands(commands)
    }

    fn trip_data(&mut self, frame: &[u8], mut state: WheelState, config: &DecoderConfig) -> DecodeResult {
        state.wheel_distance = self.distance(u32_swapped_words(frame, 2), config);
        state.top_speed = u16_le(frame, 8) as i32;
        state.light_mode = frame[10] as i32;
        state.fan_on = frame[12] != 0;
        state.charging = frame[13] != 0;
        state.temperature2 = i16_le(frame, 14) as i32;
        DecodeResult::new(state, false)
    }

    fn name(&mut self, frame: &[u8], mut state: WheelState) -> DecodeResult {
        let name = ascii(&frame[2..16]);
        let (model, version) = split_name(&name);
        info!("KingSong model: {} ({})", model, name);
        self.model = model.clone();
        state.name = name;
        state.model = model;
        if !version.is_empty() {
            state.version = version;
        }
        DecodeResult::new(state, false)
    }

    /// Page 0 summary, page 1 temperatures, pages 2..=7 seven cells each.
    fn bms(&mut self, frame: &[u8], mut state: WheelState, pack: usize) -> DecodeResult {
        let page = frame[17] as usize;
        if page > 1 + MAX_BMS_CELLS / CELLS_PER_PAGE {
            debug!("Skipping KingSong BMS{} page {}", pack, page);
            return DecodeResult::new(state, false);
        }
        let bms = state.bms_mut(pack);
        match page {
            0 => {
                bms.voltage = u16_le(frame, 2) as f64 / 100.0;
                bms.current = i16_le(frame, 4) as f64 / 100.0;
                bms.remaining_capacity = u16_le(frame, 6) as i32 * 10;
                bms.factory_capacity = u16_le(frame, 8) as i32 * 10;
                bms.full_cycles = u16_le(frame, 10) as i32;
            }
            1 => {
                bms.temperatures = (0..6)
                    .map(|i| i16_le(frame, 2 + i * 2) as f64 / 100.0)
                    .collect();
            }
            _ => {
                for i in 0..CELLS_PER_PAGE {
                    let millivolts = u16_le(frame, 2 + i * 2);
                    if millivolts != 0 {
                        bms.set_cell((page - 2) * CELLS_PER_PAGE + i, millivolts as f64 / 1000.0);
                    }
                }
                bms.update_cell_stats();
            }
        }
        DecodeResult::new(state, false)
    }
}

/// Empty command frame for `kind`.
fn frame_for(kind: u8) -> [u8; FRAME_LEN] {
    let mut f = [0u8; FRAME_LEN];
    f[..2].copy_from_slice(&HEADER);
    f[16] = kind;
    f[17] = 0x14;
    f[18..].copy_from_slice(&FOOTER);
    f
}

fn command(kind: u8) -> WireCommand {
    WireCommand::send(frame_for(kind).to_vec())
}

fn command_with(kind: u8, fill: impl FnOnce(&mut [u8; FRAME_LEN])) -> WireCommand {
    let mut f = frame_for(kind);
    fill(&mut f);
    WireCommand::send(f.to_vec())
}

impl WheelDecoder for KingsongDecoder {
    fn wheel_type(&self) -> WheelType {
        WheelType::Kingsong
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

    fn encode(&self, cmd: &WheelCommand) -> Vec<WireCommand> {
        let wire = match cmd {
            WheelCommand::Beep => command(CMD_BEEP),
            WheelCommand::SetLight(on) => command_with(CMD_LIGHT, |f| {
                f[2] = if *on { 0x12 } else { 0x13 };
                f[3] = 0x01;
            }),
            WheelCommand::SetLightMode(mode) if *mode <= 2 => command_with(CMD_LIGHT, |f| {
                f[2] = 0x12 + mode;
                f[3] = 0x01;
            }),
            WheelCommand::SetLedMode(mode) => command_with(CMD_LED_MODE, |f| f[2] = *mode),
            WheelCommand::Calibrate => command(CMD_CALIBRATE),
            WheelCommand::PowerOff => command(CMD_POWER_OFF),
            WheelCommand::SetPedalsMode(mode) if *mode <= 2 => command_with(CMD_PEDALS, |f| {
                f[2] = *mode;
                f[3] = 0xE0;
                f[17] = 0x15;
            }),
            WheelCommand::SetLock(locked) => command_with(CMD_LOCK, |f| f[2] = *locked as u8),
            WheelCommand::SetSpeedAlarms {
                alarm1,
                alarm2,
                alarm3,
                max_speed,
            } => command_with(CMD_SET_ALARMS, |f| {
                f[2] = *alarm1;
                f[4] = *alarm2;
                f[6] = *alarm3;
                f[8] = *max_speed;
            }),
            WheelCommand::RequestName | WheelCommand::RequestFirmware => command(CMD_NAME_REQUEST),
            WheelCommand::RequestSerial => command(CMD_SERIAL_REQUEST),
            WheelCommand::RequestAlarms => command(CMD_ALARMS_REQUEST),
            _ => return Vec::new(),
        };
        vec![wire]
    }

    fn is_ready(&self) -> bool {
        !self.frames.model.is_empty() && self.frames.live_voltage_seen
    }

    fn reset(&mut self) {
        self.frames = KingsongFrames::default();
        self.unpacker = FixedFrameSync::new(&HEADER, FRAME_LEN, &FOOTER);
    }
}
