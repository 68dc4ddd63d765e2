//! Ninebot Z series protocol
//!
//! # Frame layout
//!
//! ```text
//! [0-1]    : 5A A5 header
//! [2]      : data length
//! [3]      : source address
//! [4]      : destination address
//! [5]      : command (0x01 read, 0x03 write, 0x04 read reply, 0x5B key)
//! [6]      : parameter
//! [7..]    : data
//! [last 2] : checksum, little-endian: (sum of [2]..data) ^ 0xFFFF
//! ```
//!
//! Everything after the length byte is XORed with a 16-byte "gamma" key.
//! The key starts as all zeroes; the wheel hands out the real one in reply to
//! a key request, and every later frame in both directions uses it.

use super::battery::PackSeries;
use super::bytes::{ascii, i16_le, u16_le};
use super::framing::{decode_frames, DecodeResult, FrameSync, LengthPrefixedSync};
use super::ninebot::{apply_live_data, checksum, format_version, LIVE_LEN};
use super::WheelDecoder;
use crate::domain::commands::{WheelCommand, WireCommand};
use crate::domain::config::DecoderConfig;
use crate::domain::models::{WheelState, WheelType};
use std::time::Duration;
use tracing::{debug, info};

pub const HEADER: [u8; 2] = [0x5A, 0xA5];
const OVERHEAD: usize = 9;
const MAX_FRAME_LEN: usize = 255 + OVERHEAD;
const KEY_LEN: usize = 16;

pub const ADDR_BMS1: u8 = 0x11;
pub const ADDR_BMS2: u8 = 0x12;
pub const ADDR_CONTROLLER: u8 = 0x14;
pub const ADDR_BLE: u8 = 0x16;
pub const ADDR_APP: u8 = 0x3E;

pub const CMD_READ: u8 = 0x01;
pub const CMD_WRITE: u8 = 0x03;
pub const CMD_KEY: u8 = 0x5B;

const PARAM_SERIAL: u8 = 0x10;
const PARAM_FIRMWARE: u8 = 0x1A;
const PARAM_BMS_LIFE: u8 = 0x30;
const PARAM_BMS_CELLS: u8 = 0x40;
const PARAM_LOCK: u8 = 0x70;
const PARAM_UNLOCK: u8 = 0x71;
const PARAM_TILT_BACK: u8 = 0x74;
const PARAM_PEDALS: u8 = 0xD2;
const PARAM_LED_MODE: u8 = 0xC3;
const PARAM_LIGHT: u8 = 0xC6;
const PARAM_BEEPER_VOLUME: u8 = 0xF5;
const PARAM_LIVE: u8 = 0xB0;

const SERIAL_LEN: u8 = 14;
const FIRMWARE_LEN: u8 = 2;
const BMS_LIFE_LEN: usize = 18;
const BMS_CELLS: usize = 16;

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_millis(25);

/// Polling order once the wheel is identified
const POLL_CYCLE: [Request; 8] = [
    Request::Live,
    Request::BmsLife(ADDR_BMS1),
    Request::Live,
    Request::BmsLife(ADDR_BMS2),
    Request::Live,
    Request::BmsCells(ADDR_BMS1),
    Request::Live,
    Request::BmsCells(ADDR_BMS2),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Request {
    Key,
    Serial,
    Firmware,
    Live,
    BmsLife(u8),
    BmsCells(u8),
}

/// XOR every byte after the length byte with the key.
pub fn apply_gamma(frame: &mut [u8], gamma: &[u8; KEY_LEN]) {
    for (i, byte) in frame.iter_mut().enumerate().skip(3) {
        *byte ^= gamma[(i - 3) % KEY_LEN];
    }
}

/// Complete, obfuscated frame.
pub fn build_frame(
    src: u8,
    dst: u8,
    cmd: u8,
    param: u8,
    data: &[u8],
    gamma: &[u8; KEY_LEN],
) -> Vec<u8> {
    let mut body = vec![data.len() as u8, src, dst, cmd, param];
    body.extend_from_slice(data);
    let check = checksum(&body);

    let mut frame = HEADER.to_vec();
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&check.to_le_bytes());
    apply_gamma(&mut frame, gamma);
    frame
}

#[derive(Debug, Default)]
struct NinebotZFrames {
    gamma: [u8; KEY_LEN],
    key_received: bool,
    serial: String,
    version: String,
    live_seen: bool,
}

impl NinebotZFrames {
    fn process_frame(
        &mut self,
        frame: &[u8],
        mut state: WheelState,
        config: &DecoderConfig,
    ) -> Option<DecodeResult> {
        if frame.len() < OVERHEAD || frame.len() != frame[2] as usize + OVERHEAD {
            return None;
        }
        let mut plain = frame.to_vec();
        apply_gamma(&mut plain, &self.gamma);

        let (body, check) = plain[2..].split_at(plain.len() - 4);
        if checksum(body) != u16_le(check, 0) {
            debug!("Ninebot Z checksum mismatch");
            return None;
        }
        let src = body[1];
        let cmd = body[3];
        let param = body[4];
        let data = &body[5..];
        state.wheel_type = WheelType::NinebotZ;

        if cmd == CMD_KEY {
            if data.len() < KEY_LEN {
                return None;
            }
            self.gamma.copy_from_slice(&data[..KEY_LEN]);
            self.key_received = true;
            info!("Ninebot Z key exchange complete");
            return Some(DecodeResult::new(state, false));
        }

        match (src, param) {
            (ADDR_CONTROLLER, PARAM_SERIAL) => {
                self.serial = ascii(data);
                info!("Ninebot Z serial: {}", self.serial);
                state.serial = self.serial.clone();
                state.model = "Ninebot Z".to_string();
                Some(DecodeResult::new(state, false))
            }
            (ADDR_CONTROLLER, PARAM_FIRMWARE) if data.len() >= 2 => {
                self.version = format_version(u16_le(data, 0));
                state.version = self.version.clone();
                Some(DecodeResult::new(state, false))
            }
            (ADDR_CONTROLLER, PARAM_LIVE) if data.len() >= LIVE_LEN => {
                apply_live_data(data, &mut state, config, PackSeries::S16);
                self.live_seen = true;
                Some(DecodeResult::new(state, true))
            }
            (ADDR_BMS1 | ADDR_BMS2, _) => bms(src, param, data, state),
            _ => {
                debug!("Ignoring Ninebot Z reply {:#04X}/{:#04X}", src, param);
                None
            }
        }
    }
}

/// Life data: [2-3] remaining capacity, mAh; [6-7] current, 10 mA;
/// [8-9] voltage, 10 mV; [10], [11] temperatures, °C + 20;
/// [14-15] health %; [16-17] full cycles.
/// Cells: sixteen cell voltages, mV.
fn bms(src: u8, param: u8, data: &[u8], mut state: WheelState) -> Option<DecodeResult> {
    let pack = if src == ADDR_BMS2 { 2 } else { 1 };
    match param {
        PARAM_SERIAL => {
            state.bms_mut(pack).serial_number = ascii(data);
        }
        PARAM_BMS_LIFE if data.len() >= BMS_LIFE_LEN => {
            let bms = state.bms_mut(pack);
            bms.remaining_capacity = u16_le(data, 2) as i32;
            bms.current = i16_le(data, 6) as f64 / 100.0;
            bms.voltage = u16_le(data, 8) as f64 / 100.0;
            bms.temperatures = vec![data[10] as f64 - 20.0, data[11] as f64 - 20.0];
            bms.health = u16_le(data, 14) as i32;
            bms.full_cycles = u16_le(data, 16) as i32;
        }
        PARAM_BMS_CELLS if data.len() >= BMS_CELLS * 2 => {
            let bms = state.bms_mut(pack);
            for i in 0..BMS_CELLS {
                let millivolts = u16_le(data, i * 2);
                if millivolts != 0 {
                    bms.set_cell(i, millivolts as f64 / 1000.0);
                }
            }
            bms.update_cell_stats();
        }
        _ => return None,
    }
    Some(DecodeResult::new(state, false))
}

pub struct NinebotZDecoder {
    unpacker: LengthPrefixedSync,
    frames: NinebotZFrames,
    poll_count: usize,
}

impl NinebotZDecoder {
    pub fn new() -> Self {
        Self {
            unpacker: LengthPrefixedSync::new(&HEADER, OVERHEAD, MAX_FRAME_LEN),
            frames: NinebotZFrames::default(),
            poll_count: 0,
        }
    }

    fn frame(&self, dst: u8, cmd: u8, param: u8, data: &[u8]) -> WireCommand {
        WireCommand::send(build_frame(
            ADDR_APP,
            dst,
            cmd,
            param,
            data,
            &self.frames.gamma,
        ))
    }

    fn write(&self, param: u8, data: &[u8]) -> Vec<WireCommand> {
        vec![self.frame(ADDR_CONTROLLER, CMD_WRITE, param, data)]
    }

    fn request(&self, request: Request) -> WireCommand {
        match request {
            Request::Key => self.frame(ADDR_BLE, CMD_KEY, 0x00, &[]),
            Request::Serial => self.frame(ADDR_CONTROLLER, CMD_READ, PARAM_SERIAL, &[SERIAL_LEN]),
            Request::Firmware => {
                self.frame(ADDR_CONTROLLER, CMD_READ, PARAM_FIRMWARE, &[FIRMWARE_LEN])
            }
            Request::Live => {
                self.frame(ADDR_CONTROLLER, CMD_READ, PARAM_LIVE, &[LIVE_LEN as u8])
            }
            Request::BmsLife(addr) => {
                self.frame(addr, CMD_READ, PARAM_BMS_LIFE, &[BMS_LIFE_LEN as u8])
            }
            Request::BmsCells(addr) => {
                self.frame(addr, CMD_READ, PARAM_BMS_CELLS, &[(BMS_CELLS * 2) as u8])
            }
        }
    }
}

impl Default for NinebotZDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl WheelDecoder for NinebotZDecoder {
    fn wheel_type(&self) -> WheelType {
        WheelType::NinebotZ
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
                self.write(param, &[0x01, 0x00])
            }
            WheelCommand::SetLight(on) => self.write(PARAM_LIGHT, &[*on as u8, 0x00]),
            WheelCommand::SetLedMode(mode) => self.write(PARAM_LED_MODE, &[*mode, 0x00]),
            WheelCommand::SetPedalsMode(mode) if *mode <= 2 => {
                self.write(PARAM_PEDALS, &[*mode, 0x00])
            }
            WheelCommand::SetTiltBackSpeed(kmh) => {
                self.write(PARAM_TILT_BACK, &(*kmh as u16 * 10).to_le_bytes())
            }
            WheelCommand::SetBeeperVolume(volume) => {
                self.write(PARAM_BEEPER_VOLUME, &[*volume, 0x00])
            }
            WheelCommand::RequestName | WheelCommand::RequestSerial => {
                vec![self.request(Request::Serial)]
            }
            WheelCommand::RequestFirmware => vec![self.request(Request::Firmware)],
            _ => Vec::new(),
        }
    }

    fn is_ready(&self) -> bool {
        self.frames.key_received && !self.frames.serial.is_empty() && self.frames.live_seen
    }

    fn reset(&mut self) {
        self.frames = NinebotZFrames::default();
        self.unpacker.reset();
        self.poll_count = 0;
    }

    fn keep_alive_interval(&self) -> Option<Duration> {
        Some(KEEP_ALIVE_INTERVAL)
    }

    fn keep_alive_request(&mut self) -> Option<WireCommand> {
        let request = if !self.frames.key_received {
            Request::Key
        } else if self.frames.serial.is_empty() {
            Request::Serial
        } else if self.frames.version.is_empty() {
            Request::Firmware
        } else {
            let next = POLL_CYCLE[self.poll_count % POLL_CYCLE.len()];
            self.poll_count = self.poll_count.wrapping_add(1);
            next
        };
        Some(self.request(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: [u8; KEY_LEN] = [
        0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xF0,
        0x0F,
    ];
    const ZERO: [u8; KEY_LEN] = [0; KEY_LEN];
    const CMD_REPLY: u8 = 0x04;

    fn key_reply() -> Vec<u8> {
        build_frame(ADDR_BLE, ADDR_APP, CMD_KEY, 0x00, &KEY, &ZERO)
    }

    fn live_reply(gamma: &[u8; KEY_LEN]) -> Vec<u8> {
        let mut data = vec![0u8; LIVE_LEN];
        data[8..10].copy_from_slice(&64u16.to_le_bytes());
        data[10..12].copy_from_slice(&2222i16.to_le_bytes());
        data[24..26].copy_from_slice(&5480u16.to_le_bytes());
        data[26..28].copy_from_slice(&(-300i16).to_le_bytes());
        build_frame(ADDR_CONTROLLER, ADDR_APP, CMD_REPLY, PARAM_LIVE, &data, gamma)
    }

    #[test]
    fn test_gamma_is_symmetric() {
        let plain = build_frame(ADDR_APP, ADDR_CONTROLLER, CMD_READ, PARAM_LIVE, &[0x20], &ZERO);
        let mut obfuscated = build_frame(ADDR_APP, ADDR_CONTROLLER, CMD_READ, PARAM_LIVE, &[0x20], &KEY);
        assert_eq!(&obfuscated[..3], &plain[..3]);
        assert_ne!(obfuscated, plain);
        apply_gamma(&mut obfuscated, &KEY);
        assert_eq!(obfuscated, plain);
    }

    #[test]
    fn test_truncated_frames_are_none() {
        let full = live_reply(&ZERO);
        for n in 0..full.len() {
            let mut decoder = NinebotZDecoder::new();
            assert!(decoder
                .decode(&full[..n], &WheelState::default(), &DecoderConfig::default())
                .is_none());
        }
    }

    #[test]
    fn test_key_exchange_then_live_data() {
        let mut decoder = NinebotZDecoder::new();
        let config = DecoderConfig::default();
        assert_eq!(
            decoder.keep_alive_request(),
            Some(WireCommand::send(build_frame(ADDR_APP, ADDR_BLE, CMD_KEY, 0, &[], &ZERO)))
        );

        let state = decoder.decode(&key_reply(), &WheelState::default(), &config).unwrap().state;
        assert_eq!(state.wheel_type, WheelType::NinebotZ);

        // frames with the old key no longer check out
        assert!(decoder.decode(&live_reply(&ZERO), &state, &config).is_none());

        let result = decoder.decode(&live_reply(&KEY), &state, &config).unwrap();
        assert!(result.has_new_data);
        assert_eq!(result.state.speed, 2222);
        assert_eq!(result.state.voltage, 5480);
        assert_eq!(result.state.current, 300);
        assert_eq!(result.state.battery_level, 64);

        // requests now go out under the new key
        assert_eq!(
            decoder.keep_alive_request(),
            Some(WireCommand::send(build_frame(
                ADDR_APP,
                ADDR_CONTROLLER,
                CMD_READ,
                PARAM_SERIAL,
                &[SERIAL_LEN],
                &KEY
            )))
        );
    }

    #[test]
    fn test_reset_drops_session_key() {
        let mut decoder = NinebotZDecoder::new();
        let config = DecoderConfig::default();
        decoder.decode(&key_reply(), &WheelState::default(), &config).unwrap();
        assert!(decoder.decode(&live_reply(&ZERO), &WheelState::default(), &config).is_none());

        decoder.reset();
        assert!(!decoder.is_ready());
        assert_eq!(
            decoder.keep_alive_request(),
            Some(WireCommand::send(build_frame(ADDR_APP, ADDR_BLE, CMD_KEY, 0, &[], &ZERO)))
        );
        let result = decoder.decode(&live_reply(&ZERO), &WheelState::default(), &config).unwrap();
        assert_eq!(result.state.speed, 2222);
    }

    #[test]
    fn test_bms_replies() {
        let mut decoder = NinebotZDecoder::new();
        let config = DecoderConfig::default();
        let mut life = vec![0u8; BMS_LIFE_LEN];
        life[2..4].copy_from_slice(&4200u16.to_le_bytes());
        life[6..8].copy_from_slice(&(-250i16).to_le_bytes());
        life[8..10].copy_from_slice(&5712u16.to_le_bytes());
        life[10] = 45;
        life[11] = 47;
        life[14..16].copy_from_slice(&98u16.to_le_bytes());
        let mut cells = vec![0u8; BMS_CELLS * 2];
        cells[0..2].copy_from_slice(&3570u16.to_le_bytes());
        cells[2..4].copy_from_slice(&3580u16.to_le_bytes());

        let data = [
            build_frame(ADDR_BMS2, ADDR_APP, CMD_REPLY, PARAM_BMS_LIFE, &life, &ZERO),
            build_frame(ADDR_BMS2, ADDR_APP, CMD_REPLY, PARAM_BMS_CELLS, &cells, &ZERO),
        ]
        .concat();
        let result = decoder.decode(&data, &WheelState::default(), &config).unwrap();
        assert!(!result.has_new_data);
        let bms = result.state.bms2.unwrap();
        assert_eq!(bms.remaining_capacity, 4200);
        assert_eq!(bms.current, -2.5);
        assert_eq!(bms.voltage, 57.12);
        assert_eq!(bms.temperatures, vec![25.0, 27.0]);
        assert_eq!(bms.health, 98);
        assert_eq!(bms.cells, vec![3.57, 3.58]);
        assert!(result.state.bms1.is_none());
    }

    #[test]
    fn test_poll_cycle_after_identification() {
        let mut decoder = NinebotZDecoder::new();
        let config = DecoderConfig::default();
        let serial = build_frame(ADDR_CONTROLLER, ADDR_APP, CMD_REPLY, PARAM_SERIAL, b"N3OTC1234", &ZERO);
        let firmware = build_frame(ADDR_CONTROLLER, ADDR_APP, CMD_REPLY, PARAM_FIRMWARE, &[0x03, 0x01], &ZERO);
        decoder.frames.key_received = true;
        let state = decoder
            .decode(&[serial, firmware].concat(), &WheelState::default(), &config)
            .unwrap()
            .state;
        assert_eq!(state.serial, "N3OTC1234");
        assert_eq!(state.version, "1.0.3");

        let expected: Vec<WireCommand> = POLL_CYCLE.iter().map(|r| decoder.request(*r)).collect();
        for request in expected.iter().chain(expected.iter()) {
            assert_eq!(decoder.keep_alive_request().as_ref(), Some(request));
        }
    }

    #[test]
    fn test_commands() {
        let decoder = NinebotZDecoder::new();
        let lock = decoder.build_command(&WheelCommand::SetLock(false));
        assert_eq!(
            lock,
            vec![WireCommand::send(build_frame(
                ADDR_APP,
                ADDR_CONTROLLER,
                CMD_WRITE,
                PARAM_UNLOCK,
                &[0x01, 0x00],
                &ZERO
            ))]
        );
        assert!(decoder.build_command(&WheelCommand::Beep).is_empty());
    }
}
