//! Gotway / Begode protocol
//!
//! # Frame layout (24 bytes, big-endian fields)
//!
//! ```text
//! [0-1]   : 55 AA header
//! [2-17]  : payload (layout depends on frame type)
//! [18]    : frame type
//!           0x00 live data, 0x01 extended (true voltage),
//!           0x02/0x03 BMS pack 1/2 pages, 0x04 settings,
//!           0x07 battery current / motor temperature,
//!           0xFF firmware settings
//! [19]    : 0x18
//! [20-23] : 5A 5A 5A 5A
//! ```
//!
//! Identification arrives out of band as plain ASCII notifications in reply
//! to the `N` / `V` requests: `NAME <model>`, `GW<version>` or
//! `CF<version>` (custom firmware) and `MPU6050` / `MPU6500`.
//!
//! Commands are single ASCII characters; multi-character settings are sent
//! one character at a time with a pause between them.

use super::battery::{battery_percent, PackSeries};
use super::bytes::{i16_be, round_half_up, u16_be, u32_be};
use super::framing::{decode_frames, DecodeResult, FixedFrameSync};
use super::{miles_to_km, WheelDecoder};
use crate::domain::commands::{WheelCommand, WireCommand};
use crate::domain::config::DecoderConfig;
use crate::domain::models::{WheelState, WheelType, MAX_BMS_CELLS};
use tracing::{debug, info};

pub const HEADER: [u8; 2] = [0x55, 0xAA];
pub const FOOTER: [u8; 5] = [0x18, 0x5A, 0x5A, 0x5A, 0x5A];
pub const FRAME_LEN: usize = 24;

const TYPE_LIVE: u8 = 0x00;
const TYPE_EXTENDED: u8 = 0x01;
const TYPE_BMS1: u8 = 0x02;
const TYPE_BMS2: u8 = 0x03;
const TYPE_SETTINGS: u8 = 0x04;
const TYPE_CURRENT: u8 = 0x07;
const TYPE_FIRMWARE_SETTINGS: u8 = 0xFF;

/// Pause between characters of a multi-character command
const CHAR_DELAY_MS: u64 = 300;
/// Pause between the two halves of the calibration command
const CALIBRATION_DELAY_MS: u64 = 300;
/// Delay before asking for the model name after the firmware request
const NAME_REQUEST_DELAY_MS: u64 = 100;

/// Cells reported per BMS page
const CELLS_PER_PAGE: usize = 7;

/// Decode-time caches
#[derive(Debug, Default)]
struct GotwayFrames {
    firmware: String,
    model: String,
    mpu6500: bool,
    in_miles: bool,
    true_voltage: bool,
    true_current: bool,
    live_voltage_seen: bool,
    firmware_requested: bool,
    name_requested: bool,
    /// Copy BMS pack current into the wheel current. Nothing enables this;
    /// the pack current is informational only.
    bms_current_passthrough: bool,
}

pub struct GotwayDecoder {
    unpacker: FixedFrameSync,
    frames: GotwayFrames,
}

impl GotwayDecoder {
    pub fn new() -> Self {
        Self {
            unpacker: FixedFrameSync::new(&HEADER, FRAME_LEN, &FOOTER),
            frames: GotwayFrames::default(),
        }
    }
}

impl Default for GotwayDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl GotwayFrames {
    /// Apply an ASCII identification notification. Returns `true` when it
    /// changed anything.
    fn apply_text(&mut self, data: &[u8], state: &mut WheelState) -> bool {
        if data.is_empty() || data.windows(2).any(|w| w == HEADER) {
            return false;
        }
        if !data
            .iter()
            .all(|b| b.is_ascii_graphic() || b.is_ascii_whitespace())
        {
            return false;
        }
        let text = String::from_utf8_lossy(data);
        let text = text.trim();

        if let Some(name) = text.strip_prefix("NAME") {
            let name = name.trim();
            if !name.is_empty() {
                info!("Begode model: {}", name);
                self.model = name.to_string();
                state.model = self.model.clone();
                state.name = self.model.clone();
                return true;
            }
        } else if text.starts_with("GW") || text.starts_with("CF") {
            let version = text[2..].trim();
            if !version.is_empty() {
                info!("Begode firmware: {}", text);
                self.firmware = text.to_string();
                state.version = version.to_string();
                return true;
            }
        } else if text.starts_with("MPU") {
            self.mpu6500 = text.contains("6500");
            debug!("Begode IMU: {}", text);
            return true;
        }
        false
    }

    fn process_frame(
        &mut self,
        frame: &[u8],
        mut state: WheelState,
        config: &DecoderConfig,
    ) -> Option<DecodeResult> {
        if frame.len() != FRAME_LEN || frame[..2] != HEADER {
            return None;
        }
        state.wheel_type = WheelType::Gotway;

        match frame[18] {
            TYPE_LIVE => Some(self.live_data(frame, state, config)),
            TYPE_EXTENDED => Some(self.extended(frame, state, config)),
            TYPE_BMS1 => Some(self.bms(frame, state, 1)),
            TYPE_BMS2 => Some(self.bms(frame, state, 2)),
            TYPE_SETTINGS => Some(self.settings(frame, state, config)),
            TYPE_CURRENT => Some(self.battery_current(frame, state, config)),
            TYPE_FIRMWARE_SETTINGS => Some(self.firmware_settings(frame, state)),
            other => {
                debug!("Unknown Begode frame type {:#04X}", other);
                None
            }
        }
    }

    fn miles_mode(&self, config: &DecoderConfig) -> bool {
        self.in_miles || config.assume_miles_mode
    }

    fn live_data(&mut self, frame: &[u8], mut state: WheelState, config: &DecoderConfig) -> DecodeResult {
        let raw_voltage = u16_be(frame, 2) as i32;
        let raw_speed = i16_be(frame, 4) as f64;
        let raw_trip = u32_be(frame, 6) as f64;
        let raw_phase = i16_be(frame, 10) as i32;
        let raw_temperature = i16_be(frame, 12) as f64;
        let raw_pwm = i16_be(frame, 14) as i32;

        let mut speed = raw_speed * 3.6;
        let mut trip = raw_trip;
        if self.miles_mode(config) {
            speed = miles_to_km(speed);
            trip = miles_to_km(trip);
        }

        let mpu6500 = self.mpu6500 || config.mpu6500_imu;
        let temperature = if mpu6500 {
            (raw_temperature / 333.87 + 21.00) * 100.0
        } else {
            (raw_temperature / 340.0 + 36.53) * 100.0
        };

        state.speed = config.sign_mode.apply(round_half_up(speed) as i32);
        state.wheel_distance = round_half_up(trip);
        state.phase_current = config.sign_mode.apply(raw_phase);
        state.temperature = round_half_up(temperature) as i32;
        state.battery_level = battery_percent(raw_voltage, PackSeries::S16, config.better_percents);

        if !(config.auto_voltage && self.true_voltage) {
            state.voltage = config.voltage_scale.apply(raw_voltage);
        }
        if config.gotway_hw_pwm {
            state.output = raw_pwm.abs();
        }
        if !self.true_current {
            state.current =
                round_half_up(raw_pwm.abs() as f64 / 10000.0 * raw_phase.abs() as f64) as i32;
        }
        state.update_power();

        if raw_voltage != 0 {
            self.live_voltage_seen = true;
        }

        let mut commands = Vec::new();
        if self.firmware.is_empty() && !self.firmware_requested {
            self.firmware_requested = true;
            commands.push(WireCommand::send(b"V".to_vec()));
        }
        if self.model.is_empty() && !self.name_requested {
            self.name_requested = true;
            commands.push(WireCommand::delayed(b"N".to_vec(), NAME_REQUEST_DELAY_MS));
        }

        // with a battery-current frame on the wire, that frame closes the cycle
        DecodeResult::new(state, !self.true_current).with_commands(commands)
    }

    fn extended(&mut self, frame: &[u8], mut state: WheelState, config: &DecoderConfig) -> DecodeResult {
        let true_voltage = u16_be(frame, 2) as i32;
        if true_voltage == 0 {
            return DecodeResult::new(state, false);
        }
        if config.auto_voltage {
            state.voltage = true_voltage;
            state.update_power();
        }
        self.true_voltage = true;
        DecodeResult::new(state, false)
    }

    fn battery_current(
        &mut self,
        frame: &[u8],
        mut state: WheelState,
        config: &DecoderConfig,
    ) -> DecodeResult {
        let battery_current = i16_be(frame, 2) as i32;
        let motor_temperature = i16_be(frame, 6) as i32;
        let raw_pwm = i16_be(frame, 8) as i32;

        state.current = battery_current;
        state.temperature2 = motor_temperature * 100;
        if config.gotway_hw_pwm {
            state.output = raw_pwm.abs();
        }
        state.update_power();

        // the first frame only switches the source over
        let has_new_data = self.true_current;
        self.true_current = true;
        DecodeResult::new(state, has_new_data)
    }

    fn settings(&mut self, frame: &[u8], mut state: WheelState, config: &DecoderConfig) -> DecodeResult {
        let settings = u16_be(frame, 6);
        self.in_miles = settings & 0x01 != 0;

        let mut total = u32_be(frame, 2) as f64;
        if self.miles_mode(config) {
            total = miles_to_km(total);
        }
        let tilt_back = u16_be(frame, 10) as i32;

        state.total_distance = round_half_up(total);
        state.pedals_mode = ((settings >> 13) & 0x03) as i32;
        state.alarm_mode = ((settings >> 10) & 0x03) as i32;
        state.roll_angle = ((settings >> 7) & 0x03) as i32;
        state.in_miles = self.in_miles;
        state.speed_limit = if tilt_back >= 100 { 0 } else { tilt_back };
        state.led_mode = frame[13] as i32;
        state.light_mode = (frame[15] & 0x03) as i32;
        DecodeResult::new(state, false)
    }

    fn firmware_settings(&mut self, frame: &[u8], mut state: WheelState) -> DecodeResult {
        state.cutout_angle = frame[2] as i32;
        state.beeper_volume = frame[3] as i32;
        DecodeResult::new(state, false)
    }

    /// Pack page 0: voltage, current, temperatures, cycles, health.
    /// Pages 1..=6: seven cell voltages each (mV, 0 = absent).
    fn bms(&mut self, frame: &[u8], mut state: WheelState, pack: usize) -> DecodeResult {
        let page = frame[17] as usize;
        if page > MAX_BMS_CELLS / CELLS_PER_PAGE {
            debug!("Skipping Gotway BMS{} page {}", pack, page);
            return DecodeResult::new(state, false);
        }
        let passthrough = self.bms_current_passthrough;
        let bms = state.bms_mut(pack);

        if page == 0 {
            bms.voltage = u16_be(frame, 2) as f64 / 10.0;
            bms.current = i16_be(frame, 4) as f64 / 10.0;
            bms.temperatures = vec![
                i16_be(frame, 6) as f64 / 10.0,
                i16_be(frame, 8) as f64 / 10.0,
            ];
            bms.full_cycles = u16_be(frame, 10) as i32;
            bms.health = frame[12] as i32;
            bms.remaining_capacity = u16_be(frame, 14) as i32 * 10;
        } else {
            for i in 0..CELLS_PER_PAGE {
                let millivolts = u16_be(frame, 2 + i * 2);
                if millivolts != 0 {
                    bms.set_cell((page - 1) * CELLS_PER_PAGE + i, millivolts as f64 / 1000.0);
                }
            }
            bms.update_cell_stats();
        }

        if passthrough {
            let total: f64 = [&state.bms1, &state.bms2]
                .iter()
                .filter_map(|b| b.as_ref())
                .map(|b| b.current)
                .sum();
            state.current = round_half_up(total * 100.0) as i32;
        }
        DecodeResult::new(state, false)
    }
}

fn ascii(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

fn digit(value: u8) -> Vec<u8> {
    vec![b'0' + value]
}

/// `W`, then each character after a pause.
fn write_setting(chars: &[Vec<u8>]) -> Vec<WireCommand> {
    let mut commands = vec![WireCommand::send(ascii("W"))];
    commands.extend(
        chars
            .iter()
            .map(|c| WireCommand::delayed(c.clone(), CHAR_DELAY_MS)),
    );
    commands
}

impl WheelDecoder for GotwayDecoder {
    fn wheel_type(&self) -> WheelType {
        WheelType::Gotway
    }

    fn decode(
        &mut self,
        data: &[u8],
        state: &WheelState,
        config: &DecoderConfig,
    ) -> Option<DecodeResult> {
        let mut base = state.clone();
        let text_changed = self.frames.apply_text(data, &mut base);

        let frames = &mut self.frames;
        let decoded = decode_frames(data, &mut self.unpacker, &base, |frame, current| {
            frames.process_frame(frame, current, config)
        });

        match decoded {
            Some(result) => Some(result),
            None if text_changed => Some(DecodeResult::new(base, false)),
            None => None,
        }
    }

    fn encode(&self, command: &WheelCommand) -> Vec<WireCommand> {
        let single = |text: &str| vec![WireCommand::send(ascii(text))];
        match command {
            WheelCommand::Beep => single("b"),
            WheelCommand::SetLight(on) => single(if *on { "Q" } else { "E" }),
            WheelCommand::SetLightMode(mode) => match mode {
                0 => single("E"),
                1 => single("Q"),
                2 => single("T"),
                _ => Vec::new(),
            },
            WheelCommand::Calibrate => vec![
                WireCommand::send(ascii("c")),
                WireCommand::delayed(ascii("y"), CALIBRATION_DELAY_MS),
            ],
            WheelCommand::SetPedalsMode(mode) => match mode {
                0 => single("h"),
                1 => single("f"),
                2 => single("s"),
                _ => Vec::new(),
            },
            WheelCommand::SetMilesMode(miles) => single(if *miles { "m" } else { "g" }),
            WheelCommand::SetRollAngle(angle) => match angle {
                0 => single(">"),
                1 => single("="),
                2 => single("<"),
                _ => Vec::new(),
            },
            WheelCommand::SetAlarmMode(mode) => match mode {
                0 => single("u"),
                1 => single("i"),
                2 => single("o"),
                3 => single("I"),
                _ => Vec::new(),
            },
            WheelCommand::SetLedMode(mode) if *mode <= 9 => {
                write_setting(&[ascii("M"), digit(*mode)])
            }
            WheelCommand::SetBeeperVolume(volume) if (1..=9).contains(volume) => {
                write_setting(&[ascii("B"), digit(*volume)])
            }
            WheelCommand::SetTiltBackSpeed(speed) => match speed {
                0 => single("\""),
                1..=99 => write_setting(&[ascii("Y"), digit(speed / 10), digit(speed % 10)]),
                _ => Vec::new(),
            },
            WheelCommand::RequestName => single("N"),
            WheelCommand::RequestFirmware => single("V"),
            WheelCommand::SetLedMode(_)
            | WheelCommand::SetBeeperVolume(_)
            | WheelCommand::PowerOff
            | WheelCommand::SetLock(_)
            | WheelCommand::ResetTrip
            | WheelCommand::SetCutoutAngle(_)
            | WheelCommand::SetSpeedAlarms { .. }
            | WheelCommand::RequestSerial
            | WheelCommand::RequestAlarms
            | WheelCommand::Raw(_) => Vec::new(),
        }
    }

    fn is_ready(&self) -> bool {
        !self.frames.firmware.is_empty() && self.frames.live_voltage_seen
    }

    fn reset(&mut self) {
        self.frames = GotwayFrames::default();
        self.unpacker = FixedFrameSync::new(&HEADER, FRAME_LEN, &FOOTER);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::{SignMode, VoltageScale};

    fn frame(kind: u8, fill: impl FnOnce(&mut [u8; FRAME_LEN])) -> Vec<u8> {
        let mut f = [0u8; FRAME_LEN];
        f[..2].copy_from_slice(&HEADER);
        f[18] = kind;
        f[19..].copy_from_slice(&FOOTER);
        fill(&mut f);
        f.to_vec()
    }

    fn live(voltage: u16, speed: i16, trip: u32, phase: i16, pwm: i16) -> Vec<u8> {
        frame(TYPE_LIVE, |f| {
            f[2..4].copy_from_slice(&voltage.to_be_bytes());
            f[4..6].copy_from_slice(&speed.to_be_bytes());
            f[6..10].copy_from_slice(&trip.to_be_bytes());
            f[10..12].copy_from_slice(&phase.to_be_bytes());
            f[14..16].copy_from_slice(&pwm.to_be_bytes());
        })
    }

    fn settings_frame(total: u32, settings: u16) -> Vec<u8> {
        frame(TYPE_SETTINGS, |f| {
            f[2..6].copy_from_slice(&total.to_be_bytes());
            f[6..8].copy_from_slice(&settings.to_be_bytes());
        })
    }

    fn extended(true_voltage: u16) -> Vec<u8> {
        frame(TYPE_EXTENDED, |f| {
            f[2..4].copy_from_slice(&true_voltage.to_be_bytes())
        })
    }

    fn current_frame(current: i16) -> Vec<u8> {
        frame(TYPE_CURRENT, |f| f[2..4].copy_from_slice(&current.to_be_bytes()))
    }

    fn decode(
        decoder: &mut GotwayDecoder,
        data: &[u8],
        state: &WheelState,
        config: &DecoderConfig,
    ) -> DecodeResult {
        decoder.decode(data, state, config).expect("frame should decode")
    }

    #[test]
    fn test_truncated_frames_are_none() {
        let full = live(6000, 1000, 0, 0, 0);
        for n in 0..FRAME_LEN {
            let mut decoder = GotwayDecoder::new();
            assert!(decoder
                .decode(&full[..n], &WheelState::default(), &DecoderConfig::default())
                .is_none());
        }
    }

    #[test]
    fn test_live_data() {
        let mut decoder = GotwayDecoder::new();
        let config = DecoderConfig::default();
        let result = decode(
            &mut decoder,
            &live(6000, 1000, 1234, -1500, 5000),
            &WheelState::default(),
            &config,
        );
        let state = result.state;
        assert_eq!(state.wheel_type, WheelType::Gotway);
        assert_eq!(state.voltage, 6000);
        assert_eq!(state.speed, 3600);
        assert_eq!(state.wheel_distance, 1234);
        assert_eq!(state.phase_current, 1500);
        assert_eq!(state.current, 750);
        assert_eq!(state.output, 5000);
        // raw temperature 0 on the MPU6050 formula
        assert_eq!(state.temperature, 3653);
        assert!(result.has_new_data);
        // model must not be guessed from live data
        assert!(state.model.is_empty());
    }

    #[test]
    fn test_voltage_scale_selector() {
        let mut decoder = GotwayDecoder::new();
        let config = DecoderConfig {
            voltage_scale: VoltageScale::from_selector(3),
            ..Default::default()
        };
        let result = decode(&mut decoder, &live(6000, 0, 0, 0, 0), &WheelState::default(), &config);
        assert_eq!(result.state.voltage, 10429);
    }

    #[test]
    fn test_sign_modes() {
        let frame = live(6000, -500, 0, -200, 0);
        let keep = DecoderConfig {
            sign_mode: SignMode::Keep,
            ..Default::default()
        };
        let state = decode(&mut GotwayDecoder::new(), &frame, &WheelState::default(), &keep).state;
        assert_eq!(state.speed, -1800);
        assert_eq!(state.phase_current, -200);

        let state = decode(
            &mut GotwayDecoder::new(),
            &frame,
            &WheelState::default(),
            &DecoderConfig::default(),
        )
        .state;
        assert_eq!(state.speed, 1800);
        assert_eq!(state.phase_current, 200);
    }

    #[test]
    fn test_miles_mode_normalization_is_idempotent() {
        let mut decoder = GotwayDecoder::new();
        let config = DecoderConfig::default();
        let start = decode(&mut decoder, &settings_frame(1000, 0x0001), &WheelState::default(), &config).state;
        assert!(start.in_miles);
        assert_eq!(start.total_distance, 1609);

        let frame = live(6000, 1000, 1000, 0, 0);
        let first = decode(&mut decoder, &frame, &start, &config).state;
        let second = decode(&mut decoder, &frame, &start, &config).state;
        assert_eq!(first.speed, 5794);
        assert_eq!(first.wheel_distance, 1609);
        assert_eq!(first.speed, second.speed);
        assert_eq!(first.wheel_distance, second.wheel_distance);

        let stopped = decode(&mut decoder, &live(6000, 0, 0, 0, 0), &start, &config).state;
        assert_eq!(stopped.speed, 0);
        assert_eq!(stopped.wheel_distance, 0);
    }

    #[test]
    fn test_assume_miles_mode() {
        let config = DecoderConfig {
            assume_miles_mode: true,
            ..Default::default()
        };
        let state = decode(
            &mut GotwayDecoder::new(),
            &live(6000, 1000, 0, 0, 0),
            &WheelState::default(),
            &config,
        )
        .state;
        assert_eq!(state.speed, 5794);
    }

    #[test]
    fn test_true_voltage_precedence() {
        let mut decoder = GotwayDecoder::new();
        let config = DecoderConfig::default();
        let state = decode(&mut decoder, &live(6000, 0, 0, 0, 0), &WheelState::default(), &config).state;
        let state = decode(&mut decoder, &extended(6550), &state, &config).state;
        assert_eq!(state.voltage, 6550);
        let state = decode(&mut decoder, &live(6100, 0, 0, 0, 0), &state, &config).state;
        assert_eq!(state.voltage, 6550);
    }

    #[test]
    fn test_live_voltage_wins_without_auto_voltage() {
        let mut decoder = GotwayDecoder::new();
        let config = DecoderConfig {
            auto_voltage: false,
            ..Default::default()
        };
        let state = decode(&mut decoder, &live(6000, 0, 0, 0, 0), &WheelState::default(), &config).state;
        let state = decode(&mut decoder, &extended(6550), &state, &config).state;
        assert_eq!(state.voltage, 6000);
        let state = decode(&mut decoder, &live(6100, 0, 0, 0, 0), &state, &config).state;
        assert_eq!(state.voltage, 6100);
    }

    #[test]
    fn test_true_current_new_data_timing() {
        let mut decoder = GotwayDecoder::new();
        let config = DecoderConfig::default();
        let state = WheelState::default();

        let first = decode(&mut decoder, &current_frame(1200), &state, &config);
        assert!(!first.has_new_data);
        assert_eq!(first.state.current, 1200);

        let second = decode(&mut decoder, &current_frame(1300), &first.state, &config);
        assert!(second.has_new_data);

        // live frames no longer close the cycle, nor overwrite current
        let live_result = decode(&mut decoder, &live(6000, 100, 0, 1000, 5000), &second.state, &config);
        assert!(!live_result.has_new_data);
        assert_eq!(live_result.state.current, 1300);
    }

    #[test]
    fn test_new_data_is_sticky_within_buffer() {
        let config = DecoderConfig::default();
        let live_frame = live(6000, 100, 0, 0, 0);
        let settings = settings_frame(5000, 0);

        for data in [
            [live_frame.clone(), settings.clone()].concat(),
            [settings.clone(), live_frame.clone()].concat(),
        ] {
            let mut decoder = GotwayDecoder::new();
            let result = decode(&mut decoder, &data, &WheelState::default(), &config);
            assert!(result.has_new_data);
            assert_eq!(result.state.total_distance, 5000);
            assert_eq!(result.state.voltage, 6000);
        }
    }

    #[test]
    fn test_split_notifications_with_garbage() {
        let mut decoder = GotwayDecoder::new();
        let config = DecoderConfig::default();
        let data = [vec![0x00, 0x13, 0x55], live(6000, 100, 0, 0, 0)].concat();
        let (head, tail) = data.split_at(10);
        assert!(decoder.decode(head, &WheelState::default(), &config).is_none());
        let result = decode(&mut decoder, tail, &WheelState::default(), &config);
        assert_eq!(result.state.voltage, 6000);
    }

    #[test]
    fn test_identification_and_readiness() {
        let mut decoder = GotwayDecoder::new();
        let config = DecoderConfig::default();

        let result = decode(&mut decoder, &live(6000, 0, 0, 0, 0), &WheelState::default(), &config);
        assert_eq!(
            result.commands,
            vec![
                WireCommand::send(b"V".to_vec()),
                WireCommand::delayed(b"N".to_vec(), NAME_REQUEST_DELAY_MS)
            ]
        );
        assert!(!decoder.is_ready());

        let state = decode(&mut decoder, b"GW1.23\r\n", &result.state, &config).state;
        assert_eq!(state.version, "1.23");
        assert!(decoder.is_ready());

        let state = decode(&mut decoder, b"NAME Master", &state, &config).state;
        assert_eq!(state.model, "Master");

        // requests are not repeated
        let again = decode(&mut decoder, &live(6000, 0, 0, 0, 0), &state, &config);
        assert!(again.commands.is_empty());

        decoder.reset();
        assert!(!decoder.is_ready());
    }

    #[test]
    fn test_mpu6500_temperature() {
        let mut decoder = GotwayDecoder::new();
        let config = DecoderConfig::default();
        decode(&mut decoder, b"MPU6500", &WheelState::default(), &config);
        let state = decode(&mut decoder, &live(6000, 0, 0, 0, 0), &WheelState::default(), &config).state;
        assert_eq!(state.temperature, 2100);
    }

    #[test]
    fn test_settings_frame() {
        let settings: u16 = (2 << 13) | (1 << 10) | (2 << 7);
        let data = frame(TYPE_SETTINGS, |f| {
            f[2..6].copy_from_slice(&123_456u32.to_be_bytes());
            f[6..8].copy_from_slice(&settings.to_be_bytes());
            f[10..12].copy_from_slice(&40u16.to_be_bytes());
            f[13] = 3;
            f[15] = 0x01;
        });
        let state = decode(&mut GotwayDecoder::new(), &data, &WheelState::default(), &DecoderConfig::default()).state;
        assert_eq!(state.total_distance, 123_456);
        assert_eq!(state.pedals_mode, 2);
        assert_eq!(state.alarm_mode, 1);
        assert_eq!(state.roll_angle, 2);
        assert_eq!(state.speed_limit, 40);
        assert_eq!(state.led_mode, 3);
        assert_eq!(state.light_mode, 1);
        assert!(!state.in_miles);
    }

    #[test]
    fn test_bms_pages_and_current_passthrough_is_inert() {
        let mut decoder = GotwayDecoder::new();
        let config = DecoderConfig::default();
        let summary = frame(TYPE_BMS1, |f| {
            f[2..4].copy_from_slice(&1008u16.to_be_bytes());
            f[4..6].copy_from_slice(&(-55i16).to_be_bytes());
            f[12] = 97;
            f[17] = 0;
        });
        let cells = frame(TYPE_BMS1, |f| {
            f[2..4].copy_from_slice(&4150u16.to_be_bytes());
            f[4..6].copy_from_slice(&4170u16.to_be_bytes());
            f[17] = 1;
        });
        let start = WheelState {
            current: 321,
            ..Default::default()
        };
        let state = decode(&mut decoder, &[summary, cells].concat(), &start, &config).state;
        let bms = state.bms1.as_ref().unwrap();
        assert_eq!(bms.voltage, 100.8);
        assert_eq!(bms.current, -5.5);
        assert_eq!(bms.health, 97);
        assert_eq!(bms.cells, vec![4.15, 4.17]);
        assert!((bms.cell_diff - 0.02).abs() < 1e-9);
        // pack current never reaches the wheel current
        assert_eq!(state.current, 321);
    }

    #[test]
    fn test_bms_page_out_of_range_is_skipped() {
        let mut decoder = GotwayDecoder::new();
        let config = DecoderConfig::default();
        let bogus = frame(TYPE_BMS2, |f| {
            f[2..4].copy_from_slice(&4150u16.to_be_bytes());
            f[17] = 0xFF;
        });
        let state = decode(&mut decoder, &bogus, &WheelState::default(), &config).state;
        assert!(state.bms2.is_none());

        let last = frame(TYPE_BMS2, |f| {
            f[2..4].copy_from_slice(&4150u16.to_be_bytes());
            f[17] = 6;
        });
        let state = decode(&mut decoder, &last, &state, &config).state;
        let cells = &state.bms2.as_ref().unwrap().cells;
        assert_eq!(cells.len(), 36);
        assert_eq!(cells[35], 4.15);
    }

    #[test]
    fn test_commands() {
        let decoder = GotwayDecoder::new();
        assert_eq!(
            decoder.build_command(&WheelCommand::Calibrate),
            vec![
                WireCommand::send(b"c".to_vec()),
                WireCommand::delayed(b"y".to_vec(), CALIBRATION_DELAY_MS)
            ]
        );
        assert_eq!(
            decoder.build_command(&WheelCommand::Beep),
            vec![WireCommand::send(b"b".to_vec())]
        );
        assert_eq!(
            decoder.build_command(&WheelCommand::SetTiltBackSpeed(35)),
            vec![
                WireCommand::send(b"W".to_vec()),
                WireCommand::delayed(b"Y".to_vec(), CHAR_DELAY_MS),
                WireCommand::delayed(b"3".to_vec(), CHAR_DELAY_MS),
                WireCommand::delayed(b"5".to_vec(), CHAR_DELAY_MS),
            ]
        );
        assert!(decoder.build_command(&WheelCommand::PowerOff).is_empty());
        assert!(decoder.build_command(&WheelCommand::SetPedalsMode(7)).is_empty());
        assert!(decoder.build_command(&WheelCommand::SetBeeperVolume(0)).is_empty());
    }
}
