//! Veteran / Leaperkim protocol
//!
//! # Frame layout (big-endian fields)
//!
//! ```text
//! [0-2]   : DC 5A 5C header
//! [3]     : payload length (frame length is length + 4)
//! [4-5]   : voltage, 1/100 V
//! [6-7]   : speed, 1/10 km/h (signed)
//! [8-11]  : trip distance, metres (low word first)
//! [12-15] : total distance, metres (low word first)
//! [16-17] : phase current, 1/10 A (signed)
//! [18-19] : temperature, 1/100 °C
//! [20-21] : auto-off timer, s
//! [22-23] : charge mode
//! [24-25] : speed alert, 1/10 km/h
//! [26-27] : tilt-back speed, 1/10 km/h
//! [28-29] : firmware version (major * 1000 + minor * 100 + patch)
//! [30-31] : pedals mode
//! [32-33] : pitch angle, 1/100 °
//! [34-35] : PWM, 1/100 %
//! [..]    : CRC32 of everything before it, when length > 38
//! ```
//!
//! The control channel is plain ASCII (`b`, `SetLightON`, `CLEARMETER`, ...).

use super::battery::{battery_percent, PackSeries};
use super::bytes::{i16_be, u16_be, u32_be, u32_be_low_word_first};
use super::framing::{decode_frames, DecodeResult, LengthPrefixedSync};
use super::WheelDecoder;
use crate::domain::commands::{WheelCommand, WireCommand};
use crate::domain::config::DecoderConfig;
use crate::domain::models::{WheelState, WheelType};
use crc::{Crc, CRC_32_ISO_HDLC};
use tracing::{debug, info};

pub const HEADER: [u8; 3] = [0xDC, 0x5A, 0x5C];
/// Header plus length byte
const OVERHEAD: usize = 4;
const MAX_FRAME_LEN: usize = 128;
/// Shortest payload carrying every live field
const MIN_PAYLOAD: usize = 32;
/// Payloads longer than this end with a CRC32
const CRC_THRESHOLD: usize = 38;

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

#[derive(Debug, Default)]
struct VeteranFrames {
    version: u16,
    live_voltage_seen: bool,
}

pub struct VeteranDecoder {
    unpacker: LengthPrefixedSync,
    frames: VeteranFrames,
}

impl VeteranDecoder {
    pub fn new() -> Self {
        Self {
            unpacker: LengthPrefixedSync::new(&HEADER, OVERHEAD, MAX_FRAME_LEN),
            frames: VeteranFrames::default(),
        }
    }
}

impl Default for VeteranDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Model name and pack configuration for a firmware version.
fn model_for(version: u16) -> (&'static str, PackSeries) {
    match version / 1000 {
        0 | 1 => ("Sherman", PackSeries::S24),
        2 => ("Abrams", PackSeries::S24),
        3 => ("Sherman S", PackSeries::S24),
        4 => ("Patton", PackSeries::S30),
        5 => ("Lynx", PackSeries::S36),
        6 => ("Sherman L", PackSeries::S36),
        7 => ("Patton S", PackSeries::S30),
        8 => ("Oryx", PackSeries::S42),
        _ => ("Veteran", PackSeries::S24),
    }
}

fn format_version(version: u16) -> String {
    format!(
        "{:03}.{}.{:02}",
        version / 1000,
        (version % 1000) / 100,
        version % 100
    )
}

fn crc_valid(frame: &[u8]) -> bool {
    let split = frame.len() - 4;
    CRC32.checksum(&frame[..split]) == u32_be(frame, split)
}

impl VeteranFrames {
    fn process_frame(
        &mut self,
        frame: &[u8],
        mut state: WheelState,
        config: &DecoderConfig,
    ) -> Option<DecodeResult> {
        let payload_len = frame.get(3).copied()? as usize;
        if frame.len() != payload_len + OVERHEAD || payload_len < MIN_PAYLOAD {
            debug!("Short Veteran frame ({} bytes)", frame.len());
            return None;
        }
        if payload_len > CRC_THRESHOLD && !crc_valid(frame) {
            debug!("Veteran CRC mismatch");
            return None;
        }

        let voltage = u16_be(frame, 4) as i32;
        let version = u16_be(frame, 28);
        if version != self.version {
            let (model, _) = model_for(version);
            info!("Veteran model: {} firmware {}", model, format_version(version));
            self.version = version;
        }
        let (model, series) = model_for(version);

        state.wheel_type = WheelType::Veteran;
        state.voltage = voltage;
        state.speed = config.sign_mode.apply(i16_be(frame, 6) as i32 * 10);
        state.wheel_distance = u32_be_low_word_first(frame, 8) as i64;
        state.total_distance = u32_be_low_word_first(frame, 12) as i64;
        state.phase_current = config.sign_mode.apply(i16_be(frame, 16) as i32 * 10);
        state.current = state.phase_current;
        state.temperature = u16_be(frame, 18) as i32;
        state.charging = u16_be(frame, 22) != 0;
        state.alarm_speeds[0] = u16_be(frame, 24) as i32 / 10;
        state.speed_limit = u16_be(frame, 26) as i32 / 10;
        state.pedals_mode = u16_be(frame, 30) as i32;
        state.angle = i16_be(frame, 32) as f64 / 100.0;
        state.output = u16_be(frame, 34) as i32;
        state.model = model.to_string();
        state.version = format_version(version);
        state.battery_level = battery_percent(voltage, series, config.better_percents);
        state.update_power();

        if voltage != 0 {
            self.live_voltage_seen = true;
        }
        Some(DecodeResult::new(state, true))
    }
}

impl WheelDecoder for VeteranDecoder {
    fn wheel_type(&self) -> WheelType {
        WheelType::Veteran
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
        let text = match command {
            WheelCommand::Beep => "b",
            WheelCommand::SetLight(true) => "SetLightON",
            WheelCommand::SetLight(false) => "SetLightOFF",
            WheelCommand::ResetTrip => "CLEARMETER",
            WheelCommand::SetPedalsMode(0) => "SETh",
            WheelCommand::SetPedalsMode(1) => "SETm",
            WheelCommand::SetPedalsMode(2) => "SETs",
            _ => return Vec::new(),
        };
        vec![WireCommand::send(text.as_bytes().to_vec())]
    }

    fn is_ready(&self) -> bool {
        self.frames.live_voltage_seen && self.frames.version != 0
    }

    fn reset(&mut self) {
        self.frames = VeteranFrames::default();
        self.unpacker = LengthPrefixedSync::new(&HEADER, OVERHEAD, MAX_FRAME_LEN);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Live {
        voltage: u16,
        speed: i16,
        trip: u32,
        total: u32,
        phase: i16,
        version: u16,
    }

    fn put_low_word_first(buf: &mut [u8], offset: usize, value: u32) {
        buf[offset..offset + 2].copy_from_slice(&(value as u16).to_be_bytes());
        buf[offset + 2..offset + 4].copy_from_slice(&((value >> 16) as u16).to_be_bytes());
    }

    fn frame(live: &Live, payload_len: usize) -> Vec<u8> {
        let mut f = vec![0u8; payload_len + OVERHEAD];
        f[..3].copy_from_slice(&HEADER);
        f[3] = payload_len as u8;
        f[4..6].copy_from_slice(&live.voltage.to_be_bytes());
        f[6..8].copy_from_slice(&live.speed.to_be_bytes());
        put_low_word_first(&mut f, 8, live.trip);
        put_low_word_first(&mut f, 12, live.total);
        f[16..18].copy_from_slice(&live.phase.to_be_bytes());
        f[18..20].copy_from_slice(&3850u16.to_be_bytes());
        f[26..28].copy_from_slice(&500u16.to_be_bytes());
        f[28..30].copy_from_slice(&live.version.to_be_bytes());
        f[30..32].copy_from_slice(&1u16.to_be_bytes());
        f[34..36].copy_from_slice(&4200u16.to_be_bytes());
        if payload_len > CRC_THRESHOLD {
            let split = f.len() - 4;
            let crc = CRC32.checksum(&f[..split]);
            f[split..].copy_from_slice(&crc.to_be_bytes());
        }
        f
    }

    fn sample() -> Live {
        Live {
            voltage: 9850,
            speed: -253,
            trip: 12_345,
            total: 1_234_567,
            phase: 155,
            version: 4_012,
        }
    }

    #[test]
    fn test_truncated_frames_are_none() {
        let full = frame(&sample(), 32);
        for n in 0..full.len() {
            let mut decoder = VeteranDecoder::new();
            assert!(decoder
                .decode(&full[..n], &WheelState::default(), &DecoderConfig::default())
                .is_none());
        }
    }

    #[test]
    fn test_live_frame() {
        let mut decoder = VeteranDecoder::new();
        let result = decoder
            .decode(&frame(&sample(), 32), &WheelState::default(), &DecoderConfig::default())
            .unwrap();
        let state = result.state;
        assert!(result.has_new_data);
        assert_eq!(state.wheel_type, WheelType::Veteran);
        assert_eq!(state.voltage, 9850);
        assert_eq!(state.speed, 2530);
        assert_eq!(state.wheel_distance, 12_345);
        assert_eq!(state.total_distance, 1_234_567);
        assert_eq!(state.phase_current, 1550);
        assert_eq!(state.temperature, 3850);
        assert_eq!(state.speed_limit, 50);
        assert_eq!(state.pedals_mode, 1);
        assert_eq!(state.output, 4200);
        assert_eq!(state.model, "Patton");
        assert_eq!(state.version, "004.0.12");
        assert!(decoder.is_ready());
    }

    #[test]
    fn test_crc_frames() {
        let mut decoder = VeteranDecoder::new();
        let config = DecoderConfig::default();
        let good = frame(&sample(), 46);
        assert!(decoder.decode(&good, &WheelState::default(), &config).is_some());

        let mut bad = good.clone();
        bad[5] ^= 0x01;
        assert!(decoder.decode(&bad, &WheelState::default(), &config).is_none());
    }

    #[test]
    fn test_split_notification() {
        let mut decoder = VeteranDecoder::new();
        let config = DecoderConfig::default();
        let data = [vec![0xDC, 0x00], frame(&sample(), 32)].concat();
        let (head, tail) = data.split_at(20);
        assert!(decoder.decode(head, &WheelState::default(), &config).is_none());
        let state = decoder.decode(tail, &WheelState::default(), &config).unwrap().state;
        assert_eq!(state.voltage, 9850);
    }

    #[test]
    fn test_short_payload_rejected() {
        let mut decoder = VeteranDecoder::new();
        let f = [0xDC, 0x5A, 0x5C, 0x04, 0x26, 0x7A, 0x00, 0x00];
        assert!(decoder
            .decode(&f, &WheelState::default(), &DecoderConfig::default())
            .is_none());
    }

    #[test]
    fn test_commands() {
        let decoder = VeteranDecoder::new();
        assert_eq!(
            decoder.build_command(&WheelCommand::Beep),
            vec![WireCommand::send(b"b".to_vec())]
        );
        assert_eq!(
            decoder.build_command(&WheelCommand::SetLight(true)),
            vec![WireCommand::send(b"SetLightON".to_vec())]
        );
        assert_eq!(
            decoder.build_command(&WheelCommand::ResetTrip),
            vec![WireCommand::send(b"CLEARMETER".to_vec())]
        );
        assert!(decoder.build_command(&WheelCommand::Calibrate).is_empty());
    }
}
