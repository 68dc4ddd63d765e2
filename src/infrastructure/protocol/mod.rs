//! Wheel protocols
//!
//! ```text
//!  notification bytes
//!         │
//!         ▼
//!  ┌──────────────┐   frame    ┌──────────────┐
//!  │  FrameSync   │──────────▶│ process_frame │──▶ WheelState + WireCommands
//!  │ (per brand)  │           │  (per brand)  │
//!  └──────────────┘           └──────────────┘
//!         ▲                          ▲
//!         └──── decode_frames ───────┘
//! ```
//!
//! ## Modules
//!
//! - [`framing`] - frame synchronizers and the shared decode loop
//! - [`gotway`] - Gotway / Begode
//! - [`kingsong`] - KingSong
//! - [`veteran`] - Veteran / Leaperkim
//! - [`inmotion`] - InMotion (V5, V8, V10 generation)
//! - [`inmotion_v2`] - InMotion (V11 and later)
//! - [`ninebot`] - Ninebot One (legacy protocol)
//! - [`ninebot_z`] - Ninebot Z series

pub mod battery;
pub mod bytes;
pub mod framing;
pub mod gotway;
pub mod inmotion;
pub mod inmotion_v2;
pub mod kingsong;
pub mod ninebot;
pub mod ninebot_z;
pub mod veteran;

use crate::domain::commands::{WheelCommand, WireCommand};
use crate::domain::config::DecoderConfig;
use crate::domain::models::{WheelState, WheelType};
use std::time::Duration;

pub use framing::{decode_frames, DecodeResult, FrameSync};

/// Miles per kilometre.
pub const KM_TO_MILES: f64 = 0.62137119223733;

/// Convert an imperial reading (mph or miles, any fixed-point scale) to the
/// metric equivalent on the same scale.
pub fn miles_to_km(value: f64) -> f64 {
    value / KM_TO_MILES
}

/// One brand's protocol: frame decoding plus command encoding.
///
/// A decoder keeps private scratch state between frames (precision-value
/// flags, identification, request cursors) and belongs to exactly one wheel
/// session.
pub trait WheelDecoder: Send {
    fn wheel_type(&self) -> WheelType;

    /// Decode one BLE notification.
    ///
    /// Returns `None` when the bytes did not complete any decodable frame; the
    /// caller keeps its previous state.
    fn decode(
        &mut self,
        data: &[u8],
        state: &WheelState,
        config: &DecoderConfig,
    ) -> Option<DecodeResult>;

    /// Brand-specific encoding of an abstract command. Unsupported commands
    /// encode to an empty sequence.
    fn encode(&self, command: &WheelCommand) -> Vec<WireCommand>;

    /// Wire primitives for `command`. Raw primitives pass through unchanged.
    fn build_command(&self, command: &WheelCommand) -> Vec<WireCommand> {
        match command {
            WheelCommand::Raw(wire) => vec![wire.clone()],
            other => self.encode(other),
        }
    }

    /// Whether enough frame types have been seen to trust the state.
    fn is_ready(&self) -> bool;

    /// Forget everything learned from the current wheel.
    fn reset(&mut self);

    /// Period of the protocol's keep-alive request, if it needs one.
    fn keep_alive_interval(&self) -> Option<Duration> {
        None
    }

    /// Next keep-alive request. Called once per keep-alive tick.
    fn keep_alive_request(&mut self) -> Option<WireCommand> {
        None
    }
}

/// Fresh decoder for `wheel_type`.
pub fn create_decoder(wheel_type: WheelType) -> Option<Box<dyn WheelDecoder>> {
    let decoder: Box<dyn WheelDecoder> = match wheel_type {
        WheelType::Gotway => Box::new(gotway::GotwayDecoder::new()),
        WheelType::Kingsong => Box::new(kingsong::KingsongDecoder::new()),
        WheelType::Veteran => Box::new(veteran::VeteranDecoder::new()),
        WheelType::Inmotion => Box::new(inmotion::InmotionDecoder::new()),
        WheelType::InmotionV2 => Box::new(inmotion_v2::InmotionV2Decoder::new()),
        WheelType::Ninebot => Box::new(ninebot::NinebotDecoder::new()),
        WheelType::NinebotZ => Box::new(ninebot_z::NinebotZDecoder::new()),
        WheelType::Unknown => return None,
    };
    Some(decoder)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_decoder() {
        for wheel in WheelType::ALL {
            let decoder = create_decoder(wheel).unwrap();
            assert_eq!(decoder.wheel_type(), wheel);
            assert!(!decoder.is_ready());
        }
        assert!(create_decoder(WheelType::Unknown).is_none());
    }

    #[test]
    fn test_raw_passthrough() {
        let raw = WireCommand::delayed(vec![1, 2, 3], 50);
        for wheel in WheelType::ALL {
            let decoder = create_decoder(wheel).unwrap();
            assert_eq!(
                decoder.build_command(&WheelCommand::Raw(raw.clone())),
                vec![raw.clone()]
            );
        }
    }

    #[test]
    fn test_empty_input_is_none() {
        let config = DecoderConfig::default();
        for wheel in WheelType::ALL {
            let mut decoder = create_decoder(wheel).unwrap();
            assert!(decoder
                .decode(&[], &WheelState::new(wheel), &config)
                .is_none());
        }
    }
}
