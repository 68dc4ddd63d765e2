//! Per-session decode configuration.
//!
//! Built once from [`Settings`](crate::domain::settings::Settings) when a
//! session starts and rebuilt when the rider changes preferences; decoders
//! only ever read it.

use serde::{Deserialize, Serialize};

/// Gotway/Begode pack voltage selector.
///
/// Begode boards report voltage as if every wheel had a 16S pack; the real
/// voltage is the reported one times a fixed ratio. Stored in settings as the
/// selector number; unknown selectors fall back to [`VoltageScale::V67`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum VoltageScale {
    #[default]
    V67,
    V84,
    V100,
    V117,
    V134,
    V168,
    V151,
}

impl VoltageScale {
    pub fn from_selector(selector: u8) -> Self {
        match selector {
            1 => Self::V84,
            2 => Self::V100,
            3 => Self::V117,
            4 => Self::V134,
            5 => Self::V168,
            6 => Self::V151,
            _ => Self::V67,
        }
    }

    pub fn selector(&self) -> u8 {
        match self {
            Self::V67 => 0,
            Self::V84 => 1,
            Self::V100 => 2,
            Self::V117 => 3,
            Self::V134 => 4,
            Self::V168 => 5,
            Self::V151 => 6,
        }
    }

    pub fn ratio(&self) -> f64 {
        match self {
            Self::V67 => 1.0,
            Self::V84 => 1.25,
            Self::V100 => 1.5,
            Self::V117 => 73.0 / 42.0,
            Self::V134 => 2.0,
            Self::V168 => 2.5,
            Self::V151 => 2.25,
        }
    }

    /// Scale a raw 1/100 V reading, rounding half up.
    pub fn apply(&self, raw_voltage: i32) -> i32 {
        crate::infrastructure::protocol::bytes::round_half_up(raw_voltage as f64 * self.ratio())
            as i32
    }
}

impl From<u8> for VoltageScale {
    fn from(selector: u8) -> Self {
        Self::from_selector(selector)
    }
}

impl From<VoltageScale> for u8 {
    fn from(scale: VoltageScale) -> Self {
        scale.selector()
    }
}

/// How signed speed / phase current readings are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignMode {
    /// Legacy behaviour: magnitude only
    #[default]
    Absolute,
    Keep,
    Invert,
}

impl SignMode {
    pub fn apply(&self, value: i32) -> i32 {
        match self {
            Self::Absolute => value.abs(),
            Self::Keep => value,
            Self::Invert => -value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecoderConfig {
    #[serde(default)]
    pub voltage_scale: VoltageScale,
    #[serde(default)]
    pub sign_mode: SignMode,
    /// Prefer a precision ("true") voltage over the live frame once seen
    #[serde(default = "default_true")]
    pub auto_voltage: bool,
    #[serde(default)]
    pub better_percents: bool,
    /// Treat Gotway live data as imperial even without a settings frame
    #[serde(default)]
    pub assume_miles_mode: bool,
    #[serde(default)]
    pub mpu6500_imu: bool,
    #[serde(default)]
    pub ks18l_scaler: bool,
    #[serde(default = "default_true")]
    pub gotway_hw_pwm: bool,
}

fn default_true() -> bool {
    true
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            voltage_scale: VoltageScale::default(),
            sign_mode: SignMode::default(),
            auto_voltage: true,
            better_percents: false,
            assume_miles_mode: false,
            mpu6500_imu: false,
            ks18l_scaler: false,
            gotway_hw_pwm: true,
        }
    }
}
