use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Wheel brand / protocol family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum WheelType {
    #[default]
    Unknown,
    Gotway,
    Kingsong,
    Veteran,
    Inmotion,
    InmotionV2,
    Ninebot,
    NinebotZ,
}

impl WheelType {
    pub const ALL: [WheelType; 7] = [
        WheelType::Gotway,
        WheelType::Kingsong,
        WheelType::Veteran,
        WheelType::Inmotion,
        WheelType::InmotionV2,
        WheelType::Ninebot,
        WheelType::NinebotZ,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Gotway => "gotway",
            Self::Kingsong => "kingsong",
            Self::Veteran => "veteran",
            Self::Inmotion => "inmotion",
            Self::InmotionV2 => "inmotion-v2",
            Self::Ninebot => "ninebot",
            Self::NinebotZ => "ninebot-z",
        }
    }
}

impl fmt::Display for WheelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WheelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "gotway" | "begode" => Ok(Self::Gotway),
            "kingsong" | "ks" => Ok(Self::Kingsong),
            "veteran" | "leaperkim" => Ok(Self::Veteran),
            "inmotion" | "inmotion-v1" => Ok(Self::Inmotion),
            "inmotion-v2" | "inmotionv2" => Ok(Self::InmotionV2),
            "ninebot" => Ok(Self::Ninebot),
            "ninebot-z" | "ninebotz" => Ok(Self::NinebotZ),
            other => Err(format!("unknown wheel type: {}", other)),
        }
    }
}

/// Largest pack any supported wheel reports (42S).
pub const MAX_BMS_CELLS: usize = 42;

/// Battery management system readout for one pack.
///
/// Values are stored in natural units (volts, amps, °C) because BMS frames
/// report them with per-vendor precision that does not fit a single
/// fixed-point convention.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BmsSnapshot {
    pub serial_number: String,
    pub version: String,
    pub voltage: f64,
    pub current: f64,
    /// mAh
    pub remaining_capacity: i32,
    /// mAh
    pub factory_capacity: i32,
    pub full_cycles: i32,
    pub temperatures: Vec<f64>,
    pub cells: Vec<f64>,
    pub min_cell: f64,
    pub max_cell: f64,
    pub cell_diff: f64,
    /// Percent
    pub health: i32,
}

impl BmsSnapshot {
    /// Store a cell voltage, growing the cell list when needed. Indexes past
    /// [`MAX_BMS_CELLS`] are dropped and reported as `false`.
    pub fn set_cell(&mut self, index: usize, volts: f64) -> bool {
        if index >= MAX_BMS_CELLS {
            return false;
        }
        if self.cells.len() <= index {
            self.cells.resize(index + 1, 0.0);
        }
        self.cells[index] = volts;
        true
    }

    /// Recompute min/max/diff over the non-zero cells.
    pub fn update_cell_stats(&mut self) {
        let populated: Vec<f64> = self.cells.iter().copied().filter(|v| *v > 0.0).collect();
        if populated.is_empty() {
            return;
        }
        self.min_cell = populated.iter().copied().fold(f64::MAX, f64::min);
        self.max_cell = populated.iter().copied().fold(f64::MIN, f64::max);
        self.cell_diff = self.max_cell - self.min_cell;
    }
}

/// Decoded telemetry and settings of one wheel.
///
/// Fixed-point units: speed in 1/100 km/h, voltage in 1/100 V, currents in
/// 1/100 A, power in 1/100 W, temperatures in 1/100 °C, output (PWM) in
/// 1/100 %, distances in metres. Imperial values reported by a wheel are
/// normalized to metric before they land here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WheelState {
    pub wheel_type: WheelType,

    // Live telemetry
    pub speed: i32,
    pub voltage: i32,
    pub current: i32,
    pub phase_current: i32,
    pub power: i32,
    pub temperature: i32,
    pub temperature2: i32,
    pub battery_level: i32,
    pub output: i32,
    pub angle: f64,
    pub roll: f64,
    pub cpu_load: i32,

    // Distances
    pub total_distance: i64,
    pub wheel_distance: i64,

    // Settings reported by the wheel
    pub top_speed: i32,
    pub speed_limit: i32,
    pub alarm_speeds: [i32; 3],
    pub light_mode: i32,
    pub led_mode: i32,
    pub pedals_mode: i32,
    pub roll_angle: i32,
    pub cutout_angle: i32,
    pub alarm_mode: i32,
    pub beeper_volume: i32,
    pub in_miles: bool,
    pub locked: bool,
    pub charging: bool,
    pub fan_on: bool,

    // Identification
    pub model: String,
    pub name: String,
    pub version: String,
    pub serial: String,

    pub bms1: Option<BmsSnapshot>,
    pub bms2: Option<BmsSnapshot>,
}

impl WheelState {
    pub fn new(wheel_type: WheelType) -> Self {
        Self {
            wheel_type,
            ..Default::default()
        }
    }

    /// Derive power from voltage and current (both 1/100 units).
    pub fn update_power(&mut self) {
        self.power = (self.voltage as i64 * self.current as i64 / 100) as i32;
    }

    pub fn bms_mut(&mut self, pack: usize) -> &mut BmsSnapshot {
        let slot = if pack == 2 {
            &mut self.bms2
        } else {
            &mut self.bms1
        };
        slot.get_or_insert_with(BmsSnapshot::default)
    }

    pub fn speed_kmh(&self) -> f64 {
        self.speed as f64 / 100.0
    }

    pub fn voltage_volts(&self) -> f64 {
        self.voltage as f64 / 100.0
    }
}

/// Radio-level connection lifecycle, driven by the platform radio layer
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Scanning,
    Connecting {
        address: String,
    },
    DiscoveringServices {
        address: String,
    },
    Connected {
        address: String,
        name: String,
    },
    ConnectionLost {
        address: String,
        reason: String,
    },
    Failed {
        error: String,
    },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Connected or Failed: the outcome of a connect request is known.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Connected { .. } | Self::Failed { .. })
    }

    pub fn address(&self) -> Option<&str> {
        match self {
            Self::Connecting { address }
            | Self::DiscoveringServices { address }
            | Self::Connected { address, .. }
            | Self::ConnectionLost { address, .. } => Some(address),
            Self::Disconnected | Self::Scanning | Self::Failed { .. } => None,
        }
    }

    /// Whether `next` is a transition the radio layer is expected to make.
    ///
    /// Disconnected, ConnectionLost and Failed can be entered from anywhere.
    pub fn can_transition_to(&self, next: &ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (_, Disconnected) | (_, Failed { .. }) => true,
            (_, ConnectionLost { .. }) => true,
            (Disconnected | Scanning | ConnectionLost { .. } | Failed { .. }, Scanning) => true,
            (Disconnected | Scanning | ConnectionLost { .. } | Failed { .. }, Connecting { .. }) => {
                true
            }
            (Connecting { address: a }, DiscoveringServices { address: b }) => a == b,
            (Connecting { address: a }, Connected { address: b, .. }) => a == b,
            (DiscoveringServices { address: a }, Connected { address: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "disconnected"),
            Self::Scanning => write!(f, "scanning"),
            Self::Connecting { address } => write!(f, "connecting to {}", address),
            Self::DiscoveringServices { address } => {
                write!(f, "discovering services on {}", address)
            }
            Self::Connected { address, name } => write!(f, "connected to {} ({})", name, address),
            Self::ConnectionLost { address, reason } => {
                write!(f, "connection to {} lost: {}", address, reason)
            }
            Self::Failed { error } => write!(f, "connection failed: {}", error),
        }
    }
}

/// Reconnect loop progress
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReconnectState {
    #[default]
    Idle,
    Waiting {
        attempt: u32,
        next_retry_delay: Duration,
    },
    Attempting {
        attempt: u32,
    },
}

/// Optional position attached to telemetry samples
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GpsFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    /// km/h
    pub speed: f64,
    pub bearing: f64,
}

#[derive(Debug, Clone)]
pub enum AppEvent {
    WheelData(Box<WheelState>),
    ConnectionStatus(ConnectionState),
    ReconnectStatus(ReconnectState),
    LogMessage(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wheel_type_parse() {
        assert_eq!("Begode".parse::<WheelType>(), Ok(WheelType::Gotway));
        assert_eq!("inmotion_v2".parse::<WheelType>(), Ok(WheelType::InmotionV2));
        assert!("segway".parse::<WheelType>().is_err());
        for wheel in WheelType::ALL {
            assert_eq!(wheel.as_str().parse::<WheelType>(), Ok(wheel));
        }
    }

    #[test]
    fn test_connection_transitions() {
        let connecting = ConnectionState::Connecting {
            address: "AA".into(),
        };
        let connected = ConnectionState::Connected {
            address: "AA".into(),
            name: "KS-S18".into(),
        };
        let other = ConnectionState::Connected {
            address: "BB".into(),
            name: "KS-S18".into(),
        };
        assert!(ConnectionState::Disconnected.can_transition_to(&connecting));
        assert!(connecting.can_transition_to(&connected));
        assert!(!connecting.can_transition_to(&other));
        assert!(!ConnectionState::Disconnected.can_transition_to(&connected));
        assert!(connected.can_transition_to(&ConnectionState::ConnectionLost {
            address: "AA".into(),
            reason: "timeout".into()
        }));
        assert_eq!(connected.address(), Some("AA"));
        assert!(connected.is_settled());
    }

    #[test]
    fn test_bms_cell_stats() {
        let mut bms = BmsSnapshot::default();
        bms.set_cell(2, 4.1);
        bms.set_cell(0, 4.0);
        bms.update_cell_stats();
        assert_eq!(bms.cells.len(), 3);
        assert_eq!(bms.min_cell, 4.0);
        assert!((bms.cell_diff - 0.1).abs() < 1e-9);

        assert!(!bms.set_cell(MAX_BMS_CELLS, 4.2));
        assert!(!bms.set_cell(1778, 4.2));
        assert_eq!(bms.cells.len(), 3);
        assert!(bms.set_cell(MAX_BMS_CELLS - 1, 4.2));
        assert_eq!(bms.cells.len(), MAX_BMS_CELLS);
    }
}
