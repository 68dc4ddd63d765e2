//! Abstract wheel commands and the wire primitives they encode to.

/// Something the rider (or the session) wants the wheel to do.
///
/// Each decoder maps an intent to zero or more [`WireCommand`]s. An intent a
/// brand does not support encodes to an empty sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WheelCommand {
    Beep,
    SetLight(bool),
    SetLightMode(u8),
    SetLedMode(u8),
    Calibrate,
    PowerOff,
    SetLock(bool),
    ResetTrip,
    SetCutoutAngle(u8),
    SetPedalsMode(u8),
    SetRollAngle(u8),
    SetAlarmMode(u8),
    SetMilesMode(bool),
    SetBeeperVolume(u8),
    /// km/h
    SetTiltBackSpeed(u8),
    /// Alarm speeds and maximum speed, km/h
    SetSpeedAlarms {
        alarm1: u8,
        alarm2: u8,
        alarm3: u8,
        max_speed: u8,
    },
    RequestName,
    RequestSerial,
    RequestFirmware,
    /// Ask for the stored speed alarm settings
    RequestAlarms,
    /// Pre-encoded bytes, passed through untouched
    Raw(WireCommand),
}

/// Bytes for the radio write characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireCommand {
    Send(Vec<u8>),
    /// Send after `delay_ms`, measured from the previous primitive of the
    /// same command.
    SendDelayed { data: Vec<u8>, delay_ms: u64 },
}

impl WireCommand {
    pub fn send(data: impl Into<Vec<u8>>) -> Self {
        Self::Send(data.into())
    }

    pub fn delayed(data: impl Into<Vec<u8>>, delay_ms: u64) -> Self {
        Self::SendDelayed {
            data: data.into(),
            delay_ms,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Self::Send(data) | Self::SendDelayed { data, .. } => data,
        }
    }

    pub fn delay_ms(&self) -> u64 {
        match self {
            Self::Send(_) => 0,
            Self::SendDelayed { delay_ms, .. } => *delay_ms,
        }
    }
}

/// Offsets of each primitive relative to the first one, in milliseconds.
///
/// Delays accumulate: `[Send, SendDelayed(300), SendDelayed(100)]` yields
/// `[0, 300, 400]`.
pub fn cumulative_offsets(commands: &[WireCommand]) -> Vec<u64> {
    commands
        .iter()
        .scan(0u64, |acc, cmd| {
            *acc += cmd.delay_ms();
            Some(*acc)
        })
        .collect()
}
