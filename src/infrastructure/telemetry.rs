//! Rate-limited telemetry samples for ride logging.

use crate::domain::models::{GpsFix, WheelState};
use serde::Serialize;
use std::io::Write;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::time::Instant;

pub const TELEMETRY_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetrySample {
    /// Unix time, milliseconds
    pub timestamp_ms: u64,
    pub state: WheelState,
    pub gps: Option<GpsFix>,
}

impl TelemetrySample {
    pub fn now(state: WheelState, gps: Option<GpsFix>) -> Self {
        let timestamp_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            timestamp_ms,
            state,
            gps,
        }
    }
}

pub trait TelemetrySink: Send {
    fn record(&mut self, sample: &TelemetrySample) -> anyhow::Result<()>;
}

/// Writes one JSON object per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> TelemetrySink for JsonLinesSink<W> {
    fn record(&mut self, sample: &TelemetrySample) -> anyhow::Result<()> {
        serde_json::to_writer(&mut self.writer, sample)?;
        writeln!(self.writer)?;
        Ok(())
    }
}

/// Lets through at most one sample per interval.
#[derive(Debug)]
pub struct TelemetryThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl Default for TelemetryThrottle {
    fn default() -> Self {
        Self::new(TELEMETRY_INTERVAL)
    }
}

impl TelemetryThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    pub fn offer(&mut self, state: &WheelState, gps: Option<GpsFix>) -> Option<TelemetrySample> {
        let now = Instant::now();
        if let Some(last) = self.last_emit {
            if now.duration_since(last) < self.interval {
                return None;
            }
        }
        self.last_emit = Some(now);
        Some(TelemetrySample::now(state.clone(), gps))
    }
}
