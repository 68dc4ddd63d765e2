//! Bluetooth Module
//!
//! The wheel-facing side of the crate. The platform radio (scan, GATT,
//! notifications) lives outside and talks to a session through channels.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐  RadioRequest   ┌──────────────────────────────────┐
//! │ platform     │◀────────────────│           WheelSession           │
//! │ radio layer  │                 │  decoder · scheduler · keep-alive│
//! │              │  SessionInput   │  reconnect · watchdog · telemetry│
//! │              │────────────────▶│                                  │
//! └──────┬───────┘                 └───────────────┬──────────────────┘
//!        │ ConnectionStateHandle (watch)           │ AppEvent
//!        └────────────────────────────────────────▶▼
//! ```
//!
//! ## Modules
//!
//! - [`radio`] - requests to the radio layer and the shared connection state
//! - [`service`] - the per-wheel session

pub mod radio;
pub mod service;

pub use radio::{ConnectionStateHandle, RadioRequest, RadioSender};
pub use service::{SessionInput, WheelSession};
