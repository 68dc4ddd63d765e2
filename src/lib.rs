//! Telemetry decoding and connection handling for electric unicycles.
//!
//! Supports Gotway/Begode, KingSong, Veteran, InMotion (both protocol
//! generations), Ninebot and Ninebot Z wheels.

pub mod domain;
pub mod error;
pub mod infrastructure;

pub use domain::commands::{WheelCommand, WireCommand};
pub use domain::config::DecoderConfig;
pub use domain::models::{AppEvent, ConnectionState, ReconnectState, WheelState, WheelType};
pub use error::{Result, WheelError};
pub use infrastructure::bluetooth::{SessionInput, WheelSession};
pub use infrastructure::protocol::{create_decoder, DecodeResult, WheelDecoder};
