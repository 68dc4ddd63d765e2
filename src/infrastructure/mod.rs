pub mod bluetooth;
pub mod capture;
pub mod connection;
pub mod logging;
pub mod protocol;
pub mod telemetry;
