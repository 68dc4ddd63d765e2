//! Connection resilience: timers that run beside the decode path.
//!
//! Every primitive owns its own tokio task and observes the shared
//! connection state; none of them writes it.

pub mod auto_connect;
pub mod keep_alive;
pub mod reconnect;
pub mod scheduler;
pub mod watchdog;

pub use auto_connect::{StartupConnector, StartupOutcome};
pub use keep_alive::{KeepAliveTicker, TickCallback};
pub use reconnect::{ReconnectConfig, ReconnectManager};
pub use scheduler::CommandScheduler;
pub use watchdog::DataWatchdog;
