//! Boundary with the platform radio layer.
//!
//! The radio itself (scanning, GATT, notifications) lives outside this crate.
//! It consumes [`RadioRequest`]s and reports back through the shared
//! [`ConnectionStateHandle`] and the session input channel.

use crate::domain::models::ConnectionState;
use crate::error::{Result, WheelError};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioRequest {
    Scan,
    StopScan,
    Connect { address: String },
    Disconnect,
    /// Bytes for the wheel's write characteristic
    Write(Vec<u8>),
}

pub type RadioSender = mpsc::UnboundedSender<RadioRequest>;

pub fn send_request(radio: &RadioSender, request: RadioRequest) -> Result<()> {
    radio.send(request).map_err(|_| WheelError::RadioClosed)
}

/// The single shared [`ConnectionState`].
///
/// Only the radio layer writes it; every resilience primitive observes it
/// through [`subscribe`](Self::subscribe).
#[derive(Debug, Clone)]
pub struct ConnectionStateHandle {
    sender: Arc<watch::Sender<ConnectionState>>,
}

impl ConnectionStateHandle {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn get(&self) -> ConnectionState {
        self.sender.borrow().clone()
    }

    /// Publish a new state. Unexpected transitions are logged and applied
    /// anyway; the radio layer is the source of truth.
    pub fn set(&self, next: ConnectionState) {
        let current = self.get();
        if current == next {
            return;
        }
        if !current.can_transition_to(&next) {
            warn!("Unexpected connection transition: {} -> {}", current, next);
        } else {
            debug!("Connection: {} -> {}", current, next);
        }
        self.sender.send_replace(next);
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.sender.subscribe()
    }
}

impl Default for ConnectionStateHandle {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_handle_notifies_subscribers() {
        let handle = ConnectionStateHandle::new();
        let mut rx = handle.subscribe();
        handle.set(ConnectionState::Connecting {
            address: "AA".into(),
        });
        assert!(rx.has_changed().unwrap());
        assert_eq!(
            *rx.borrow_and_update(),
            ConnectionState::Connecting {
                address: "AA".into()
            }
        );

        // same state again is not a change
        handle.set(ConnectionState::Connecting {
            address: "AA".into(),
        });
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_send_request_reports_closed_channel() {
        let (tx, rx) = mpsc::unbounded_channel();
        assert!(send_request(&tx, RadioRequest::Scan).is_ok());
        drop(rx);
        assert!(matches!(
            send_request(&tx, RadioRequest::Disconnect),
            Err(WheelError::RadioClosed)
        ));
    }
}
