//! One-shot connect to the remembered wheel at startup.

use crate::domain::models::ConnectionState;
use crate::error::Result;
use crate::infrastructure::bluetooth::radio::{send_request, RadioRequest, RadioSender};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupOutcome {
    Connected { address: String },
    Failed { error: String },
    TimedOut,
}

#[derive(Debug, Default)]
struct AttemptState {
    generation: u64,
    busy: bool,
    last_outcome: Option<StartupOutcome>,
}

pub struct StartupConnector {
    radio: RadioSender,
    connection: watch::Receiver<ConnectionState>,
    state: Arc<Mutex<AttemptState>>,
    task: Option<JoinHandle<()>>,
}

fn lock(state: &Mutex<AttemptState>) -> MutexGuard<'_, AttemptState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

/// Next unseen Connected or Failed state.
async fn next_settled(connection: &mut watch::Receiver<ConnectionState>) -> Option<ConnectionState> {
    loop {
        connection.changed().await.ok()?;
        let state = connection.borrow_and_update().clone();
        if state.is_settled() {
            return Some(state);
        }
    }
}

impl StartupConnector {
    pub fn new(radio: RadioSender, connection: watch::Receiver<ConnectionState>) -> Self {
        Self {
            radio,
            connection,
            state: Arc::new(Mutex::new(AttemptState::default())),
            task: None,
        }
    }

    /// Issue one connect request and stay busy until the radio reports
    /// Connected/Failed or `timeout` passes. Replaces any attempt in flight.
    pub fn attempt(&mut self, address: &str, timeout: Duration) -> Result<()> {
        self.abort_task();
        let generation = {
            let mut state = lock(&self.state);
            state.generation = state.generation.wrapping_add(1);
            state.busy = true;
            state.generation
        };

        // Mark the current value seen before the request goes out
        let mut connection = self.connection.clone();
        connection.borrow_and_update();

        info!("Startup connect to {} (timeout {:?})", address, timeout);
        if let Err(e) = send_request(
            &self.radio,
            RadioRequest::Connect {
                address: address.to_string(),
            },
        ) {
            lock(&self.state).busy = false;
            return Err(e);
        }

        let shared = self.state.clone();
        let address = address.to_string();
        self.task = Some(tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, next_settled(&mut connection)).await {
                Ok(Some(ConnectionState::Connected { address, .. })) => {
                    StartupOutcome::Connected { address }
                }
                Ok(Some(ConnectionState::Failed { error })) => StartupOutcome::Failed { error },
                Ok(_) => StartupOutcome::Failed {
                    error: "connection state closed".to_string(),
                },
                Err(_) => StartupOutcome::TimedOut,
            };
            match &outcome {
                StartupOutcome::Connected { .. } => info!("Startup connect to {} succeeded", address),
                other => warn!("Startup connect to {} ended: {:?}", address, other),
            }

            let mut state = lock(&shared);
            if state.generation == generation {
                state.busy = false;
                state.last_outcome = Some(outcome);
            }
        }));
        Ok(())
    }

    pub fn cancel(&mut self) {
        self.abort_task();
        lock(&self.state).busy = false;
    }

    pub fn is_busy(&self) -> bool {
        lock(&self.state).busy
    }

    pub fn last_outcome(&self) -> Option<StartupOutcome> {
        lock(&self.state).last_outcome.clone()
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for StartupConnector {
    fn drop(&mut self) {
        self.abort_task();
    }
}
