//! Reconnect-after-loss with a backoff schedule.

use crate::domain::models::{ConnectionState, ReconnectState};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::radio::{send_request, RadioRequest, RadioSender};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout_at, Instant};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Wait before each attempt; the last entry repeats once exhausted
    pub backoff: Vec<Duration>,
    /// Time given to a connect request before the next wait starts
    pub settle: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

impl ReconnectConfig {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            backoff: settings.reconnect_backoff(),
            settle: settings.reconnect_settle(),
        }
    }

    /// Delay before attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let index = (attempt.max(1) as usize - 1).min(self.backoff.len().saturating_sub(1));
        self.backoff.get(index).copied().unwrap_or(Duration::from_secs(1))
    }
}

/// Drives Waiting -> Attempting -> Waiting until the wheel is connected.
pub struct ReconnectManager {
    config: ReconnectConfig,
    radio: RadioSender,
    connection: watch::Receiver<ConnectionState>,
    status: Arc<watch::Sender<ReconnectState>>,
    task: Option<JoinHandle<()>>,
}

impl ReconnectManager {
    pub fn new(
        mut config: ReconnectConfig,
        radio: RadioSender,
        connection: watch::Receiver<ConnectionState>,
    ) -> Self {
        if config.backoff.is_empty() {
            warn!("Empty reconnect backoff, using defaults");
            config.backoff = ReconnectConfig::default().backoff;
        }
        let (status, _) = watch::channel(ReconnectState::Idle);
        Self {
            config,
            radio,
            connection,
            status: Arc::new(status),
            task: None,
        }
    }

    /// Begin reconnecting to `address`, replacing any running loop.
    pub fn start(&mut self, address: &str) {
        self.abort_task();
        info!("Reconnecting to {}", address);

        let config = self.config.clone();
        let radio = self.radio.clone();
        let connection = self.connection.clone();
        let status = self.status.clone();
        let address = address.to_string();
        // First Waiting is visible before the task gets polled
        status.send_replace(ReconnectState::Waiting {
            attempt: 1,
            next_retry_delay: config.delay_for(1),
        });
        self.task = Some(tokio::spawn(reconnect_loop(
            config, radio, connection, status, address,
        )));
    }

    pub fn stop(&mut self) {
        self.abort_task();
        self.status.send_replace(ReconnectState::Idle);
    }

    pub fn state(&self) -> ReconnectState {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ReconnectState> {
        self.status.subscribe()
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn abort_task(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for ReconnectManager {
    fn drop(&mut self) {
        self.abort_task();
    }
}

/// True if a Connected state shows up before `limit` elapses. A closed
/// state channel just waits out the period.
async fn connected_within(connection: &mut watch::Receiver<ConnectionState>, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    let outcome = match timeout_at(deadline, connection.wait_for(|s| s.is_connected())).await {
        Ok(Ok(_)) => Some(true),
        Ok(Err(_)) => None,
        Err(_) => Some(false),
    };
    match outcome {
        Some(connected) => connected,
        None => {
            sleep_until(deadline).await;
            false
        }
    }
}

async fn reconnect_loop(
    config: ReconnectConfig,
    radio: RadioSender,
    mut connection: watch::Receiver<ConnectionState>,
    status: Arc<watch::Sender<ReconnectState>>,
    address: String,
) {
    let mut attempt: u32 = 1;
    loop {
        let delay = config.delay_for(attempt);
        status.send_replace(ReconnectState::Waiting {
            attempt,
            next_retry_delay: delay,
        });
        if connected_within(&mut connection, delay).await {
            break;
        }

        status.send_replace(ReconnectState::Attempting { attempt });
        info!("Reconnect attempt {} to {}", attempt, address);
        if let Err(e) = send_request(
            &radio,
            RadioRequest::Connect {
                address: address.clone(),
            },
        ) {
            warn!("Reconnect abandoned: {}", e);
            break;
        }

        if connected_within(&mut connection, config.settle).await {
            break;
        }
        attempt = attempt.saturating_add(1);
    }
    info!("Reconnect loop for {} finished", address);
    status.send_replace(ReconnectState::Idle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::bluetooth::radio::ConnectionStateHandle;
    use tokio::sync::mpsc;

    async fn settle() {
        for _ in 0..8 {
            tokio::task::yield_now().await;
        }
    }

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    fn manager(
        backoff: &[u64],
    ) -> (
        ReconnectManager,
        mpsc::UnboundedReceiver<RadioRequest>,
        ConnectionStateHandle,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionStateHandle::new();
        handle.set(ConnectionState::ConnectionLost {
            address: "AA".into(),
            reason: "link loss".into(),
        });
        let config = ReconnectConfig {
            backoff: backoff.iter().map(|v| ms(*v)).collect(),
            settle: ms(3000),
        };
        (ReconnectManager::new(config, tx, handle.subscribe()), rx, handle)
    }

    fn connects(rx: &mut mpsc::UnboundedReceiver<RadioRequest>) -> usize {
        let mut n = 0;
        while let Ok(request) = rx.try_recv() {
            assert_eq!(
                request,
                RadioRequest::Connect {
                    address: "AA".into()
                }
            );
            n += 1;
        }
        n
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_scenario() {
        let (mut mgr, mut rx, _handle) = manager(&[1000, 2000, 4000]);
        mgr.start("AA");
        settle().await;
        assert_eq!(
            mgr.state(),
            ReconnectState::Waiting {
                attempt: 1,
                next_retry_delay: ms(1000)
            }
        );
        assert_eq!(connects(&mut rx), 0);

        tokio::time::advance(ms(1001)).await;
        settle().await;
        assert_eq!(connects(&mut rx), 1);
        assert_eq!(mgr.state(), ReconnectState::Attempting { attempt: 1 });

        tokio::time::advance(ms(3000)).await;
        settle().await;
        assert_eq!(
            mgr.state(),
            ReconnectState::Waiting {
                attempt: 2,
                next_retry_delay: ms(2000)
            }
        );
        assert_eq!(connects(&mut rx), 0);

        tokio::time::advance(ms(2000)).await;
        settle().await;
        assert_eq!(connects(&mut rx), 1);
        assert_eq!(mgr.state(), ReconnectState::Attempting { attempt: 2 });
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_delay_reused() {
        let (mut mgr, mut rx, _handle) = manager(&[100, 200]);
        mgr.start("AA");
        settle().await;
        // attempt 1: 100 + 3000, attempt 2: 200 + 3000
        tokio::time::advance(ms(101)).await;
        settle().await;
        tokio::time::advance(ms(3000)).await;
        settle().await;
        tokio::time::advance(ms(200)).await;
        settle().await;
        tokio::time::advance(ms(3000)).await;
        settle().await;
        assert_eq!(connects(&mut rx), 2);
        assert_eq!(
            mgr.state(),
            ReconnectState::Waiting {
                attempt: 3,
                next_retry_delay: ms(200)
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_connected_stops_loop() {
        let (mut mgr, mut rx, handle) = manager(&[1000]);
        mgr.start("AA");
        settle().await;
        tokio::time::advance(ms(1001)).await;
        settle().await;
        assert_eq!(connects(&mut rx), 1);

        handle.set(ConnectionState::Connecting {
            address: "AA".into(),
        });
        handle.set(ConnectionState::Connected {
            address: "AA".into(),
            name: "GotWay".into(),
        });
        settle().await;
        assert_eq!(mgr.state(), ReconnectState::Idle);
        assert!(!mgr.is_active());

        tokio::time::advance(ms(10_000)).await;
        settle().await;
        assert_eq!(connects(&mut rx), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_attempts() {
        let (mut mgr, mut rx, _handle) = manager(&[1000]);
        mgr.start("AA");
        settle().await;
        mgr.stop();
        assert_eq!(mgr.state(), ReconnectState::Idle);

        tokio::time::advance(ms(5000)).await;
        settle().await;
        assert_eq!(connects(&mut rx), 0);
    }

    #[test]
    fn test_delay_for_clamps() {
        let config = ReconnectConfig {
            backoff: vec![ms(1000), ms(2000)],
            settle: ms(3000),
        };
        assert_eq!(config.delay_for(0), ms(1000));
        assert_eq!(config.delay_for(2), ms(2000));
        assert_eq!(config.delay_for(9), ms(2000));
        assert_eq!(ReconnectConfig::default().delay_for(1), ms(1000));
    }
}
