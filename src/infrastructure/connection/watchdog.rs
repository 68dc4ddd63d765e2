use std::time::Duration;
use tokio::time::Instant;

pub const DEFAULT_DATA_TIMEOUT: Duration = Duration::from_secs(15);

/// Flags a connection that stopped delivering notifications.
///
/// Time is measured from the last [`on_data_received`](Self::on_data_received),
/// or from creation/reset if nothing arrived yet.
#[derive(Debug, Clone)]
pub struct DataWatchdog {
    threshold: Duration,
    last_data: Instant,
}

impl DataWatchdog {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold,
            last_data: Instant::now(),
        }
    }

    pub fn on_data_received(&mut self) {
        self.last_data = Instant::now();
    }

    pub fn reset(&mut self) {
        self.last_data = Instant::now();
    }

    pub fn since_last_data(&self) -> Duration {
        self.last_data.elapsed()
    }

    pub fn is_timed_out(&self) -> bool {
        self.since_last_data() >= self.threshold
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }
}

impl Default for DataWatchdog {
    fn default() -> Self {
        Self::new(DEFAULT_DATA_TIMEOUT)
    }
}
