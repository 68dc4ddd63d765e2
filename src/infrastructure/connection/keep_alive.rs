//! Periodic keep-alive ticking.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

pub type TickCallback = Arc<dyn Fn() -> anyhow::Result<()> + Send + Sync>;

#[derive(Clone)]
struct TickerSpec {
    interval: Duration,
    initial_delay: Duration,
    callback: TickCallback,
}

/// Invokes a callback on a fixed period until stopped.
///
/// A failing (or panicking) callback is logged and the next tick still runs.
#[derive(Default)]
pub struct KeepAliveTicker {
    spec: Option<TickerSpec>,
    task: Option<JoinHandle<()>>,
}

impl KeepAliveTicker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start ticking. A zero interval is ignored; any running ticker is
    /// replaced.
    pub fn start(&mut self, interval: Duration, initial_delay: Duration, callback: TickCallback) {
        if interval.is_zero() {
            debug!("Keep-alive with zero interval ignored");
            return;
        }
        self.stop();
        let spec = TickerSpec {
            interval,
            initial_delay,
            callback,
        };
        self.task = Some(spawn_ticker(spec.clone()));
        self.spec = Some(spec);
        debug!("Keep-alive started every {:?}", interval);
    }

    /// Idempotent.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Keep-alive stopped");
        }
    }

    /// Start again with the last parameters. No-op if never started.
    pub fn restart(&mut self) {
        if let Some(spec) = self.spec.clone() {
            self.stop();
            self.task = Some(spawn_ticker(spec));
        }
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for KeepAliveTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn_ticker(spec: TickerSpec) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + spec.initial_delay, spec.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            match catch_unwind(AssertUnwindSafe(|| (spec.callback)())) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Keep-alive tick failed: {:#}", e),
                Err(_) => warn!("Keep-alive tick panicked"),
            }
        }
    })
}
