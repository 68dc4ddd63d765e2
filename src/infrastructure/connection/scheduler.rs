//! One-shot delayed actions, used for multi-part command sequences.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

type Pending = Arc<Mutex<HashMap<u64, JoinHandle<()>>>>;

#[derive(Default)]
pub struct CommandScheduler {
    pending: Pending,
    next_id: u64,
}

fn lock(pending: &Pending) -> MutexGuard<'_, HashMap<u64, JoinHandle<()>>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

fn run_action<F>(action: F)
where
    F: FnOnce() -> anyhow::Result<()>,
{
    match catch_unwind(AssertUnwindSafe(action)) {
        Ok(Ok(())) => {}
        Ok(Err(e)) => warn!("Scheduled command failed: {:#}", e),
        Err(_) => warn!("Scheduled command panicked"),
    }
}

impl CommandScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `action` once after `delay`. A zero delay runs it right away.
    ///
    /// Failures are logged; they never affect other scheduled actions.
    pub fn schedule<F>(&mut self, delay: Duration, action: F)
    where
        F: FnOnce() -> anyhow::Result<()> + Send + 'static,
    {
        if delay.is_zero() {
            run_action(action);
            return;
        }

        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let pending = self.pending.clone();
        // Held across spawn + insert so the task cannot remove itself first
        let mut guard = lock(&self.pending);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            lock(&pending).remove(&id);
            run_action(action);
        });
        guard.insert(id, handle);
    }

    /// Drop every pending action. Nothing cancelled will run.
    pub fn cancel_all(&mut self) {
        let drained: Vec<_> = lock(&self.pending).drain().collect();
        if !drained.is_empty() {
            debug!("Cancelling {} scheduled commands", drained.len());
        }
        for (_, handle) in drained {
            handle.abort();
        }
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.pending).len()
    }
}

impl Drop for CommandScheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
