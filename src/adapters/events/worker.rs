//! Lifecycle shared by the background workers.
//!
//! A worker moves `Idle → Running → Stopping → Stopped` and may be started
//! again once stopped. Stopping signals the loop through a `watch` channel
//! and waits for the spawned task to finish its current iteration.

use std::future::Future;
use std::sync::{Mutex as StdMutex, PoisonError};
use std::time::Duration;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;

/// Observable state of a background worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

struct Running {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

pub(crate) struct WorkerLifecycle {
    name: String,
    state: StdMutex<WorkerState>,
    running: Mutex<Option<Running>>,
}

impl WorkerLifecycle {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: StdMutex::new(WorkerState::Idle),
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> WorkerState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: WorkerState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    /// Spawns `run` unless the worker is already running.
    ///
    /// Returns false if a loop was already active.
    pub async fn launch<F, Fut>(&self, run: F) -> bool
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return false;
        }
        let (shutdown, receiver) = watch::channel(false);
        let task = tokio::spawn(run(receiver));
        *running = Some(Running { shutdown, task });
        self.set_state(WorkerState::Running);
        tracing::info!(worker = %self.name, "Worker started");
        true
    }

    /// Signals the loop to stop and waits for it to exit. Idempotent.
    pub async fn shutdown(&self) {
        let mut running = self.running.lock().await;
        let Some(active) = running.take() else {
            return;
        };
        self.set_state(WorkerState::Stopping);
        // The loop may already have exited on its own.
        let _ = active.shutdown.send(true);
        if let Err(e) = active.task.await {
            tracing::warn!(worker = %self.name, error = %e, "Worker task ended abnormally");
        }
        self.set_state(WorkerState::Stopped);
        tracing::info!(worker = %self.name, "Worker stopped");
    }
}

/// Waits for `delay` or a shutdown signal, whichever comes first.
///
/// Returns true when the loop should exit.
pub(crate) async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
    }
}
