//! Periodic background loops on tokio
//!
//! Each loop is a single spawned task that awaits its body, then sleeps, then
//! awaits it again, so ticks of one loop can never overlap. Every loop gets a
//! child of the scheduler's shutdown token; cancelling either ends the loop
//! at the next tick boundary.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::ports::{PeriodicBody, Scheduler};

/// Handle to a running periodic loop. Dropping it cancels the loop.
#[derive(Debug)]
pub struct LoopHandle {
    name: String,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl LoopHandle {
    /// Handle for a loop driven elsewhere
    pub fn new(name: impl Into<String>, cancel: CancellationToken, join: Option<JoinHandle<()>>) -> Self {
        Self {
            name: name.into(),
            cancel,
            join,
        }
    }

    /// Loop name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Token observed by the loop body
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// True until the loop is disposed or its task finished
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled() && self.join.as_ref().map_or(true, |j| !j.is_finished())
    }

    /// Cancel future ticks. A tick in flight finishes its current phase.
    pub fn dispose(&self) {
        if !self.cancel.is_cancelled() {
            debug!(name = %self.name, "disposing loop");
            self.cancel.cancel();
        }
    }

    /// Dispose and wait for the task to exit
    pub async fn shutdown(mut self) {
        self.dispose();
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }
}

impl Drop for LoopHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// `Scheduler` backed by `tokio::spawn`
#[derive(Clone, Debug, Default)]
pub struct TokioScheduler {
    shutdown: CancellationToken,
}

impl TokioScheduler {
    /// Scheduler whose loops stop when `shutdown` is cancelled
    pub fn new(shutdown: CancellationToken) -> Self {
        Self { shutdown }
    }

    /// Cancel every loop started by this scheduler
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Scheduler for TokioScheduler {
    fn run_periodic(
        &self,
        name: &str,
        body: PeriodicBody,
        interval: Duration,
        initial_delay: Duration,
    ) -> LoopHandle {
        let cancel = self.shutdown.child_token();
        let token = cancel.clone();
        let loop_name = name.to_string();

        let join = tokio::spawn(async move {
            info!(name = %loop_name, ?interval, "loop started");
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(initial_delay) => {}
            }

            loop {
                if token.is_cancelled() {
                    break;
                }
                if let Err(e) = body(token.clone()).await {
                    error!(name = %loop_name, error = %e, "loop terminated");
                    break;
                }
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!(name = %loop_name, "loop stopped");
        });

        LoopHandle::new(name, cancel, Some(join))
    }
}
