use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{CounterProjection, TaskQueue, UsageLedger};
use crate::error::{Error, Result};
use crate::types::UsageTask;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub processed: usize,
    /// Tasks another worker locked first.
    pub skipped: usize,
    /// Tasks returned to the queue after a failure.
    pub failed: usize,
}

/// Drains the usage queue into the ledger.
pub struct UsageCoordinator {
    queue: TaskQueue,
    ledger: UsageLedger,
}

impl UsageCoordinator {
    pub fn new(queue: TaskQueue, ledger: UsageLedger) -> Self {
        Self { queue, ledger }
    }

    pub fn queue(&self) -> &TaskQueue {
        &self.queue
    }

    /// One pass over the unlocked tasks, oldest first. Cancellation is
    /// checked between tasks, never inside one.
    pub fn drain(&self, cancel: &CancellationToken) -> Result<DrainReport> {
        let mut report = DrainReport::default();

        for task in self.queue.list_unlocked()? {
            if cancel.is_cancelled() {
                debug!("Drain cancelled with tasks remaining");
                break;
            }

            match self.queue.lock(task.id) {
                Ok(()) => {}
                Err(Error::TaskAlreadyLocked(_)) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }

            match self.process(&task) {
                Ok(()) => report.processed += 1,
                Err(e) => {
                    error!("Failed to process usage task {}: {}", task.id, e);
                    report.failed += 1;
                    if let Err(e) = self.queue.unlock(task.id) {
                        error!("Failed to unlock usage task {}: {}", task.id, e);
                    }
                }
            }
        }

        if report != DrainReport::default() {
            info!(
                "Drained usage tasks: processed={} skipped={} failed={}",
                report.processed, report.skipped, report.failed
            );
        }
        Ok(report)
    }

    fn process(&self, task: &UsageTask) -> Result<()> {
        if !self.ledger.contains(task.repo_id, task.user_id)? {
            self.ledger.insert(task.repo_id, task.user_id)?;
        }
        self.queue.complete(task.id)?;
        self.queue.delete(task.id)
    }

    /// Sweeps stale locks, then drains, every `interval` until cancelled.
    pub async fn run(
        self: Arc<Self>,
        interval: Duration,
        stale_after: Duration,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Usage coordinator stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let this = self.clone();
                    let token = cancel.clone();
                    let cycle = tokio::task::spawn_blocking(move || {
                        this.queue.sweep_stale(stale_after)?;
                        this.drain(&token)
                    })
                    .await;
                    match cycle {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => error!("Usage drain failed: {}", e),
                        Err(e) => error!("Usage drain panicked: {}", e),
                    }
                }
            }
        }
    }
}

impl CounterProjection {
    /// Runs [`reconcile`](Self::reconcile) every `interval` until cancelled.
    pub async fn run(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Counter projection stopped");
                    break;
                }
                _ = ticker.tick() => {
                    let this = self.clone();
                    match tokio::task::spawn_blocking(move || this.reconcile()).await {
                        Ok(Ok(_)) => {}
                        Ok(Err(e)) => error!("Counter reconcile failed: {}", e),
                        Err(e) => warn!("Counter reconcile panicked: {}", e),
                    }
                }
            }
        }
    }
}
