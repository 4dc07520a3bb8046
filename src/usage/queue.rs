use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::store::TaskStore;
use crate::types::{UsageAction, UsageTask};

/// FIFO of usage tasks. Every transition is a conditional update on the
/// task's status, so at most one worker ever holds a given task.
#[derive(Clone)]
pub struct TaskQueue {
    store: Arc<dyn TaskStore>,
}

impl TaskQueue {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn enqueue(&self, repo_id: i64, user_id: i64, action: UsageAction) -> Result<i64> {
        let id = self.store.insert_task(repo_id, user_id, action)?;
        debug!(
            "Enqueued usage task {}: {} repo={} user={}",
            id,
            action.as_str(),
            repo_id,
            user_id
        );
        Ok(id)
    }

    pub fn list_unlocked(&self) -> Result<Vec<UsageTask>> {
        self.store.list_unlocked_tasks()
    }

    pub fn get(&self, id: i64) -> Result<Option<UsageTask>> {
        self.store.get_task(id)
    }

    /// Fails with `TaskAlreadyLocked` when another worker won the race.
    pub fn lock(&self, id: i64) -> Result<()> {
        self.store.lock_task(id)
    }

    pub fn unlock(&self, id: i64) -> Result<()> {
        self.store.unlock_task(id)
    }

    pub fn complete(&self, id: i64) -> Result<()> {
        self.store.complete_task(id)
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        self.store.delete_task(id)
    }

    /// Returns tasks locked for longer than `older_than` to the queue.
    pub fn sweep_stale(&self, older_than: Duration) -> Result<usize> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| Error::Config(format!("stale lock age: {e}")))?;
        let cutoff = Utc::now() - age;
        let unlocked = self.store.unlock_stale_tasks(cutoff)?;
        if unlocked > 0 {
            warn!("Unlocked {} stale usage tasks", unlocked);
        } else {
            debug!("No stale usage tasks");
        }
        Ok(unlocked)
    }
}
