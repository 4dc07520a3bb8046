use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::usage::{CounterProjection, TaskQueue, UsageCoordinator, UsageLedger};

pub fn run_usage_drain(settings: &Settings) -> anyhow::Result<()> {
    let store = Arc::new(super::open_store(settings)?);
    let coordinator = UsageCoordinator::new(
        TaskQueue::new(store.clone()),
        UsageLedger::new(store),
    );

    let report = coordinator.drain(&CancellationToken::new())?;
    println!(
        "Processed {} tasks ({} skipped, {} failed)",
        report.processed, report.skipped, report.failed
    );
    Ok(())
}

pub fn run_usage_reconcile(settings: &Settings) -> anyhow::Result<()> {
    let store = Arc::new(super::open_store(settings)?);
    let report = CounterProjection::new(store.clone(), store).reconcile()?;
    println!(
        "Checked {} counters ({} updated, {} failed)",
        report.checked, report.updated, report.failed
    );
    Ok(())
}

pub fn run_usage_sweep(settings: &Settings, older_than: Option<u64>) -> anyhow::Result<()> {
    let store = Arc::new(super::open_store(settings)?);
    let older_than = Duration::from_secs(older_than.unwrap_or(settings.usage.stale_lock_secs));

    let unlocked = TaskQueue::new(store).sweep_stale(older_than)?;
    println!("Unlocked {unlocked} stale tasks");
    Ok(())
}
