//! Unique-usage accounting: a durable task queue drained into a set of
//! distinct `(repo, user)` pairs, projected into per-repository counters.

mod coordinator;
mod counter;
mod ledger;
mod queue;

pub use coordinator::{DrainReport, UsageCoordinator};
pub use counter::{CounterProjection, ReconcileReport};
pub use ledger::UsageLedger;
pub use queue::TaskQueue;
