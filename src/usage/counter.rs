use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::store::{CounterStore, LedgerStore};
use crate::types::UNIQUE_CLONES_METRIC_KEY;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub checked: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Rewrites `unique_clones` counters from the ledger. A failing row is
/// logged and skipped; the pass never aborts halfway.
pub struct CounterProjection {
    counters: Arc<dyn CounterStore>,
    ledger: Arc<dyn LedgerStore>,
}

impl CounterProjection {
    pub fn new(counters: Arc<dyn CounterStore>, ledger: Arc<dyn LedgerStore>) -> Self {
        Self { counters, ledger }
    }

    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for counter in self.counters.list_counters()? {
            if counter.metric_key != UNIQUE_CLONES_METRIC_KEY {
                continue;
            }
            report.checked += 1;

            let count = match self.ledger.count_by_repo(counter.repo_id) {
                Ok(count) => count,
                Err(e) => {
                    error!(
                        "Failed to count unique usages for repository {}: {}",
                        counter.repo_id, e
                    );
                    report.failed += 1;
                    continue;
                }
            };
            if count == counter.metric_value {
                continue;
            }

            match self
                .counters
                .update_counter(counter.repo_id, &counter.metric_key, count)
            {
                Ok(()) => {
                    debug!(
                        "Counter {} for repository {}: {} -> {}",
                        counter.metric_key, counter.repo_id, counter.metric_value, count
                    );
                    report.updated += 1;
                }
                Err(e) => {
                    error!(
                        "Failed to update counter for repository {}: {}",
                        counter.repo_id, e
                    );
                    report.failed += 1;
                }
            }
        }

        info!(
            "Reconciled counters: checked={} updated={} failed={}",
            report.checked, report.updated, report.failed
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Arc<SqliteStore>, CounterProjection) {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(SqliteStore::new(temp.path().join("test.db")).unwrap());
        store.initialize().unwrap();
        let projection = CounterProjection::new(store.clone(), store.clone());
        (temp, store, projection)
    }

    #[test]
    fn test_reconcile_converges_to_ledger() {
        let (_temp, store, projection) = setup();
        for user in 1..=3 {
            store.insert_usage(10, user).unwrap();
        }
        store.upsert_counter(10, UNIQUE_CLONES_METRIC_KEY, 0).unwrap();

        let report = projection.reconcile().unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(
            store
                .get_counter(10, UNIQUE_CLONES_METRIC_KEY)
                .unwrap()
                .unwrap()
                .metric_value,
            3
        );

        let again = projection.reconcile().unwrap();
        assert_eq!(again.checked, 1);
        assert_eq!(again.updated, 0);
    }

    #[test]
    fn test_other_metrics_untouched() {
        let (_temp, store, projection) = setup();
        store.insert_usage(10, 1).unwrap();
        store.upsert_counter(10, "stars", 42).unwrap();

        let report = projection.reconcile().unwrap();
        assert_eq!(report.checked, 0);
        assert_eq!(store.get_counter(10, "stars").unwrap().unwrap().metric_value, 42);
    }

    #[test]
    fn test_counter_without_usages_drops_to_zero() {
        let (_temp, store, projection) = setup();
        store.upsert_counter(11, UNIQUE_CLONES_METRIC_KEY, 5).unwrap();

        projection.reconcile().unwrap();
        assert_eq!(
            store
                .get_counter(11, UNIQUE_CLONES_METRIC_KEY)
                .unwrap()
                .unwrap()
                .metric_value,
            0
        );
    }
}
