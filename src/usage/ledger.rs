use std::sync::Arc;

use crate::error::Result;
use crate::store::LedgerStore;

/// Set of distinct `(repo, user)` pairs. Duplicate inserts are absorbed.
#[derive(Clone)]
pub struct UsageLedger {
    store: Arc<dyn LedgerStore>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    pub fn contains(&self, repo_id: i64, user_id: i64) -> Result<bool> {
        Ok(self.store.count_by_repo_user(repo_id, user_id)? > 0)
    }

    pub fn count_by_repo(&self, repo_id: i64) -> Result<i64> {
        self.store.count_by_repo(repo_id)
    }

    /// Returns true when the pair was new.
    pub fn insert(&self, repo_id: i64, user_id: i64) -> Result<bool> {
        self.store.insert_usage(repo_id, user_id)
    }

    pub fn delete_by_repo(&self, repo_id: i64) -> Result<usize> {
        self.store.delete_by_repo(repo_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use tempfile::TempDir;

    #[test]
    fn test_insert_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        let ledger = UsageLedger::new(Arc::new(store));

        assert!(!ledger.contains(5, 7).unwrap());
        assert!(ledger.insert(5, 7).unwrap());
        assert!(!ledger.insert(5, 7).unwrap());
        assert!(ledger.contains(5, 7).unwrap());
        ledger.insert(5, 8).unwrap();
        assert_eq!(ledger.count_by_repo(5).unwrap(), 2);

        assert_eq!(ledger.delete_by_repo(5).unwrap(), 2);
        assert_eq!(ledger.count_by_repo(5).unwrap(), 0);
    }
}
