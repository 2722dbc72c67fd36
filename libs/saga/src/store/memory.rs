//! In-memory store.
//!
//! Used by tests and by dry runs. Cloning a `MemoryStore` snapshots its
//! committed state, which is how tests simulate a process restart.

use std::collections::BTreeMap;

use super::{DurableStore, Record, StoreError};

/// In-memory implementation of [`DurableStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    committed: BTreeMap<String, Record>,
    staged: Option<BTreeMap<String, Record>>,
    unavailable: bool,
    failing_commits: u32,
    commits: u64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail (or succeed again).
    pub fn set_unavailable(&mut self, unavailable: bool) {
        self.unavailable = unavailable;
    }

    /// Make the next `count` commits fail, leaving their transaction open.
    pub fn fail_next_commits(&mut self, count: u32) {
        self.failing_commits = count;
    }

    /// Number of transactions (including autocommitted mutations) applied.
    pub fn commit_count(&self) -> u64 {
        self.commits
    }

    /// Number of records currently committed.
    pub fn len(&self) -> usize {
        self.committed.len()
    }

    /// Whether no record is committed.
    pub fn is_empty(&self) -> bool {
        self.committed.is_empty()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("memory store disabled".to_string()));
        }
        Ok(())
    }

    fn view(&self) -> &BTreeMap<String, Record> {
        self.staged.as_ref().unwrap_or(&self.committed)
    }

    fn mutate<F>(&mut self, f: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut BTreeMap<String, Record>),
    {
        self.check()?;
        match self.staged.as_mut() {
            Some(staged) => f(staged),
            None => {
                f(&mut self.committed);
                self.commits += 1;
            }
        }
        Ok(())
    }
}

impl Clone for MemoryStore {
    /// Snapshot the committed state. In-flight transactions are not copied.
    fn clone(&self) -> Self {
        Self {
            committed: self.committed.clone(),
            staged: None,
            unavailable: false,
            failing_commits: 0,
            commits: 0,
        }
    }
}

impl DurableStore for MemoryStore {
    fn begin_transaction(&mut self) -> Result<(), StoreError> {
        self.check()?;
        if self.staged.is_some() {
            return Err(StoreError::TransactionActive);
        }
        self.staged = Some(self.committed.clone());
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), StoreError> {
        self.check()?;
        if self.staged.is_none() {
            return Err(StoreError::NoTransaction);
        }
        if self.failing_commits > 0 {
            self.failing_commits -= 1;
            return Err(StoreError::Unavailable("commit failed".to_string()));
        }
        let staged = self.staged.take().ok_or(StoreError::NoTransaction)?;
        self.committed = staged;
        self.commits += 1;
        Ok(())
    }

    fn abort_transaction(&mut self) -> Result<(), StoreError> {
        self.staged.take().ok_or(StoreError::NoTransaction)?;
        Ok(())
    }

    fn set_field(&mut self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        self.mutate(|records| {
            records
                .entry(key.to_string())
                .or_default()
                .insert(field.to_string(), value.to_string());
        })
    }

    fn delete_field(&mut self, key: &str, field: &str) -> Result<(), StoreError> {
        self.mutate(|records| {
            if let Some(record) = records.get_mut(key) {
                record.remove(field);
                if record.is_empty() {
                    records.remove(key);
                }
            }
        })
    }

    fn destroy_record(&mut self, key: &str) -> Result<(), StoreError> {
        self.mutate(|records| {
            records.remove(key);
        })
    }

    fn lookup(&self, key: &str) -> Result<Option<Record>, StoreError> {
        self.check()?;
        Ok(self.view().get(key).cloned())
    }

    fn record_keys(&self) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(self.view().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::with_transaction;

    #[test]
    fn test_autocommit_outside_transaction() {
        let mut store = MemoryStore::new();
        store.set_field("wf", "a", "1").unwrap();
        assert_eq!(store.get_field("wf", "a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.commit_count(), 1);
    }

    #[test]
    fn test_transaction_is_atomic() {
        let mut store = MemoryStore::new();
        store.begin_transaction().unwrap();
        store.set_field("wf", "a", "1").unwrap();
        store.set_field("wf", "b", "2").unwrap();
        // A snapshot taken mid-transaction only sees committed state.
        assert!(store.clone().lookup("wf").unwrap().is_none());
        store.commit_transaction().unwrap();

        let record = store.lookup("wf").unwrap().unwrap();
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn test_failed_closure_aborts() {
        let mut store = MemoryStore::new();
        let result: Result<(), _> = with_transaction(&mut store, |s| {
            s.set_field("wf", "a", "1")?;
            Err(StoreError::Unavailable("boom".to_string()))
        });
        assert!(result.is_err());
        assert!(store.lookup("wf").unwrap().is_none());
    }

    #[test]
    fn test_failed_commit_releases_transaction() {
        let mut store = MemoryStore::new();
        store.fail_next_commits(1);

        let result = with_transaction(&mut store, |s| s.set_field("wf", "a", "1"));
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert!(store.lookup("wf").unwrap().is_none());

        with_transaction(&mut store, |s| s.set_field("wf", "a", "2")).unwrap();
        assert_eq!(store.get_field("wf", "a").unwrap().as_deref(), Some("2"));
    }

    #[test]
    fn test_nested_begin_rejected() {
        let mut store = MemoryStore::new();
        store.begin_transaction().unwrap();
        assert!(matches!(
            store.begin_transaction(),
            Err(StoreError::TransactionActive)
        ));
        assert!(matches!(
            MemoryStore::new().commit_transaction(),
            Err(StoreError::NoTransaction)
        ));
    }

    #[test]
    fn test_deleting_last_field_removes_record() {
        let mut store = MemoryStore::new();
        store.set_field("wf", "a", "1").unwrap();
        store.delete_field("wf", "a").unwrap();
        assert!(store.is_empty());
        assert!(store.record_keys().unwrap().is_empty());
    }

    #[test]
    fn test_unavailable_store_fails() {
        let mut store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(
            store.set_field("wf", "a", "1"),
            Err(StoreError::Unavailable(_))
        ));
        store.set_unavailable(false);
        store.set_field("wf", "a", "1").unwrap();
    }
}
