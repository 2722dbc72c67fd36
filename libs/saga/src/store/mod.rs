//! Durable attribute-record store.
//!
//! A record is a flat map of string fields under a string key. Workflows keep
//! two records: the command record (keyed by the workflow ID) and the
//! scratchpad (keyed `<workflow ID>-scratchpad`).
//!
//! Mutations between [`DurableStore::begin_transaction`] and
//! [`DurableStore::commit_transaction`] become visible to other readers all at
//! once. Outside a transaction every mutation commits on its own.

mod memory;
mod sqlite;

use std::collections::BTreeMap;

use thiserror::Error;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// A record's fields.
pub type Record = BTreeMap<String, String>;

/// Errors from store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("transaction already in progress")]
    TransactionActive,

    #[error("no transaction in progress")]
    NoTransaction,

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// The durable store contract used by the engine and by steps.
pub trait DurableStore: Send {
    /// Start buffering mutations.
    fn begin_transaction(&mut self) -> Result<(), StoreError>;

    /// Apply every buffered mutation atomically.
    fn commit_transaction(&mut self) -> Result<(), StoreError>;

    /// Discard every buffered mutation.
    fn abort_transaction(&mut self) -> Result<(), StoreError>;

    /// Set one field, creating the record if needed.
    fn set_field(&mut self, key: &str, field: &str, value: &str) -> Result<(), StoreError>;

    /// Remove one field. Missing fields are ignored.
    fn delete_field(&mut self, key: &str, field: &str) -> Result<(), StoreError>;

    /// Remove a whole record. Missing records are ignored.
    fn destroy_record(&mut self, key: &str) -> Result<(), StoreError>;

    /// Read a whole record.
    fn lookup(&self, key: &str) -> Result<Option<Record>, StoreError>;

    /// List the keys of every record, sorted.
    fn record_keys(&self) -> Result<Vec<String>, StoreError>;

    /// Read one field.
    fn get_field(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        Ok(self.lookup(key)?.and_then(|mut r| r.remove(field)))
    }
}

/// Run `f` inside a transaction, committing on success and aborting on error.
pub fn with_transaction<T, F>(store: &mut dyn DurableStore, f: F) -> Result<T, StoreError>
where
    F: FnOnce(&mut dyn DurableStore) -> Result<T, StoreError>,
{
    store.begin_transaction()?;
    match f(&mut *store) {
        Ok(value) => match store.commit_transaction() {
            Ok(()) => Ok(value),
            Err(e) => {
                // A commit that failed may leave the transaction open.
                let _ = store.abort_transaction();
                Err(e)
            }
        },
        Err(e) => {
            // The original error is more useful than a failed abort.
            let _ = store.abort_transaction();
            Err(e)
        }
    }
}
