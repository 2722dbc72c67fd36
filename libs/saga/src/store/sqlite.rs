//! SQLite-backed store.
//!
//! Every field is one row of the `attributes` table, keyed by
//! `(record_key, field)`. A record exists while it has at least one row.

use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{DurableStore, Record, StoreError};

/// SQLite implementation of [`DurableStore`].
pub struct SqliteStore {
    conn: Connection,
    in_transaction: bool,
}

impl SqliteStore {
    /// Open or create a store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;

        // WAL keeps readers off the writer's back during long recoveries.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;

        let store = Self {
            conn,
            in_transaction: false,
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            in_transaction: false,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS attributes (
                record_key TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                updated_at INTEGER NOT NULL,
                PRIMARY KEY (record_key, field)
            );
            "#,
        )?;

        debug!("Attribute store schema initialized");
        Ok(())
    }
}

impl DurableStore for SqliteStore {
    fn begin_transaction(&mut self) -> Result<(), StoreError> {
        if self.in_transaction {
            return Err(StoreError::TransactionActive);
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.in_transaction = true;
        Ok(())
    }

    fn commit_transaction(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::NoTransaction);
        }
        self.in_transaction = false;
        if let Err(e) = self.conn.execute_batch("COMMIT") {
            // SQLite keeps the transaction open after some COMMIT failures.
            if !self.conn.is_autocommit() {
                let _ = self.conn.execute_batch("ROLLBACK");
            }
            return Err(e.into());
        }
        Ok(())
    }

    fn abort_transaction(&mut self) -> Result<(), StoreError> {
        if !self.in_transaction {
            return Err(StoreError::NoTransaction);
        }
        self.in_transaction = false;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    fn set_field(&mut self, key: &str, field: &str, value: &str) -> Result<(), StoreError> {
        let now = chrono::Utc::now().timestamp();
        self.conn.execute(
            r#"
            INSERT INTO attributes (record_key, field, value, updated_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(record_key, field) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, field, value, now],
        )?;
        Ok(())
    }

    fn delete_field(&mut self, key: &str, field: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM attributes WHERE record_key = ?1 AND field = ?2",
            params![key, field],
        )?;
        Ok(())
    }

    fn destroy_record(&mut self, key: &str) -> Result<(), StoreError> {
        self.conn.execute(
            "DELETE FROM attributes WHERE record_key = ?1",
            params![key],
        )?;
        Ok(())
    }

    fn lookup(&self, key: &str) -> Result<Option<Record>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT field, value FROM attributes WHERE record_key = ?1")?;

        let record = stmt
            .query_map(params![key], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Record, _>>()?;

        Ok(if record.is_empty() { None } else { Some(record) })
    }

    fn record_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT record_key FROM attributes ORDER BY record_key")?;

        let keys = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;

        Ok(keys)
    }

    fn get_field(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        self.conn
            .query_row(
                "SELECT value FROM attributes WHERE record_key = ?1 AND field = ?2",
                params![key, field],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::with_transaction;

    #[test]
    fn test_sqlite_store_fields() {
        let mut store = SqliteStore::open_in_memory().unwrap();

        store.set_field("wf_1", "State_cursor", "0").unwrap();
        store.set_field("wf_1", "State_cursor", "1").unwrap();
        store.set_field("wf_1", "State_rollingBack", "false").unwrap();

        let record = store.lookup("wf_1").unwrap().unwrap();
        assert_eq!(record.get("State_cursor").map(String::as_str), Some("1"));
        assert_eq!(record.len(), 2);

        store.delete_field("wf_1", "State_cursor").unwrap();
        assert!(store.get_field("wf_1", "State_cursor").unwrap().is_none());

        store.destroy_record("wf_1").unwrap();
        assert!(store.lookup("wf_1").unwrap().is_none());
    }

    #[test]
    fn test_sqlite_store_rollback() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store.set_field("wf_1", "kept", "yes").unwrap();

        let result: Result<(), _> = with_transaction(&mut store, |s| {
            s.set_field("wf_1", "dropped", "yes")?;
            Err(StoreError::Unavailable("injected".to_string()))
        });
        assert!(result.is_err());

        let record = store.lookup("wf_1").unwrap().unwrap();
        assert!(record.contains_key("kept"));
        assert!(!record.contains_key("dropped"));
    }

    #[test]
    fn test_sqlite_failed_commit_rolls_back() {
        let mut store = SqliteStore::open_in_memory().unwrap();
        store
            .conn
            .execute_batch(
                r#"
                PRAGMA foreign_keys = ON;
                CREATE TABLE parent (id INTEGER PRIMARY KEY);
                CREATE TABLE child (
                    parent_id INTEGER REFERENCES parent(id) DEFERRABLE INITIALLY DEFERRED
                );
                "#,
            )
            .unwrap();

        // The deferred foreign key only fails at COMMIT.
        store.begin_transaction().unwrap();
        store.set_field("wf_1", "State_cursor", "1").unwrap();
        store
            .conn
            .execute("INSERT INTO child (parent_id) VALUES (42)", [])
            .unwrap();
        assert!(store.commit_transaction().is_err());
        assert!(!store.in_transaction);
        assert!(store.conn.is_autocommit());
        assert!(store.lookup("wf_1").unwrap().is_none());

        with_transaction(&mut store, |s| s.set_field("wf_1", "State_cursor", "2")).unwrap();
        assert_eq!(
            store.get_field("wf_1", "State_cursor").unwrap().as_deref(),
            Some("2")
        );
    }

    #[test]
    fn test_sqlite_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        {
            let mut store = SqliteStore::open(&path).unwrap();
            with_transaction(&mut store, |s| {
                s.set_field("wf_a", "State_cursor", "2")?;
                s.set_field("wf_a-scratchpad", "fleet_id", "\"sfr-1\"")
            })
            .unwrap();
        }

        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(
            store.record_keys().unwrap(),
            vec!["wf_a".to_string(), "wf_a-scratchpad".to_string()]
        );
        assert_eq!(
            store.get_field("wf_a", "State_cursor").unwrap().as_deref(),
            Some("2")
        );
    }
}
