//! SQLite-based state store for the wire agent.
//!
//! Holds the link table and the port attribute table. Every mutation runs
//! inside a `BEGIN IMMEDIATE` transaction so the write lock is taken before
//! the row is read; two agents (or two handles) sharing one database file
//! cannot both observe the same free row.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use thiserror::Error;
use tracing::debug;

/// How long a writer waits for another connection's transaction to finish.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors from state store operations.
#[derive(Debug, Error)]
pub enum StateStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// No free link left in the pool.
    #[error("link pool exhausted (network {0})")]
    PoolExhausted(String),

    /// Both ends of the network's link are already claimed.
    #[error("no free ports on network {0}")]
    NoFreePorts(String),

    /// A link or port that must exist does not.
    #[error("lookup failed: {0}")]
    LookupFailure(String),

    #[error("Invalid state: {0}")]
    Invalid(String),
}

/// SQLite state store.
pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Open or create a state store at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StateStoreError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;

        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;

        Ok(store)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self, StateStoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Initialize database schema.
    fn init_schema(&self) -> Result<(), StateStoreError> {
        self.immediate(|tx| {
            tx.execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS links (
                    position INTEGER NOT NULL UNIQUE,
                    cidr TEXT PRIMARY KEY,
                    left_address TEXT NOT NULL,
                    right_address TEXT NOT NULL,
                    left_control_port INTEGER NOT NULL,
                    right_control_port INTEGER NOT NULL,
                    network_id TEXT,
                    left_port_id TEXT,
                    right_port_id TEXT,
                    leased_at INTEGER
                );

                CREATE INDEX IF NOT EXISTS idx_links_network ON links(network_id);

                CREATE TABLE IF NOT EXISTS port_attributes (
                    port_id TEXT PRIMARY KEY,
                    attributes_json TEXT NOT NULL,
                    updated_at INTEGER NOT NULL
                );
                "#,
            )?;
            Ok(())
        })?;

        debug!("State store schema initialized");
        Ok(())
    }

    /// Run `f` inside an immediate (write-locked) transaction.
    ///
    /// Commits when `f` returns `Ok`; any error rolls the transaction back.
    pub(crate) fn immediate<T, F>(&self, f: F) -> Result<T, StateStoreError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, StateStoreError>,
    {
        let mut conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run a read-only query against the connection.
    pub(crate) fn read<T, F>(&self, f: F) -> Result<T, StateStoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StateStoreError>,
    {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        f(&conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.db");

        let first = StateStore::open(&path).unwrap();
        drop(first);
        let second = StateStore::open(&path).unwrap();

        let tables: i64 = second
            .read(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(tables, 2);
    }

    #[test]
    fn test_immediate_rolls_back_on_error() {
        let store = StateStore::open_in_memory().unwrap();

        let result: Result<(), _> = store.immediate(|tx| {
            tx.execute(
                "INSERT INTO port_attributes (port_id, attributes_json, updated_at)
                 VALUES ('p1', '{}', 0)",
                [],
            )?;
            Err(StateStoreError::Invalid("boom".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = store
            .read(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM port_attributes", [], |row| {
                    row.get(0)
                })?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }
}
