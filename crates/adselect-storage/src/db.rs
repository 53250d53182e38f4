//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex for thread-safe access.
//! Configures WAL mode and recommended PRAGMAs on initialization.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{Connection, Transaction};
use tracing::info;

use adselect_core::error::AdSelectError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
///
/// Uses WAL mode for concurrent read/write safety. The connection is
/// wrapped in a Mutex since rusqlite Connection is not Sync. Foreign keys
/// are enforced; the unified ad-selection tables rely on cascade deletes.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode, synchronous=NORMAL, foreign keys, and runs
    /// all pending migrations.
    pub fn new(path: &Path) -> Result<Self, AdSelectError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| AdSelectError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -65536;",
        )
        .map_err(|e| AdSelectError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.with_conn(|conn| migrations::run_migrations(conn))?;

        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, AdSelectError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| AdSelectError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| AdSelectError::Storage(format!("Failed to set pragmas: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.with_conn(|conn| migrations::run_migrations(conn))?;

        Ok(db)
    }

    /// Execute a closure with a reference to the underlying connection.
    ///
    /// This is the primary way to interact with the database. The mutex
    /// is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, AdSelectError>
    where
        F: FnOnce(&Connection) -> Result<T, AdSelectError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| AdSelectError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a closure inside a single transaction, committing on Ok and
    /// rolling back on Err.
    ///
    /// Multi-statement operations whose correctness depends on no writer
    /// interleaving (capacity check followed by insert, probe-then-persist)
    /// must go through here rather than `with_conn`.
    pub fn with_tx<F, T>(&self, f: F) -> Result<T, AdSelectError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, AdSelectError>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| AdSelectError::Storage(format!("Database lock poisoned: {}", e)))?;
        let tx = conn
            .transaction()
            .map_err(|e| AdSelectError::Storage(format!("Failed to begin transaction: {}", e)))?;
        let result = f(&tx)?;
        tx.commit()
            .map_err(|e| AdSelectError::Storage(format!("Failed to commit transaction: {}", e)))?;
        Ok(result)
    }
}

// SAFETY: Database is Send+Sync because:
// 1. The rusqlite Connection is wrapped in a std::sync::Mutex
// 2. All database access goes through Mutex::lock(), ensuring exclusive access
// 3. No raw pointers or unprotected shared state
// 4. WAL mode is configured for safe concurrent reads from the OS level
unsafe impl Send for Database {}
unsafe impl Sync for Database {}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

/// Map a rusqlite error onto the error classes callers branch on:
/// constraint violations (foreign key, uniqueness) are distinguishable from
/// other storage failures.
pub(crate) fn map_sqlite_err(e: rusqlite::Error) -> AdSelectError {
    match &e {
        rusqlite::Error::SqliteFailure(inner, _)
            if inner.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            AdSelectError::Constraint(e.to_string())
        }
        _ => AdSelectError::Storage(e.to_string()),
    }
}

/// Extension trait for rusqlite to support optional query results.
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM ad_selection", [], |row| row.get(0))
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        let db = Database::new(&path).unwrap();

        db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM ad_selection", [], |row| row.get(0))
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let enabled: i64 = conn
                .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            assert_eq!(enabled, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_with_tx_rolls_back_on_error() {
        let db = Database::in_memory().unwrap();
        let result: Result<(), AdSelectError> = db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO buyer_decision_logic (bidding_logic_uri, buyer_decision_logic_js)
                 VALUES ('https://buyer.example.com/bidding', 'function() {}')",
                [],
            )
            .map_err(map_sqlite_err)?;
            Err(AdSelectError::Storage("forced failure".to_string()))
        });
        assert!(result.is_err());

        db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM buyer_decision_logic", [], |row| {
                    row.get(0)
                })
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_with_tx_commits_on_ok() {
        let db = Database::in_memory().unwrap();
        db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO buyer_decision_logic (bidding_logic_uri, buyer_decision_logic_js)
                 VALUES ('https://buyer.example.com/bidding', 'function() {}')",
                [],
            )
            .map_err(map_sqlite_err)?;
            Ok(())
        })
        .unwrap();

        db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM buyer_decision_logic", [], |row| {
                    row.get(0)
                })
                .map_err(|e| AdSelectError::Storage(e.to_string()))?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }
}
