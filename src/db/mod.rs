//! SQLite-backed store for the approval queue, dismissal audit trail,
//! domain suggestions, discovery run stats, and backfill calendar writes.
//!
//! The database lives at `~/.hearth/hearth.db` unless the config names a path.
//! Scan workers share one connection behind a mutex ([`SharedDb`]); every
//! compare-and-insert and every disposition is a single critical section.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::Connection;

use crate::types::DiscoveryConfig;

pub mod types;
pub use types::*;

pub mod approvals;
pub mod calendar;
pub mod dismissals;
pub mod runs;
pub mod suggestions;

/// Connection shared across scan workers.
pub type SharedDb = Arc<Mutex<HearthDb>>;

pub struct HearthDb {
    conn: Connection,
}

impl HearthDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    /// Commits on Ok, rolls back on Err.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        self.conn
            .execute_batch("BEGIN IMMEDIATE")
            .map_err(|e| E::from(DbError::from(e)))?;
        match f(self) {
            Ok(val) => {
                self.conn
                    .execute_batch("COMMIT")
                    .map_err(|e| E::from(DbError::from(e)))?;
                Ok(val)
            }
            Err(e) => {
                let _ = self.conn.execute_batch("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Open (or create) the database named by the config and apply the schema.
    pub fn open(config: &DiscoveryConfig) -> Result<Self, DbError> {
        let path = match &config.db_path {
            Some(p) => PathBuf::from(p),
            None => Self::default_path()?,
        };
        Self::open_at(path)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL for concurrent readers (dashboard) while scans write.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        crate::migrations::run_migrations(&conn).map_err(DbError::Migration)?;

        log::debug!("Opened store at {}", path.display());
        Ok(Self { conn })
    }

    /// Wrap in the shared handle used by the pipeline and the queue.
    pub fn into_shared(self) -> SharedDb {
        Arc::new(Mutex::new(self))
    }

    /// Resolve the default database path: `~/.hearth/hearth.db`.
    fn default_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".hearth").join("hearth.db"))
    }
}

// =============================================================================
// Column helpers
// =============================================================================

/// Fixed-width UTC timestamp so stored values sort lexicographically.
pub(crate) fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_ts(idx: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_opt_ts(
    idx: usize,
    value: Option<String>,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    value.map(|v| parse_ts(idx, &v)).transpose()
}

/// Parse a closed-enum column, surfacing unknown values as conversion errors.
pub(crate) fn parse_enum<T>(idx: usize, value: &str) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value.parse::<T>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Text,
            Box::<dyn std::error::Error + Send + Sync>::from(e),
        )
    })
}

pub(crate) fn parse_json<T: serde::de::DeserializeOwned>(
    idx: usize,
    value: &str,
) -> rusqlite::Result<T> {
    serde_json::from_str(value)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn to_json<T: serde::Serialize>(
    column: &'static str,
    value: &T,
) -> Result<String, DbError> {
    serde_json::to_string(value).map_err(|e| DbError::Encode {
        column,
        message: e.to_string(),
    })
}

// =============================================================================
// Shared test utilities
// =============================================================================


#[cfg(test)]
mod tests {
    use super::test_utils::test_db;
    use super::*;

    #[test]
    fn test_open_creates_tables() {
        let db = test_db();
        for table in [
            "approval_items",
            "dismissals",
            "digest_queue",
            "suggested_domains",
            "discovery_runs",
            "calendar_writes",
        ] {
            let count: i64 = db
                .conn_ref()
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                .unwrap_or_else(|e| panic!("{} table should exist: {}", table, e));
            assert_eq!(count, 0);
        }
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("hearth.db");
        HearthDb::open_at(path.clone()).expect("first open");
        HearthDb::open_at(path).expect("second open");
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let db = test_db();
        let result: Result<(), DbError> = db.with_transaction(|tx| {
            tx.conn_ref().execute(
                "INSERT INTO digest_queue (token, queued_at) VALUES ('t1', '2025-01-01T00:00:00.000Z')",
                [],
            )?;
            Err(DbError::Migration("forced".into()))
        });
        assert!(result.is_err());
        let count: i64 = db
            .conn_ref()
            .query_row("SELECT COUNT(*) FROM digest_queue", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_timestamps_sort_lexicographically() {
        let a = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z").unwrap().with_timezone(&Utc);
        let b = DateTime::parse_from_rfc3339("2025-01-01T00:00:00.5Z").unwrap().with_timezone(&Utc);
        assert!(ts(&a) < ts(&b));
        assert_eq!(parse_ts(0, &ts(&b)).unwrap(), b);
    }
}
