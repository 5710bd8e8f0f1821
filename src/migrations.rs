//! Schema migration framework.
//!
//! Numbered SQL migrations are embedded at compile time via `include_str!`.
//! Each migration runs exactly once, tracked by the `schema_version` table.

use rusqlite::Connection;

struct Migration {
    version: i32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("migrations/001_baseline.sql"),
}];

/// Create the `schema_version` table if it doesn't exist.
fn ensure_schema_version_table(conn: &Connection) -> Result<(), String> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )
    .map_err(|e| format!("Failed to create schema_version table: {}", e))
}

/// Return the highest applied migration version, or 0 if none.
fn current_version(conn: &Connection) -> Result<i32, String> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| format!("Failed to read schema version: {}", e))
}

/// Back up the database before applying migrations to a non-empty store.
///
/// Only reached once a store at version 1 or later has a newer migration pending.
///
/// Uses SQLite's online backup API to create a hot copy at
/// `<db_path>.pre-migration.bak`. Fresh databases are skipped.
fn backup_before_migration(conn: &Connection, current: i32) -> Result<(), String> {
    if current == 0 {
        return Ok(());
    }

    let db_path: String = conn
        .query_row("PRAGMA database_list", [], |row| row.get(2))
        .map_err(|e| format!("Failed to get database path: {}", e))?;

    if db_path.is_empty() || db_path == ":memory:" {
        return Ok(());
    }

    let backup_path = format!("{}.pre-migration.bak", db_path);
    let mut backup_conn = Connection::open(&backup_path)
        .map_err(|e| format!("Failed to open backup file: {}", e))?;

    let backup = rusqlite::backup::Backup::new(conn, &mut backup_conn)
        .map_err(|e| format!("Failed to initialize pre-migration backup: {}", e))?;

    backup
        .step(-1)
        .map_err(|e| format!("Pre-migration backup failed: {}", e))?;

    log::info!("Pre-migration backup created at {}", backup_path);
    Ok(())
}

/// Run all pending migrations.
///
/// Returns the number of migrations applied (0 if already up-to-date).
/// A database newer than this build is refused rather than downgraded.
pub fn run_migrations(conn: &Connection) -> Result<usize, String> {
    ensure_schema_version_table(conn)?;

    let current = current_version(conn)?;
    let max_known = MIGRATIONS.last().map(|m| m.version).unwrap_or(0);

    if current > max_known {
        return Err(format!(
            "Database schema version ({}) is newer than this build supports ({}). \
             Please update Hearth.",
            current, max_known
        ));
    }

    let pending: Vec<&Migration> = MIGRATIONS.iter().filter(|m| m.version > current).collect();

    if pending.is_empty() {
        return Ok(0);
    }

    backup_before_migration(conn, current)?;

    for migration in &pending {
        conn.execute_batch(migration.sql)
            .map_err(|e| format!("Migration v{} failed: {}", migration.version, e))?;

        conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [migration.version],
        )
        .map_err(|e| format!("Failed to record migration v{}: {}", migration.version, e))?;

        log::info!("Applied migration v{}", migration.version);
    }

    Ok(pending.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_db() -> Connection {
        Connection::open_in_memory().expect("in-memory db")
    }

    #[test]
    fn test_fresh_db_applies_baseline() {
        let conn = mem_db();
        let applied = run_migrations(&conn).expect("migrations should succeed");
        assert_eq!(applied, 1);
        assert_eq!(current_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_rerun_is_noop() {
        let conn = mem_db();
        run_migrations(&conn).unwrap();
        assert_eq!(run_migrations(&conn).unwrap(), 0);
    }

    #[test]
    fn test_newer_schema_refused() {
        let conn = mem_db();
        run_migrations(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (99)", [])
            .unwrap();
        let err = run_migrations(&conn).unwrap_err();
        assert!(err.contains("newer"));
    }

    fn backups_in(dir: &std::path::Path) -> Vec<std::path::PathBuf> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| p.to_string_lossy().ends_with(".pre-migration.bak"))
            .collect()
    }

    #[test]
    fn test_backup_skipped_for_fresh_store() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("hearth.db")).unwrap();
        run_migrations(&conn).unwrap();
        assert!(backups_in(dir.path()).is_empty());
    }

    #[test]
    fn test_backup_copies_migrated_store() {
        let dir = tempfile::tempdir().unwrap();
        let conn = Connection::open(dir.path().join("hearth.db")).unwrap();
        run_migrations(&conn).unwrap();

        backup_before_migration(&conn, current_version(&conn).unwrap()).unwrap();

        let backups = backups_in(dir.path());
        assert_eq!(backups.len(), 1);
        let copy = Connection::open(&backups[0]).unwrap();
        assert_eq!(current_version(&copy).unwrap(), 1);
    }

    #[test]
    fn test_run_stats_check_constraints() {
        let conn = mem_db();
        run_migrations(&conn).unwrap();
        // scanned (5) != flagged (1) + rejections (1): rejected by CHECK
        let result = conn.execute(
            "INSERT INTO discovery_runs (run_id, pack_id, started_at, finished_at, scanned, flagged,
                conf_very_low, conf_low, conf_medium, conf_high, conf_very_high, sampled_for_review,
                rejected_domain, rejected_keyword_no_match, rejected_low_score, rejected_duplicate,
                rejected_other)
             VALUES ('r1', 'school', 'a', 'b', 5, 1, 0, 0, 0, 0, 1, 1, 1, 0, 0, 0, 0)",
            [],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_dismissals_are_write_once() {
        let conn = mem_db();
        run_migrations(&conn).unwrap();
        conn.execute(
            "INSERT INTO dismissals (token, item_type, subject, sender, original_date, pack_id,
                reason, dismissed_at)
             VALUES ('t1', 'event', 's', 'x@y.com', 'd', 'school', 'not ours', 'now')",
            [],
        )
        .unwrap();
        assert!(conn
            .execute("UPDATE dismissals SET reason = 'edited' WHERE token = 't1'", [])
            .is_err());
        assert!(conn.execute("DELETE FROM dismissals", []).is_err());
    }
}
