//! Local SQLite database for client-side state.
//!
//! Holds UI preferences and advisory list snapshots. Uses rusqlite with WAL
//! mode and numbered migrations tracked in `schema_version`.

use rusqlite::{params, Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{error, info, warn};

use crate::error::LedgerError;

/// Shared database connection.
pub struct DbState {
    pub conn: Mutex<Connection>,
    pub db_path: PathBuf,
}

/// Current schema version. Bump when adding new migrations.
const CURRENT_SCHEMA_VERSION: i32 = 2;

/// Initialize the database at `{data_dir}/ledger.db`.
///
/// Creates the directory if needed, opens the connection, sets pragmas,
/// and runs any pending migrations. On corruption or open failure,
/// deletes the file and retries once; the contents are a cache only.
pub fn init(data_dir: &Path) -> Result<DbState, LedgerError> {
    fs::create_dir_all(data_dir)
        .map_err(|e| LedgerError::Storage(format!("create data dir: {e}")))?;

    let db_path = data_dir.join("ledger.db");
    info!("Opening database at {}", db_path.display());

    let conn = match open_and_configure(&db_path) {
        Ok(c) => c,
        Err(first_err) => {
            warn!(
                "Database open failed ({}), deleting and retrying once",
                first_err
            );
            if db_path.exists() {
                let _ = fs::remove_file(&db_path);
                let _ = fs::remove_file(db_path.with_extension("db-wal"));
                let _ = fs::remove_file(db_path.with_extension("db-shm"));
            }
            open_and_configure(&db_path)?
        }
    };

    run_migrations(&conn)?;

    info!("Database initialized (schema v{CURRENT_SCHEMA_VERSION})");

    Ok(DbState {
        conn: Mutex::new(conn),
        db_path,
    })
}

/// In-memory database with the full schema.
pub fn open_in_memory() -> Result<DbState, LedgerError> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch(
        "PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    run_migrations(&conn)?;
    Ok(DbState {
        conn: Mutex::new(conn),
        db_path: PathBuf::from(":memory:"),
    })
}

fn open_and_configure(path: &Path) -> Result<Connection, LedgerError> {
    let conn = Connection::open(path)?;
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA synchronous = NORMAL;",
    )?;
    Ok(conn)
}

fn run_migrations(conn: &Connection) -> Result<(), LedgerError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT DEFAULT (datetime('now'))
        );",
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current >= CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    info!("Migrating database from v{current} to v{CURRENT_SCHEMA_VERSION}");

    if current < 1 {
        migrate_v1(conn)?;
    }
    if current < 2 {
        migrate_v2(conn)?;
    }

    Ok(())
}

/// Migration v1: namespaced preference values.
fn migrate_v1(conn: &Connection) -> Result<(), LedgerError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS preferences (
            namespace TEXT NOT NULL,
            pref_key TEXT NOT NULL,
            pref_value TEXT NOT NULL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (namespace, pref_key)
        );

        INSERT INTO schema_version (version) VALUES (1);
        ",
    )
    .map_err(|e| {
        error!("Migration v1 failed: {e}");
        LedgerError::Storage(format!("migration v1: {e}"))
    })?;

    info!("Applied migration v1 (preferences table)");
    Ok(())
}

/// Migration v2: lookup by namespace for bulk clears.
fn migrate_v2(conn: &Connection) -> Result<(), LedgerError> {
    conn.execute_batch(
        "
        CREATE INDEX IF NOT EXISTS idx_preferences_namespace
            ON preferences(namespace);

        INSERT INTO schema_version (version) VALUES (2);
        ",
    )
    .map_err(|e| {
        error!("Migration v2 failed: {e}");
        LedgerError::Storage(format!("migration v2: {e}"))
    })?;

    info!("Applied migration v2 (preferences namespace index)");
    Ok(())
}

// ---------------------------------------------------------------------------
// Preference helpers
// ---------------------------------------------------------------------------

pub fn get_preference(
    conn: &Connection,
    namespace: &str,
    key: &str,
) -> Result<Option<String>, LedgerError> {
    Ok(conn
        .query_row(
            "SELECT pref_value FROM preferences WHERE namespace = ?1 AND pref_key = ?2",
            params![namespace, key],
            |row| row.get(0),
        )
        .optional()?)
}

/// Insert or update a preference.
pub fn set_preference(
    conn: &Connection,
    namespace: &str,
    key: &str,
    value: &str,
) -> Result<(), LedgerError> {
    conn.execute(
        "INSERT INTO preferences (namespace, pref_key, pref_value, updated_at)
         VALUES (?1, ?2, ?3, datetime('now'))
         ON CONFLICT(namespace, pref_key) DO UPDATE SET
            pref_value = excluded.pref_value,
            updated_at = excluded.updated_at",
        params![namespace, key, value],
    )?;
    Ok(())
}

pub fn delete_preference(conn: &Connection, namespace: &str, key: &str) -> Result<(), LedgerError> {
    conn.execute(
        "DELETE FROM preferences WHERE namespace = ?1 AND pref_key = ?2",
        params![namespace, key],
    )?;
    Ok(())
}

/// Delete every preference in a namespace.
pub fn clear_namespace(conn: &Connection, namespace: &str) -> Result<usize, LedgerError> {
    Ok(conn.execute(
        "DELETE FROM preferences WHERE namespace = ?1",
        params![namespace],
    )?)
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .expect("prepare table list");
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .expect("query tables")
            .filter_map(|r| r.ok())
            .collect();
        names
    }

    #[test]
    fn test_migrations_create_schema() {
        let db = open_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();
        let tables = table_names(&conn);
        assert!(tables.contains(&"preferences".to_string()));
        assert!(tables.contains(&"schema_version".to_string()));

        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, CURRENT_SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let db = open_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();
        run_migrations(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, CURRENT_SCHEMA_VERSION as i64);
    }

    #[test]
    fn test_preference_upsert_and_namespace_isolation() {
        let db = open_in_memory().unwrap();
        let conn = db.conn.lock().unwrap();

        set_preference(&conn, "layout", "sidebar", "240").unwrap();
        set_preference(&conn, "layout", "sidebar", "300").unwrap();
        set_preference(&conn, "cards", "sidebar", "hidden").unwrap();

        assert_eq!(
            get_preference(&conn, "layout", "sidebar").unwrap().as_deref(),
            Some("300")
        );
        assert_eq!(
            get_preference(&conn, "cards", "sidebar").unwrap().as_deref(),
            Some("hidden")
        );

        assert_eq!(clear_namespace(&conn, "layout").unwrap(), 1);
        assert_eq!(get_preference(&conn, "layout", "sidebar").unwrap(), None);
        assert!(get_preference(&conn, "cards", "sidebar").unwrap().is_some());
    }

    #[test]
    fn test_init_creates_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let db = init(dir.path()).unwrap();
        assert!(db.db_path.exists());
        let conn = db.conn.lock().unwrap();
        delete_preference(&conn, "layout", "missing").unwrap();
    }
}
