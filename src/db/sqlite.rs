use std::path::Path;

use rusqlite::{params, Connection};

use super::DatabaseError;

const BASE_SCHEMA: &str = include_str!("../../resources/schema/local_store.sql");

/// Columns added after the first schema shipped: (table, column, declaration).
const ADDITIVE_COLUMNS: &[(&str, &str, &str)] = &[
    ("visit_events", "place", "TEXT"),
    ("visit_events", "is_cancelled", "INTEGER NOT NULL DEFAULT 0"),
    ("visit_events", "is_not_realized", "INTEGER NOT NULL DEFAULT 0"),
];

/// Open a SQLite connection to the given path and ensure the schema
pub fn open_database(path: &Path) -> Result<Connection, DatabaseError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    configure_pragmas(&conn)?;
    ensure_schema(&conn)?;
    Ok(conn)
}

/// Open an in-memory database (for testing)
pub fn open_memory_database() -> Result<Connection, DatabaseError> {
    let conn = Connection::open_in_memory()?;
    configure_pragmas(&conn)?;
    ensure_schema(&conn)?;
    Ok(conn)
}

fn configure_pragmas(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "PRAGMA journal_mode=DELETE;
         PRAGMA synchronous=FULL;
         PRAGMA busy_timeout=5000;",
    )?;
    Ok(())
}

/// Create missing tables, indexes and additive columns.
///
/// Safe to call on every start, on a fresh file or on one written by any
/// earlier app version; there is no migration ledger.
pub fn ensure_schema(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(BASE_SCHEMA)
        .map_err(|e| DatabaseError::MigrationFailed {
            step: "base schema".into(),
            reason: e.to_string(),
        })?;

    for (table, column, declaration) in ADDITIVE_COLUMNS {
        if ensure_column(conn, table, column, declaration)? {
            tracing::info!(table, column, "Added column to local store");
        }
    }

    Ok(())
}

/// Add `column` to `table` unless it already exists. Returns whether it was added.
pub fn ensure_column(
    conn: &Connection,
    table: &str,
    column: &str,
    declaration: &str,
) -> Result<bool, DatabaseError> {
    if column_exists(conn, table, column)? {
        return Ok(false);
    }

    conn.execute_batch(&format!("ALTER TABLE {table} ADD COLUMN {column} {declaration}"))
        .map_err(|e| DatabaseError::MigrationFailed {
            step: format!("{table}.{column}"),
            reason: e.to_string(),
        })?;
    Ok(true)
}

/// Whether `table` has a column named `column`.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_table_info(?1) WHERE name = ?2",
        params![table, column],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
