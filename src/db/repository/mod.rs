//! Repository layer: table-scoped database operations.
//!
//! Free functions over `&Connection` so they compose inside a
//! `rusqlite::Transaction` as well as on a bare connection.

mod gps;
mod hospital;
mod outbox;
mod visit;
mod voice_note;

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::{params, Connection};

use super::DatabaseError;
use crate::models::EntityType;

pub use gps::*;
pub use hospital::*;
pub use outbox::*;
pub use visit::*;
pub use voice_note::*;

/// Timestamps are written as RFC 3339 with millisecond precision.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Parse a stored timestamp. Accepts RFC 3339 and SQLite's `CURRENT_TIMESTAMP` form.
pub fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .map_err(|_| DatabaseError::InvalidTimestamp {
            field: field.into(),
            value: value.into(),
        })
}

pub(crate) fn parse_optional_timestamp(
    field: &str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| parse_timestamp(field, &v))
        .transpose()
}

/// Set the `synced` flag of an entity. GPS batches carry no flag and are a no-op.
pub fn set_synced(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
    synced: bool,
) -> Result<(), DatabaseError> {
    let Some(table) = entity_type.synced_table() else {
        return Ok(());
    };
    conn.execute(
        &format!("UPDATE {table} SET synced = ?1 WHERE id = ?2"),
        params![synced as i32, entity_id],
    )?;
    Ok(())
}

/// Remove every row from every table (factory reset).
pub fn clear_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "DELETE FROM gps_tracks;
         DELETE FROM voice_notes;
         DELETE FROM sync_queue;
         DELETE FROM visit_events;
         DELETE FROM hospitals;",
    )?;
    Ok(())
}
