use rusqlite::{params, Connection};

use super::{format_timestamp, parse_timestamp};
use crate::db::DatabaseError;
use crate::models::{GpsFix, GpsSample};

/// Store one fix for a visit. Returns the sample id.
pub fn insert_gps_sample(
    conn: &Connection,
    visit_id: &str,
    fix: &GpsFix,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO gps_tracks (visit_event_id, latitude, longitude, accuracy, timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            visit_id,
            fix.latitude,
            fix.longitude,
            fix.accuracy,
            format_timestamp(&fix.timestamp),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Samples of a visit in capture order.
pub fn list_gps_samples(conn: &Connection, visit_id: &str) -> Result<Vec<GpsSample>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, visit_event_id, latitude, longitude, accuracy, timestamp
         FROM gps_tracks WHERE visit_event_id = ?1 ORDER BY id ASC",
    )?;
    let rows = stmt.query_map(params![visit_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, f64>(2)?,
            row.get::<_, f64>(3)?,
            row.get::<_, Option<f64>>(4)?,
            row.get::<_, String>(5)?,
        ))
    })?;

    let mut samples = Vec::new();
    for row in rows {
        let (id, visit_record_id, latitude, longitude, accuracy, timestamp) = row?;
        samples.push(GpsSample {
            id,
            visit_record_id,
            latitude,
            longitude,
            accuracy: accuracy.unwrap_or(0.0),
            timestamp: parse_timestamp("gps_tracks.timestamp", &timestamp)?,
        });
    }
    Ok(samples)
}

/// Delete the samples of a visit with `id <= up_to_id`. Returns how many were removed.
pub fn delete_gps_samples_up_to(
    conn: &Connection,
    visit_id: &str,
    up_to_id: i64,
) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM gps_tracks WHERE visit_event_id = ?1 AND id <= ?2",
        params![visit_id, up_to_id],
    )?;
    Ok(removed)
}

pub fn delete_gps_samples_for_visit(conn: &Connection, visit_id: &str) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM gps_tracks WHERE visit_event_id = ?1",
        params![visit_id],
    )?;
    Ok(removed)
}

pub fn count_gps_samples(conn: &Connection, visit_id: &str) -> Result<u64, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM gps_tracks WHERE visit_event_id = ?1",
        params![visit_id],
        |row| row.get(0),
    )?;
    Ok(count.max(0) as u64)
}
