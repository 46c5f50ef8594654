use std::str::FromStr;

use chrono::{NaiveDate, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::{format_timestamp, parse_optional_timestamp};
use crate::db::DatabaseError;
use crate::models::{VisitRecord, VisitStatus};

const VISIT_COLUMNS: &str = "id, hospital_id, hospital_name, visit_type, place, status,
    scheduled_start, scheduled_end, actual_start, actual_end, start_latitude, start_longitude,
    end_latitude, end_longitude, notes, is_cancelled, is_not_realized, synced, updated_at";

pub fn insert_visit(conn: &Connection, visit: &VisitRecord) -> Result<(), DatabaseError> {
    conn.execute(
        &format!(
            "INSERT INTO visit_events ({VISIT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
        ),
        params_from_iter(visit_params(visit)),
    )?;
    Ok(())
}

/// Insert a visit or overwrite every column of the existing row.
pub fn upsert_visit(conn: &Connection, visit: &VisitRecord) -> Result<(), DatabaseError> {
    conn.execute(
        &format!(
            "INSERT INTO visit_events ({VISIT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
             ON CONFLICT(id) DO UPDATE SET
                hospital_id = excluded.hospital_id,
                hospital_name = excluded.hospital_name,
                visit_type = excluded.visit_type,
                place = excluded.place,
                status = excluded.status,
                scheduled_start = excluded.scheduled_start,
                scheduled_end = excluded.scheduled_end,
                actual_start = excluded.actual_start,
                actual_end = excluded.actual_end,
                start_latitude = excluded.start_latitude,
                start_longitude = excluded.start_longitude,
                end_latitude = excluded.end_latitude,
                end_longitude = excluded.end_longitude,
                notes = excluded.notes,
                is_cancelled = excluded.is_cancelled,
                is_not_realized = excluded.is_not_realized,
                synced = excluded.synced,
                updated_at = excluded.updated_at"
        ),
        params_from_iter(visit_params(visit)),
    )?;
    Ok(())
}

/// Overwrite an existing visit. Fails with `NotFound` when the row is missing.
pub fn update_visit(conn: &Connection, visit: &VisitRecord) -> Result<(), DatabaseError> {
    let changed = conn.execute(
        "UPDATE visit_events SET
            hospital_id = ?2, hospital_name = ?3, visit_type = ?4, place = ?5, status = ?6,
            scheduled_start = ?7, scheduled_end = ?8, actual_start = ?9, actual_end = ?10,
            start_latitude = ?11, start_longitude = ?12, end_latitude = ?13, end_longitude = ?14,
            notes = ?15, is_cancelled = ?16, is_not_realized = ?17, synced = ?18, updated_at = ?19
         WHERE id = ?1",
        params_from_iter(visit_params(visit)),
    )?;
    if changed == 0 {
        return Err(DatabaseError::NotFound {
            entity_type: "visit".into(),
            id: visit.id.clone(),
        });
    }
    Ok(())
}

pub fn get_visit(conn: &Connection, id: &str) -> Result<Option<VisitRecord>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {VISIT_COLUMNS} FROM visit_events WHERE id = ?1"),
            params![id],
            visit_row_from_rusqlite,
        )
        .optional()?;
    row.map(visit_from_row).transpose()
}

/// All visits, newest scheduled start first.
pub fn list_visits(conn: &Connection) -> Result<Vec<VisitRecord>, DatabaseError> {
    query_visits(
        conn,
        &format!("SELECT {VISIT_COLUMNS} FROM visit_events ORDER BY scheduled_start DESC, id ASC"),
        &[],
    )
}

/// Visits scheduled to start on `day` (UTC), earliest first.
pub fn list_visits_on(conn: &Connection, day: NaiveDate) -> Result<Vec<VisitRecord>, DatabaseError> {
    let start = day.and_hms_opt(0, 0, 0).map(|d| d.and_utc());
    let end = day.succ_opt().and_then(|d| d.and_hms_opt(0, 0, 0)).map(|d| d.and_utc());
    let (Some(start), Some(end)) = (start, end) else {
        return Ok(Vec::new());
    };
    query_visits(
        conn,
        &format!(
            "SELECT {VISIT_COLUMNS} FROM visit_events
             WHERE scheduled_start >= ?1 AND scheduled_start < ?2
             ORDER BY scheduled_start ASC, id ASC"
        ),
        &[&format_timestamp(&start), &format_timestamp(&end)],
    )
}

pub fn list_visits_by_status(
    conn: &Connection,
    status: VisitStatus,
) -> Result<Vec<VisitRecord>, DatabaseError> {
    query_visits(
        conn,
        &format!(
            "SELECT {VISIT_COLUMNS} FROM visit_events WHERE status = ?1
             ORDER BY scheduled_start DESC, id ASC"
        ),
        &[&status.as_str()],
    )
}

/// Returns `true` if a row was removed.
pub fn delete_visit(conn: &Connection, id: &str) -> Result<bool, DatabaseError> {
    let removed = conn.execute("DELETE FROM visit_events WHERE id = ?1", params![id])?;
    Ok(removed > 0)
}

fn query_visits(
    conn: &Connection,
    sql: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<VisitRecord>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(args, visit_row_from_rusqlite)?;

    let mut visits = Vec::new();
    for row in rows {
        visits.push(visit_from_row(row?)?);
    }
    Ok(visits)
}

fn visit_params(visit: &VisitRecord) -> Vec<Box<dyn rusqlite::ToSql>> {
    vec![
        Box::new(visit.id.clone()),
        Box::new(visit.hospital_id.clone()),
        Box::new(visit.hospital_name.clone()),
        Box::new(visit.visit_type.clone()),
        Box::new(visit.place.clone()),
        Box::new(visit.status.as_str()),
        Box::new(visit.scheduled_start.as_ref().map(format_timestamp)),
        Box::new(visit.scheduled_end.as_ref().map(format_timestamp)),
        Box::new(visit.actual_start.as_ref().map(format_timestamp)),
        Box::new(visit.actual_end.as_ref().map(format_timestamp)),
        Box::new(visit.start_latitude),
        Box::new(visit.start_longitude),
        Box::new(visit.end_latitude),
        Box::new(visit.end_longitude),
        Box::new(visit.notes.clone()),
        Box::new(visit.is_cancelled as i32),
        Box::new(visit.is_not_realized as i32),
        Box::new(visit.synced as i32),
        Box::new(format_timestamp(&visit.updated_at)),
    ]
}

// Internal row type for VisitRecord mapping
struct VisitRow {
    id: String,
    hospital_id: Option<String>,
    hospital_name: Option<String>,
    visit_type: Option<String>,
    place: Option<String>,
    status: String,
    scheduled_start: Option<String>,
    scheduled_end: Option<String>,
    actual_start: Option<String>,
    actual_end: Option<String>,
    start_latitude: Option<f64>,
    start_longitude: Option<f64>,
    end_latitude: Option<f64>,
    end_longitude: Option<f64>,
    notes: Option<String>,
    is_cancelled: i32,
    is_not_realized: i32,
    synced: i32,
    updated_at: Option<String>,
}

fn visit_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<VisitRow, rusqlite::Error> {
    Ok(VisitRow {
        id: row.get(0)?,
        hospital_id: row.get(1)?,
        hospital_name: row.get(2)?,
        visit_type: row.get(3)?,
        place: row.get(4)?,
        status: row.get(5)?,
        scheduled_start: row.get(6)?,
        scheduled_end: row.get(7)?,
        actual_start: row.get(8)?,
        actual_end: row.get(9)?,
        start_latitude: row.get(10)?,
        start_longitude: row.get(11)?,
        end_latitude: row.get(12)?,
        end_longitude: row.get(13)?,
        notes: row.get(14)?,
        is_cancelled: row.get(15)?,
        is_not_realized: row.get(16)?,
        synced: row.get(17)?,
        updated_at: row.get(18)?,
    })
}

fn visit_from_row(row: VisitRow) -> Result<VisitRecord, DatabaseError> {
    Ok(VisitRecord {
        id: row.id,
        hospital_id: row.hospital_id,
        hospital_name: row.hospital_name,
        visit_type: row.visit_type,
        place: row.place,
        status: VisitStatus::from_str(&row.status)?,
        scheduled_start: parse_optional_timestamp("visit_events.scheduled_start", row.scheduled_start)?,
        scheduled_end: parse_optional_timestamp("visit_events.scheduled_end", row.scheduled_end)?,
        actual_start: parse_optional_timestamp("visit_events.actual_start", row.actual_start)?,
        actual_end: parse_optional_timestamp("visit_events.actual_end", row.actual_end)?,
        start_latitude: row.start_latitude,
        start_longitude: row.start_longitude,
        end_latitude: row.end_latitude,
        end_longitude: row.end_longitude,
        notes: row.notes,
        is_cancelled: row.is_cancelled != 0,
        is_not_realized: row.is_not_realized != 0,
        synced: row.synced != 0,
        updated_at: parse_optional_timestamp("visit_events.updated_at", row.updated_at)?
            .unwrap_or_else(Utc::now),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use crate::models::NewVisit;
    use chrono::TimeZone;

    fn visit_at(id: &str, day: u32, hour: u32) -> VisitRecord {
        VisitRecord::scheduled(
            id,
            NewVisit {
                hospital_id: Some("H1".into()),
                scheduled_start: Some(Utc.with_ymd_and_hms(2025, 6, day, hour, 0, 0).unwrap()),
                ..Default::default()
            },
        )
    }

    #[test]
    fn insert_and_retrieve() {
        let conn = open_memory_database().unwrap();
        let mut visit = visit_at("v-1", 10, 9);
        visit.start_latitude = Some(48.1486);
        visit.place = Some("2".into());
        insert_visit(&conn, &visit).unwrap();

        let loaded = get_visit(&conn, "v-1").unwrap().unwrap();
        assert_eq!(loaded.status, VisitStatus::Scheduled);
        assert_eq!(loaded.start_latitude, Some(48.1486));
        assert_eq!(loaded.place.as_deref(), Some("2"));
        assert_eq!(loaded.scheduled_start, visit.scheduled_start);
    }

    #[test]
    fn duplicate_insert_fails() {
        let conn = open_memory_database().unwrap();
        insert_visit(&conn, &visit_at("v-1", 10, 9)).unwrap();
        assert!(insert_visit(&conn, &visit_at("v-1", 10, 9)).is_err());
    }

    #[test]
    fn update_missing_visit_is_not_found() {
        let conn = open_memory_database().unwrap();
        let err = update_visit(&conn, &visit_at("ghost", 10, 9)).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
    }

    #[test]
    fn upsert_replaces_fields() {
        let conn = open_memory_database().unwrap();
        upsert_visit(&conn, &visit_at("v-1", 10, 9)).unwrap();

        let mut changed = visit_at("v-1", 10, 9);
        changed.status = VisitStatus::Completed;
        changed.notes = Some("done".into());
        changed.synced = true;
        upsert_visit(&conn, &changed).unwrap();

        let loaded = get_visit(&conn, "v-1").unwrap().unwrap();
        assert_eq!(loaded.status, VisitStatus::Completed);
        assert_eq!(loaded.notes.as_deref(), Some("done"));
        assert!(loaded.synced);
    }

    #[test]
    fn list_orders_newest_first() {
        let conn = open_memory_database().unwrap();
        insert_visit(&conn, &visit_at("early", 10, 9)).unwrap();
        insert_visit(&conn, &visit_at("late", 12, 9)).unwrap();
        insert_visit(&conn, &visit_at("mid", 11, 9)).unwrap();

        let ids: Vec<String> = list_visits(&conn).unwrap().into_iter().map(|v| v.id).collect();
        assert_eq!(ids, vec!["late", "mid", "early"]);
    }

    #[test]
    fn list_by_day_and_status() {
        let conn = open_memory_database().unwrap();
        insert_visit(&conn, &visit_at("a", 10, 14)).unwrap();
        insert_visit(&conn, &visit_at("b", 10, 8)).unwrap();
        insert_visit(&conn, &visit_at("c", 11, 8)).unwrap();
        let mut done = visit_at("d", 9, 8);
        done.status = VisitStatus::Completed;
        insert_visit(&conn, &done).unwrap();

        let day = NaiveDate::from_ymd_opt(2025, 6, 10).unwrap();
        let ids: Vec<String> = list_visits_on(&conn, day).unwrap().into_iter().map(|v| v.id).collect();
        assert_eq!(ids, vec!["b", "a"]);

        let completed = list_visits_by_status(&conn, VisitStatus::Completed).unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, "d");
    }

    #[test]
    fn unknown_status_is_rejected_on_read() {
        let conn = open_memory_database().unwrap();
        conn.execute(
            "INSERT INTO visit_events (id, status) VALUES ('bad', 'paused')",
            [],
        )
        .unwrap();
        let err = get_visit(&conn, "bad").unwrap_err();
        assert!(matches!(err, DatabaseError::InvalidEnum { .. }));
    }

    #[test]
    fn delete_reports_removal() {
        let conn = open_memory_database().unwrap();
        insert_visit(&conn, &visit_at("v-1", 10, 9)).unwrap();
        assert!(delete_visit(&conn, "v-1").unwrap());
        assert!(!delete_visit(&conn, "v-1").unwrap());
    }
}
