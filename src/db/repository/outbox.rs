use std::collections::HashSet;
use std::str::FromStr;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{format_timestamp, parse_timestamp, set_synced};
use crate::db::DatabaseError;
use crate::models::{EntityType, OutboxAction, OutboxEntry, OutboxPayload};

const ENTRY_COLUMNS: &str = "id, entity_type, entity_id, action, payload, retry_count, created_at";

/// Persist a mutation intent and flag its entity as unsynced.
///
/// Rejects unsupported entity/action pairs and payloads that describe a
/// different entity than the row. Returns the new entry id.
pub fn insert_entry(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
    action: OutboxAction,
    payload: &OutboxPayload,
) -> Result<i64, DatabaseError> {
    if !entity_type.supports(action) {
        return Err(DatabaseError::ConstraintViolation(format!(
            "{entity_type}/{action} is not a supported outbox operation"
        )));
    }
    payload
        .check(entity_type, entity_id, action)
        .map_err(DatabaseError::ConstraintViolation)?;

    let raw = serde_json::to_string(payload)?;
    conn.execute(
        "INSERT INTO sync_queue (entity_type, entity_id, action, payload, retry_count, created_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5)",
        params![
            entity_type.as_str(),
            entity_id,
            action.as_str(),
            raw,
            format_timestamp(&Utc::now()),
        ],
    )?;
    let id = conn.last_insert_rowid();
    set_synced(conn, entity_type, entity_id, false)?;
    Ok(id)
}

/// [`insert_entry`] with the entity taken from the payload itself.
pub fn enqueue_payload(
    conn: &Connection,
    payload: &OutboxPayload,
    action: OutboxAction,
) -> Result<i64, DatabaseError> {
    insert_entry(conn, payload.entity_type(), payload.entity_id(), action, payload)
}

/// Oldest entries first, ties broken by id.
pub fn list_pending(conn: &Connection, limit: usize) -> Result<Vec<OutboxEntry>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ENTRY_COLUMNS} FROM sync_queue ORDER BY created_at ASC, id ASC LIMIT ?1"
    ))?;
    let limit = i64::try_from(limit).unwrap_or(i64::MAX);
    let rows = stmt.query_map(params![limit], entry_row_from_rusqlite)?;

    let mut entries = Vec::new();
    for row in rows {
        entries.push(entry_from_row(row?)?);
    }
    Ok(entries)
}

pub fn get_entry(conn: &Connection, id: i64) -> Result<Option<OutboxEntry>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {ENTRY_COLUMNS} FROM sync_queue WHERE id = ?1"),
            params![id],
            entry_row_from_rusqlite,
        )
        .optional()?;
    row.map(entry_from_row).transpose()
}

pub fn count_pending(conn: &Connection) -> Result<u64, DatabaseError> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

/// Increment the retry counter and return its new value.
pub fn record_failure(conn: &Connection, id: i64) -> Result<u32, DatabaseError> {
    let retry_count: Option<u32> = conn
        .query_row(
            "UPDATE sync_queue SET retry_count = retry_count + 1 WHERE id = ?1
             RETURNING retry_count",
            params![id],
            |row| row.get(0),
        )
        .optional()?;
    retry_count.ok_or_else(|| DatabaseError::NotFound {
        entity_type: "outbox entry".into(),
        id: id.to_string(),
    })
}

/// Put an entry back to a fresh retry budget.
pub fn reset_retries(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    conn.execute("UPDATE sync_queue SET retry_count = 0 WHERE id = ?1", params![id])?;
    Ok(())
}

/// Returns `true` if the entry existed.
pub fn remove_entry(conn: &Connection, id: i64) -> Result<bool, DatabaseError> {
    let removed = conn.execute("DELETE FROM sync_queue WHERE id = ?1", params![id])?;
    Ok(removed > 0)
}

/// Remove every entry for one entity. Returns how many were removed.
pub fn remove_entries_for(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
) -> Result<usize, DatabaseError> {
    let removed = conn.execute(
        "DELETE FROM sync_queue WHERE entity_type = ?1 AND entity_id = ?2",
        params![entity_type.as_str(), entity_id],
    )?;
    Ok(removed)
}

pub fn has_pending(
    conn: &Connection,
    entity_type: EntityType,
    entity_id: &str,
) -> Result<bool, DatabaseError> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM sync_queue WHERE entity_type = ?1 AND entity_id = ?2)",
        params![entity_type.as_str(), entity_id],
        |row| row.get(0),
    )?;
    Ok(exists != 0)
}

/// Ids of all entities of one type that still have queued entries.
pub fn pending_entity_ids(
    conn: &Connection,
    entity_type: EntityType,
) -> Result<HashSet<String>, DatabaseError> {
    let mut stmt =
        conn.prepare("SELECT DISTINCT entity_id FROM sync_queue WHERE entity_type = ?1")?;
    let rows = stmt.query_map(params![entity_type.as_str()], |row| row.get::<_, String>(0))?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

/// Remove a delivered entry and, if it was the entity's last one, mark the entity synced.
///
/// Returns `false` when the entry was already gone; nothing else changes then.
pub fn confirm_entry(conn: &Connection, entry: &OutboxEntry) -> Result<bool, DatabaseError> {
    if !remove_entry(conn, entry.id)? {
        return Ok(false);
    }
    if !has_pending(conn, entry.entity_type, &entry.entity_id)? {
        set_synced(conn, entry.entity_type, &entry.entity_id, true)?;
    }
    Ok(true)
}

// Internal row type for OutboxEntry mapping
struct EntryRow {
    id: i64,
    entity_type: String,
    entity_id: String,
    action: String,
    payload: String,
    retry_count: i64,
    created_at: String,
}

fn entry_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<EntryRow, rusqlite::Error> {
    Ok(EntryRow {
        id: row.get(0)?,
        entity_type: row.get(1)?,
        entity_id: row.get(2)?,
        action: row.get(3)?,
        payload: row.get(4)?,
        retry_count: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn entry_from_row(row: EntryRow) -> Result<OutboxEntry, DatabaseError> {
    Ok(OutboxEntry {
        id: row.id,
        entity_type: EntityType::from_str(&row.entity_type)?,
        entity_id: row.entity_id,
        action: OutboxAction::from_str(&row.action)?,
        payload: row.payload,
        retry_count: u32::try_from(row.retry_count).unwrap_or(0),
        created_at: parse_timestamp("sync_queue.created_at", &row.created_at)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::{get_visit, insert_visit, upsert_hospital, get_hospital};
    use crate::db::sqlite::open_memory_database;
    use crate::models::*;

    fn visit_payload(id: &str) -> OutboxPayload {
        let visit = VisitRecord::scheduled(id, NewVisit::default());
        OutboxPayload::Visit(VisitPayload::from(&visit))
    }

    #[test]
    fn enqueue_marks_entity_unsynced() {
        let conn = open_memory_database().unwrap();
        let mut visit = VisitRecord::scheduled("v-1", NewVisit::default());
        visit.synced = true;
        insert_visit(&conn, &visit).unwrap();

        let id = enqueue_payload(&conn, &visit_payload("v-1"), OutboxAction::Update).unwrap();
        assert!(id > 0);
        assert!(!get_visit(&conn, "v-1").unwrap().unwrap().synced);
        assert_eq!(count_pending(&conn).unwrap(), 1);
    }

    #[test]
    fn unsupported_pair_is_rejected() {
        let conn = open_memory_database().unwrap();
        let hospital = CachedHospital::new("H1", "Central");
        let payload = OutboxPayload::Hospital(HospitalPayload::from(&hospital));
        let err = insert_entry(&conn, EntityType::Hospital, "H1", OutboxAction::Delete, &payload)
            .unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));
        assert_eq!(count_pending(&conn).unwrap(), 0);
    }

    #[test]
    fn mismatched_payload_is_rejected() {
        let conn = open_memory_database().unwrap();
        let err = insert_entry(
            &conn,
            EntityType::Visit,
            "other",
            OutboxAction::Update,
            &visit_payload("v-1"),
        )
        .unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));
    }

    #[test]
    fn pending_is_fifo_and_bounded() {
        let conn = open_memory_database().unwrap();
        for i in 0..5 {
            enqueue_payload(&conn, &visit_payload(&format!("v-{i}")), OutboxAction::Create)
                .unwrap();
        }
        let ids: Vec<String> = list_pending(&conn, 3)
            .unwrap()
            .into_iter()
            .map(|e| e.entity_id)
            .collect();
        assert_eq!(ids, vec!["v-0", "v-1", "v-2"]);
    }

    #[test]
    fn equal_timestamps_fall_back_to_id_order() {
        let conn = open_memory_database().unwrap();
        let a = enqueue_payload(&conn, &visit_payload("a"), OutboxAction::Create).unwrap();
        let b = enqueue_payload(&conn, &visit_payload("b"), OutboxAction::Create).unwrap();
        conn.execute(
            "UPDATE sync_queue SET created_at = '2025-01-01T00:00:00.000Z'",
            [],
        )
        .unwrap();
        let order: Vec<i64> = list_pending(&conn, 50).unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(order, vec![a, b]);
    }

    #[test]
    fn record_failure_increments() {
        let conn = open_memory_database().unwrap();
        let id = enqueue_payload(&conn, &visit_payload("v-1"), OutboxAction::Create).unwrap();
        assert_eq!(record_failure(&conn, id).unwrap(), 1);
        assert_eq!(record_failure(&conn, id).unwrap(), 2);
        assert_eq!(get_entry(&conn, id).unwrap().unwrap().retry_count, 2);
        assert!(matches!(
            record_failure(&conn, 9999),
            Err(DatabaseError::NotFound { .. })
        ));
    }

    #[test]
    fn confirm_waits_for_last_entry_of_entity() {
        let conn = open_memory_database().unwrap();
        let hospital = CachedHospital::new("H1", "Central");
        upsert_hospital(&conn, &hospital).unwrap();
        let payload = OutboxPayload::Hospital(HospitalPayload::from(&hospital));
        enqueue_payload(&conn, &payload, OutboxAction::Create).unwrap();
        enqueue_payload(&conn, &payload, OutboxAction::Update).unwrap();

        let pending = list_pending(&conn, 50).unwrap();
        assert!(confirm_entry(&conn, &pending[0]).unwrap());
        assert!(!get_hospital(&conn, "H1").unwrap().unwrap().synced);

        assert!(confirm_entry(&conn, &pending[1]).unwrap());
        assert!(get_hospital(&conn, "H1").unwrap().unwrap().synced);

        // Already confirmed
        assert!(!confirm_entry(&conn, &pending[1]).unwrap());
    }

    #[test]
    fn pending_ids_and_removal_by_entity() {
        let conn = open_memory_database().unwrap();
        enqueue_payload(&conn, &visit_payload("v-1"), OutboxAction::Create).unwrap();
        enqueue_payload(&conn, &visit_payload("v-1"), OutboxAction::Update).unwrap();
        enqueue_payload(&conn, &visit_payload("v-2"), OutboxAction::Create).unwrap();

        let ids = pending_entity_ids(&conn, EntityType::Visit).unwrap();
        assert_eq!(ids.len(), 2);
        assert!(has_pending(&conn, EntityType::Visit, "v-1").unwrap());
        assert!(!has_pending(&conn, EntityType::Hospital, "v-1").unwrap());

        assert_eq!(remove_entries_for(&conn, EntityType::Visit, "v-1").unwrap(), 2);
        assert_eq!(count_pending(&conn).unwrap(), 1);
    }

    #[test]
    fn corrupt_entity_type_surfaces_invalid_enum() {
        let conn = open_memory_database().unwrap();
        conn.execute(
            "INSERT INTO sync_queue (entity_type, entity_id, action, payload, created_at)
             VALUES ('patient', 'x', 'create', '{}', '2025-01-01T00:00:00.000Z')",
            [],
        )
        .unwrap();
        assert!(matches!(
            list_pending(&conn, 50),
            Err(DatabaseError::InvalidEnum { .. })
        ));
    }
}
