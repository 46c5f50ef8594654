use rusqlite::{params, Connection, OptionalExtension};

use crate::db::DatabaseError;
use crate::models::VoiceNote;

/// Insert or overwrite voice-note metadata.
pub fn upsert_voice_note(conn: &Connection, note: &VoiceNote) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO voice_notes (id, visit_event_id, file_path, duration, transcription, synced)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            visit_event_id = excluded.visit_event_id,
            file_path = excluded.file_path,
            duration = excluded.duration,
            transcription = excluded.transcription,
            synced = excluded.synced",
        params![
            note.id,
            note.visit_record_id,
            note.file_path,
            note.duration_ms,
            note.transcription,
            note.synced as i32,
        ],
    )?;
    Ok(())
}

pub fn get_voice_note(conn: &Connection, id: &str) -> Result<Option<VoiceNote>, DatabaseError> {
    let note = conn
        .query_row(
            "SELECT id, visit_event_id, file_path, duration, transcription, synced
             FROM voice_notes WHERE id = ?1",
            params![id],
            voice_note_from_rusqlite,
        )
        .optional()?;
    Ok(note)
}

pub fn list_voice_notes_for_visit(
    conn: &Connection,
    visit_id: &str,
) -> Result<Vec<VoiceNote>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, visit_event_id, file_path, duration, transcription, synced
         FROM voice_notes WHERE visit_event_id = ?1 ORDER BY created_at ASC, rowid ASC",
    )?;
    let rows = stmt.query_map(params![visit_id], voice_note_from_rusqlite)?;
    rows.map(|r| r.map_err(DatabaseError::from)).collect()
}

/// Store the server's transcription for an uploaded note.
pub fn set_transcription(
    conn: &Connection,
    id: &str,
    transcription: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE voice_notes SET transcription = ?1 WHERE id = ?2",
        params![transcription, id],
    )?;
    Ok(())
}

/// Remove every note of a visit, returning the removed ids.
pub fn delete_voice_notes_for_visit(
    conn: &Connection,
    visit_id: &str,
) -> Result<Vec<String>, DatabaseError> {
    let ids: Vec<String> = list_voice_notes_for_visit(conn, visit_id)?
        .into_iter()
        .map(|n| n.id)
        .collect();
    conn.execute(
        "DELETE FROM voice_notes WHERE visit_event_id = ?1",
        params![visit_id],
    )?;
    Ok(ids)
}

fn voice_note_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<VoiceNote, rusqlite::Error> {
    Ok(VoiceNote {
        id: row.get(0)?,
        visit_record_id: row.get(1)?,
        file_path: row.get(2)?,
        duration_ms: row.get(3)?,
        transcription: row.get(4)?,
        synced: row.get::<_, i32>(5)? != 0,
    })
}
