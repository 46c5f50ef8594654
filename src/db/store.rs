//! `LocalStore`: the single owner of the on-device database.
//!
//! Wraps one SQLite connection behind a `std::sync::Mutex`. Every public
//! method locks, runs to completion and releases, so callers on async tasks
//! never hold the lock across an `.await`.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use chrono::NaiveDate;
use rusqlite::{Connection, Transaction};

use super::repository as repo;
use super::sqlite::{ensure_schema, open_database, open_memory_database};
use super::DatabaseError;
use crate::models::{
    CachedHospital, EntityType, GpsFix, GpsSample, OutboxAction, OutboxEntry, OutboxPayload,
    VisitRecord, VisitStatus, VoiceNote,
};

/// Result of writing one pulled list into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PullApplied {
    pub applied: usize,
    /// Left untouched because local mutations are still queued for them.
    pub skipped_pending: usize,
}

pub struct LocalStore {
    conn: Mutex<Option<Connection>>,
    path: Option<PathBuf>,
}

impl LocalStore {
    /// Open (or create) the store at `path` and bring its schema up to date.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        let conn = open_database(path)?;
        tracing::info!(path = %path.display(), "Local store opened");
        Ok(Self {
            conn: Mutex::new(Some(conn)),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self {
            conn: Mutex::new(Some(open_memory_database()?)),
            path: None,
        })
    }

    /// File backing the store; `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_open(&self) -> bool {
        self.lock().map(|guard| guard.is_some()).unwrap_or(false)
    }

    /// Close the connection. Later calls fail with [`DatabaseError::Closed`].
    pub fn close(&self) -> Result<(), DatabaseError> {
        let mut guard = self.lock()?;
        match guard.take() {
            Some(conn) => {
                conn.close().map_err(|(_, e)| DatabaseError::Sqlite(e))?;
                tracing::info!("Local store closed");
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Re-run idempotent schema creation.
    pub fn ensure_schema(&self) -> Result<(), DatabaseError> {
        self.with_conn(ensure_schema)
    }

    /// Run `f` against the open connection.
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let guard = self.lock()?;
        let conn = guard.as_ref().ok_or(DatabaseError::Closed)?;
        f(conn)
    }

    /// Run `f` inside one transaction: committed if it returns `Ok`, rolled back otherwise.
    pub(crate) fn transaction<T, E>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, E>,
    ) -> Result<T, E>
    where
        E: From<DatabaseError>,
    {
        let mut guard = self.lock()?;
        let conn = guard.as_mut().ok_or(DatabaseError::Closed)?;
        let tx = conn.transaction().map_err(DatabaseError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(DatabaseError::from)?;
        Ok(value)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Option<Connection>>, DatabaseError> {
        self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)
    }

    // ── Hospitals ────────────────────────────────────────────────────────────

    pub fn upsert_hospital(&self, hospital: &CachedHospital) -> Result<(), DatabaseError> {
        self.with_conn(|conn| repo::upsert_hospital(conn, hospital))
    }

    pub fn get_hospital(&self, id: &str) -> Result<Option<CachedHospital>, DatabaseError> {
        self.with_conn(|conn| repo::get_hospital(conn, id))
    }

    pub fn list_hospitals(&self) -> Result<Vec<CachedHospital>, DatabaseError> {
        self.with_conn(repo::list_hospitals)
    }

    // ── Visits ───────────────────────────────────────────────────────────────

    pub fn upsert_visit(&self, visit: &VisitRecord) -> Result<(), DatabaseError> {
        self.with_conn(|conn| repo::upsert_visit(conn, visit))
    }

    pub fn get_visit(&self, id: &str) -> Result<Option<VisitRecord>, DatabaseError> {
        self.with_conn(|conn| repo::get_visit(conn, id))
    }

    pub fn list_visits(&self) -> Result<Vec<VisitRecord>, DatabaseError> {
        self.with_conn(repo::list_visits)
    }

    pub fn list_visits_on(&self, day: NaiveDate) -> Result<Vec<VisitRecord>, DatabaseError> {
        self.with_conn(|conn| repo::list_visits_on(conn, day))
    }

    pub fn list_visits_by_status(&self, status: VisitStatus) -> Result<Vec<VisitRecord>, DatabaseError> {
        self.with_conn(|conn| repo::list_visits_by_status(conn, status))
    }

    // ── Voice notes ──────────────────────────────────────────────────────────

    pub fn upsert_voice_note(&self, note: &VoiceNote) -> Result<(), DatabaseError> {
        self.with_conn(|conn| repo::upsert_voice_note(conn, note))
    }

    pub fn get_voice_note(&self, id: &str) -> Result<Option<VoiceNote>, DatabaseError> {
        self.with_conn(|conn| repo::get_voice_note(conn, id))
    }

    pub fn list_voice_notes(&self, visit_id: &str) -> Result<Vec<VoiceNote>, DatabaseError> {
        self.with_conn(|conn| repo::list_voice_notes_for_visit(conn, visit_id))
    }

    pub fn set_transcription(&self, note_id: &str, transcription: &str) -> Result<(), DatabaseError> {
        self.with_conn(|conn| repo::set_transcription(conn, note_id, transcription))
    }

    // ── GPS samples ──────────────────────────────────────────────────────────

    /// Append a fix for an `in_progress` visit and make sure one `gps_track`
    /// upload is queued for it, in one transaction.
    pub fn append_gps_sample(&self, visit_id: &str, fix: &GpsFix) -> Result<i64, DatabaseError> {
        self.transaction(|tx| {
            let visit = repo::get_visit(tx, visit_id)?.ok_or_else(|| DatabaseError::NotFound {
                entity_type: "visit".into(),
                id: visit_id.into(),
            })?;
            if visit.status != VisitStatus::InProgress {
                return Err(DatabaseError::ConstraintViolation(format!(
                    "GPS samples need an in_progress visit, {visit_id} is {}",
                    visit.status
                )));
            }

            let sample_id = repo::insert_gps_sample(tx, visit_id, fix)?;
            if !repo::has_pending(tx, EntityType::GpsTrack, visit_id)? {
                repo::enqueue_payload(
                    tx,
                    &OutboxPayload::GpsBatch {
                        visit_id: visit_id.into(),
                    },
                    OutboxAction::Create,
                )?;
            }
            Ok(sample_id)
        })
    }

    pub fn list_gps_samples(&self, visit_id: &str) -> Result<Vec<GpsSample>, DatabaseError> {
        self.with_conn(|conn| repo::list_gps_samples(conn, visit_id))
    }

    pub fn delete_gps_samples_up_to(&self, visit_id: &str, up_to_id: i64) -> Result<usize, DatabaseError> {
        self.with_conn(|conn| repo::delete_gps_samples_up_to(conn, visit_id, up_to_id))
    }

    /// After a confirmed batch upload: drop the uploaded samples and settle the
    /// queue entry. Samples captured during the upload keep the entry alive
    /// with a fresh retry budget. Returns how many samples remain.
    pub fn finish_gps_flush(&self, entry: &OutboxEntry, up_to_id: Option<i64>) -> Result<u64, DatabaseError> {
        self.transaction(|tx| {
            let visit_id = &entry.entity_id;
            if let Some(up_to_id) = up_to_id {
                repo::delete_gps_samples_up_to(tx, visit_id, up_to_id)?;
            }
            let remaining = repo::count_gps_samples(tx, visit_id)?;
            if remaining == 0 {
                repo::confirm_entry(tx, entry)?;
            } else {
                repo::reset_retries(tx, entry.id)?;
            }
            Ok(remaining)
        })
    }

    // ── Outbox ───────────────────────────────────────────────────────────────

    pub fn enqueue(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        action: OutboxAction,
        payload: &OutboxPayload,
    ) -> Result<i64, DatabaseError> {
        self.transaction(|tx| repo::insert_entry(tx, entity_type, entity_id, action, payload))
    }

    /// Up to `limit` entries, oldest first.
    pub fn pending_entries(&self, limit: usize) -> Result<Vec<OutboxEntry>, DatabaseError> {
        self.with_conn(|conn| repo::list_pending(conn, limit))
    }

    pub fn pending_count(&self) -> Result<u64, DatabaseError> {
        self.with_conn(repo::count_pending)
    }

    pub fn get_entry(&self, id: i64) -> Result<Option<OutboxEntry>, DatabaseError> {
        self.with_conn(|conn| repo::get_entry(conn, id))
    }

    /// Increment the entry's retry counter; returns the new count.
    pub fn record_failure(&self, entry_id: i64) -> Result<u32, DatabaseError> {
        self.with_conn(|conn| repo::record_failure(conn, entry_id))
    }

    pub fn remove_entry(&self, entry_id: i64) -> Result<bool, DatabaseError> {
        self.with_conn(|conn| repo::remove_entry(conn, entry_id))
    }

    /// Abandon an entry whose retry budget is spent. Dropping a `gps_track`
    /// entry discards the visit's samples with it, since nothing else would
    /// ever upload them. Returns how many samples were discarded.
    pub fn drop_entry(&self, entry: &OutboxEntry) -> Result<usize, DatabaseError> {
        self.transaction(|tx| {
            repo::remove_entry(tx, entry.id)?;
            if entry.entity_type == EntityType::GpsTrack {
                return repo::delete_gps_samples_for_visit(tx, &entry.entity_id);
            }
            Ok(0)
        })
    }

    /// Remove a delivered entry and mark its entity synced, atomically.
    pub fn confirm_entry(&self, entry: &OutboxEntry) -> Result<bool, DatabaseError> {
        self.transaction(|tx| repo::confirm_entry(tx, entry))
    }

    pub fn has_pending(&self, entity_type: EntityType, entity_id: &str) -> Result<bool, DatabaseError> {
        self.with_conn(|conn| repo::has_pending(conn, entity_type, entity_id))
    }

    pub fn mark_synced(&self, entity_type: EntityType, entity_id: &str) -> Result<(), DatabaseError> {
        self.with_conn(|conn| repo::set_synced(conn, entity_type, entity_id, true))
    }

    // ── Pull ─────────────────────────────────────────────────────────────────

    /// Overwrite cached hospitals with server state, skipping any with queued mutations.
    pub fn apply_pulled_hospitals(&self, hospitals: &[CachedHospital]) -> Result<PullApplied, DatabaseError> {
        self.transaction(|tx| {
            let pending = repo::pending_entity_ids(tx, EntityType::Hospital)?;
            let mut outcome = PullApplied::default();
            for hospital in hospitals {
                if pending.contains(&hospital.id) {
                    outcome.skipped_pending += 1;
                    continue;
                }
                let mut row = hospital.clone();
                row.synced = true;
                repo::upsert_hospital(tx, &row)?;
                outcome.applied += 1;
            }
            Ok(outcome)
        })
    }

    /// Overwrite visits with server state, skipping any with queued mutations.
    pub fn apply_pulled_visits(&self, visits: &[VisitRecord]) -> Result<PullApplied, DatabaseError> {
        self.transaction(|tx| {
            let pending = repo::pending_entity_ids(tx, EntityType::Visit)?;
            let mut outcome = PullApplied::default();
            for visit in visits {
                if pending.contains(&visit.id) {
                    outcome.skipped_pending += 1;
                    continue;
                }
                let mut row = visit.clone();
                row.synced = true;
                repo::upsert_visit(tx, &row)?;
                outcome.applied += 1;
            }
            Ok(outcome)
        })
    }

    /// Factory reset: delete every row of every table.
    pub fn clear_all(&self) -> Result<(), DatabaseError> {
        self.transaction(|tx| repo::clear_all(tx))?;
        tracing::warn!("Local store cleared");
        Ok(())
    }
}
