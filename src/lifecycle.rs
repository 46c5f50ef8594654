//! Visit lifecycle controller.
//!
//! ```text
//! scheduled   --start(coords)-->  in_progress
//! in_progress --end(coords)-->    completed
//! scheduled   --cancel-->         cancelled
//! in_progress --cancel-->         cancelled
//! scheduled   --not realized-->   not_realized
//! in_progress --not realized-->   not_realized
//! ```
//!
//! Every mutation writes the visit and enqueues the matching outbox entry in
//! one transaction, then refreshes the pending count of the status store.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::db::repository as repo;
use crate::db::{DatabaseError, LocalStore};
use crate::gps::GpsTraceBuffer;
use crate::models::{
    valid_coordinates, EntityType, NewVisit, OutboxAction, OutboxPayload, VisitChanges,
    VisitPayload, VisitRecord, VisitStatus, VoiceNote, VoiceNoteUpload,
};
use crate::sync::SyncStatusStore;

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Visit not found: {0}")]
    NotFound(String),

    #[error("Visit {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: VisitStatus,
        to: VisitStatus,
    },

    #[error("Visit {id} is {status} and can no longer be edited")]
    Finished { id: String, status: VisitStatus },

    #[error("Invalid coordinates: {latitude}, {longitude}")]
    InvalidCoordinates { latitude: f64, longitude: f64 },
}

/// Position captured when a visit starts or ends.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl Coordinates {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self { latitude, longitude }
    }

    fn validate(&self) -> Result<(), LifecycleError> {
        if valid_coordinates(self.latitude, self.longitude) {
            Ok(())
        } else {
            Err(LifecycleError::InvalidCoordinates {
                latitude: self.latitude,
                longitude: self.longitude,
            })
        }
    }
}

pub struct VisitLifecycle {
    store: Arc<LocalStore>,
    status: SyncStatusStore,
    tracker: Option<Arc<GpsTraceBuffer>>,
}

impl VisitLifecycle {
    pub fn new(store: Arc<LocalStore>, status: SyncStatusStore) -> Self {
        Self {
            store,
            status,
            tracker: None,
        }
    }

    /// Start and stop GPS tracking along with the visit.
    pub fn with_tracker(mut self, tracker: Arc<GpsTraceBuffer>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    /// Create a visit on the device with a client-generated id.
    pub fn create_visit(&self, input: NewVisit) -> Result<VisitRecord, LifecycleError> {
        let visit = VisitRecord::scheduled(Uuid::new_v4().to_string(), input);
        self.store.transaction(|tx| {
            repo::insert_visit(tx, &visit)?;
            repo::enqueue_payload(tx, &OutboxPayload::Visit(VisitPayload::from(&visit)), OutboxAction::Create)?;
            Ok::<_, LifecycleError>(())
        })?;
        tracing::info!(visit_id = %visit.id, "Visit created");
        self.refresh_pending_count();
        Ok(visit)
    }

    /// Edit schedule, notes, place, type or hospital of a visit that is not finished.
    /// An edit that changes nothing is not queued.
    pub fn update_visit(&self, id: &str, changes: VisitChanges) -> Result<VisitRecord, LifecycleError> {
        let visit = self.store.transaction(|tx| {
            let mut visit = load(tx, id)?;
            if visit.status.is_terminal() {
                return Err(LifecycleError::Finished {
                    id: id.into(),
                    status: visit.status,
                });
            }
            if !visit.apply(changes) {
                return Ok(visit);
            }
            visit.updated_at = Utc::now();
            save_and_enqueue(tx, &mut visit)?;
            Ok(visit)
        })?;
        self.refresh_pending_count();
        Ok(visit)
    }

    /// `scheduled -> in_progress`. Records the start time and position and
    /// begins GPS tracking.
    pub fn start_visit(&self, id: &str, at: Coordinates) -> Result<VisitRecord, LifecycleError> {
        at.validate()?;
        let visit = self.transition(id, VisitStatus::InProgress, |v| {
            v.actual_start = Some(Utc::now());
            v.start_latitude = Some(at.latitude);
            v.start_longitude = Some(at.longitude);
        })?;
        if let Some(tracker) = &self.tracker {
            if let Err(e) = tracker.start(id) {
                tracing::warn!(visit_id = id, error = %e, "Could not start GPS tracking");
            }
        }
        Ok(visit)
    }

    /// `in_progress -> completed`. Records the end time and position.
    pub fn end_visit(&self, id: &str, at: Coordinates) -> Result<VisitRecord, LifecycleError> {
        at.validate()?;
        self.transition(id, VisitStatus::Completed, |v| {
            v.actual_end = Some(Utc::now());
            v.end_latitude = Some(at.latitude);
            v.end_longitude = Some(at.longitude);
        })
    }

    pub fn cancel_visit(&self, id: &str) -> Result<VisitRecord, LifecycleError> {
        self.transition(id, VisitStatus::Cancelled, |v| v.is_cancelled = true)
    }

    pub fn mark_not_realized(&self, id: &str) -> Result<VisitRecord, LifecycleError> {
        self.transition(id, VisitStatus::NotRealized, |v| v.is_not_realized = true)
    }

    /// Remove a visit with its voice notes and GPS samples and queue the
    /// server-side delete. Queued uploads of the removed notes and samples
    /// are discarded; earlier visit mutations stay queued ahead of the delete.
    pub fn delete_visit(&self, id: &str) -> Result<(), LifecycleError> {
        self.store.transaction(|tx| {
            load(tx, id)?;
            for note_id in repo::delete_voice_notes_for_visit(tx, id)? {
                repo::remove_entries_for(tx, EntityType::VoiceNote, &note_id)?;
            }
            repo::delete_gps_samples_for_visit(tx, id)?;
            repo::remove_entries_for(tx, EntityType::GpsTrack, id)?;
            repo::delete_visit(tx, id)?;
            repo::enqueue_payload(tx, &OutboxPayload::VisitDeletion { id: id.into() }, OutboxAction::Delete)?;
            Ok::<_, LifecycleError>(())
        })?;
        self.stop_tracking(id);
        tracing::info!(visit_id = id, "Visit deleted");
        self.refresh_pending_count();
        Ok(())
    }

    /// Store a recorded voice note and queue its upload.
    pub fn attach_voice_note(
        &self,
        visit_id: &str,
        file_path: &str,
        duration_ms: i64,
    ) -> Result<VoiceNote, LifecycleError> {
        let note = VoiceNote {
            id: Uuid::new_v4().to_string(),
            visit_record_id: visit_id.into(),
            file_path: file_path.into(),
            duration_ms,
            transcription: None,
            synced: false,
        };
        self.store.transaction(|tx| {
            load(tx, visit_id)?;
            repo::upsert_voice_note(tx, &note)?;
            let upload = VoiceNoteUpload {
                voice_note_id: note.id.clone(),
                visit_id: visit_id.into(),
                file_path: note.file_path.clone(),
                duration_ms,
            };
            repo::enqueue_payload(tx, &OutboxPayload::VoiceNote(upload), OutboxAction::Create)?;
            Ok::<_, LifecycleError>(())
        })?;
        tracing::debug!(visit_id, note_id = %note.id, "Voice note attached");
        self.refresh_pending_count();
        Ok(note)
    }

    fn transition(
        &self,
        id: &str,
        to: VisitStatus,
        apply: impl FnOnce(&mut VisitRecord),
    ) -> Result<VisitRecord, LifecycleError> {
        let visit = self.store.transaction(|tx| {
            let mut visit = load(tx, id)?;
            if !visit.status.can_transition_to(to) {
                return Err(LifecycleError::InvalidTransition {
                    id: id.into(),
                    from: visit.status,
                    to,
                });
            }
            visit.status = to;
            apply(&mut visit);
            visit.updated_at = Utc::now();
            save_and_enqueue(tx, &mut visit)?;
            Ok(visit)
        })?;

        tracing::info!(visit_id = id, status = %to, "Visit status changed");
        if to != VisitStatus::InProgress {
            self.stop_tracking(id);
        }
        self.refresh_pending_count();
        Ok(visit)
    }

    fn stop_tracking(&self, visit_id: &str) {
        if let Some(tracker) = &self.tracker {
            if let Err(e) = tracker.stop_visit(visit_id) {
                tracing::warn!(visit_id, error = %e, "Could not stop GPS tracking");
            }
        }
    }

    fn refresh_pending_count(&self) {
        match self.store.pending_count() {
            Ok(count) => self.status.set_pending_count(count),
            Err(e) => tracing::warn!(error = %e, "Could not count pending outbox entries"),
        }
    }
}

fn load(conn: &rusqlite::Connection, id: &str) -> Result<VisitRecord, LifecycleError> {
    repo::get_visit(conn, id)?.ok_or_else(|| LifecycleError::NotFound(id.into()))
}

/// Persist the full snapshot as unsynced and queue it as `visit/update`.
fn save_and_enqueue(conn: &rusqlite::Connection, visit: &mut VisitRecord) -> Result<(), DatabaseError> {
    visit.synced = false;
    repo::update_visit(conn, visit)?;
    repo::enqueue_payload(conn, &OutboxPayload::Visit(VisitPayload::from(&*visit)), OutboxAction::Update)?;
    Ok(())
}
