//! GPS trace buffer for the visit in progress.
//!
//! Location fixes come from the platform; the buffer keeps a fix when the
//! sampling interval has passed or the device moved far enough since the
//! last kept one. Kept fixes are persisted through [`LocalStore`] and
//! uploaded in one batch per visit by [`upload_batch`].

use std::sync::{Arc, Mutex};
use std::time::Duration;

use thiserror::Error;

use crate::config::SyncConfig;
use crate::db::{DatabaseError, LocalStore};
use crate::models::{distance_m, valid_coordinates, GpsFix, OutboxEntry};
use crate::sync::{RemoteApi, SyncError};

#[derive(Error, Debug)]
pub enum GpsError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid coordinates: {latitude}, {longitude}")]
    InvalidCoordinates { latitude: f64, longitude: f64 },

    #[error("Internal lock error")]
    LockPoisoned,
}

/// Sampling triggers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TraceSettings {
    pub interval: Duration,
    pub min_displacement_m: f64,
}

impl Default for TraceSettings {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl TraceSettings {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            interval: config.gps_interval,
            min_displacement_m: config.gps_min_displacement_m,
        }
    }

    /// Whether `fix` should be kept given the last kept fix.
    pub fn should_record(&self, last: Option<&GpsFix>, fix: &GpsFix) -> bool {
        let Some(last) = last else {
            return true;
        };
        let elapsed = fix.timestamp.signed_duration_since(last.timestamp);
        let interval_due = elapsed
            .to_std()
            .map(|elapsed| elapsed >= self.interval)
            .unwrap_or(false);
        interval_due || distance_m(last, fix) >= self.min_displacement_m
    }
}

/// What happened to a fix handed to [`GpsTraceBuffer::record_fix`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixOutcome {
    /// Persisted under this sample id.
    Recorded(i64),
    /// Neither trigger fired.
    Skipped,
    /// No visit is being tracked.
    NotTracking,
}

#[derive(Debug)]
struct ActiveTrace {
    visit_id: String,
    last_recorded: Option<GpsFix>,
}

pub struct GpsTraceBuffer {
    store: Arc<LocalStore>,
    settings: TraceSettings,
    active: Mutex<Option<ActiveTrace>>,
}

impl GpsTraceBuffer {
    pub fn new(store: Arc<LocalStore>, settings: TraceSettings) -> Self {
        Self {
            store,
            settings,
            active: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> TraceSettings {
        self.settings
    }

    /// Track `visit_id`, replacing any visit tracked before.
    pub fn start(&self, visit_id: &str) -> Result<(), GpsError> {
        let mut active = self.active.lock().map_err(|_| GpsError::LockPoisoned)?;
        if let Some(previous) = active.as_ref().filter(|a| a.visit_id != visit_id) {
            tracing::warn!(previous = %previous.visit_id, visit_id, "Replacing active GPS trace");
        }
        *active = Some(ActiveTrace {
            visit_id: visit_id.to_string(),
            last_recorded: None,
        });
        tracing::info!(visit_id, "GPS tracking started");
        Ok(())
    }

    /// Stop tracking; returns the visit that was tracked.
    pub fn stop(&self) -> Result<Option<String>, GpsError> {
        let mut active = self.active.lock().map_err(|_| GpsError::LockPoisoned)?;
        let stopped = active.take().map(|a| a.visit_id);
        if let Some(visit_id) = &stopped {
            tracing::info!(visit_id = %visit_id, "GPS tracking stopped");
        }
        Ok(stopped)
    }

    /// Stop tracking only if `visit_id` is the tracked visit.
    pub fn stop_visit(&self, visit_id: &str) -> Result<bool, GpsError> {
        if self.active_visit()?.as_deref() == Some(visit_id) {
            self.stop()?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn active_visit(&self) -> Result<Option<String>, GpsError> {
        let active = self.active.lock().map_err(|_| GpsError::LockPoisoned)?;
        Ok(active.as_ref().map(|a| a.visit_id.clone()))
    }

    /// Offer a location fix. Persists it when a sampling trigger fires.
    ///
    /// If the store refuses the sample because the visit left `in_progress`
    /// (or no longer exists), tracking stops and the error is returned.
    pub fn record_fix(&self, fix: GpsFix) -> Result<FixOutcome, GpsError> {
        if !valid_coordinates(fix.latitude, fix.longitude) {
            return Err(GpsError::InvalidCoordinates {
                latitude: fix.latitude,
                longitude: fix.longitude,
            });
        }

        let mut active = self.active.lock().map_err(|_| GpsError::LockPoisoned)?;
        let Some(trace) = active.as_mut() else {
            return Ok(FixOutcome::NotTracking);
        };
        if !self.settings.should_record(trace.last_recorded.as_ref(), &fix) {
            return Ok(FixOutcome::Skipped);
        }

        match self.store.append_gps_sample(&trace.visit_id, &fix) {
            Ok(sample_id) => {
                trace.last_recorded = Some(fix);
                tracing::debug!(visit_id = %trace.visit_id, sample_id, "GPS sample recorded");
                Ok(FixOutcome::Recorded(sample_id))
            }
            Err(e @ (DatabaseError::ConstraintViolation(_) | DatabaseError::NotFound { .. })) => {
                tracing::warn!(visit_id = %trace.visit_id, error = %e, "Visit no longer tracked, stopping GPS");
                *active = None;
                Err(e.into())
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Upload every stored sample of the entry's visit as one batch.
///
/// Samples are deleted only after the server confirmed the batch, and only
/// up to the last uploaded id. Returns the number of samples uploaded.
pub async fn upload_batch<A: RemoteApi>(
    store: &LocalStore,
    api: &A,
    entry: &OutboxEntry,
) -> Result<usize, SyncError> {
    let visit_id = &entry.entity_id;
    let samples = store.list_gps_samples(visit_id)?;
    if !samples.is_empty() {
        api.upload_gps_batch(visit_id, &samples).await?;
    }

    let up_to = samples.iter().map(|s| s.id).max();
    let remaining = store.finish_gps_flush(entry, up_to)?;
    tracing::debug!(visit_id = %visit_id, uploaded = samples.len(), remaining, "GPS batch flushed");
    Ok(samples.len())
}
