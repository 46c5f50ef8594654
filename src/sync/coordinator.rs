//! One sync pass: replay the outbox, then pull server state.
//!
//! Pass algorithm:
//! 1. Ask the network monitor; publish connectivity.
//! 2. Offline: publish "No network connection" and return [`SyncError::Offline`].
//! 3. Push: deliver up to `batch_size` oldest entries, one at a time.
//! 4. Pull: hospitals, then visits. Entities with queued mutations are skipped.
//! 5. Publish the pending count and the outcome.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;

use super::network::NetworkMonitor;
use super::remote::{RemoteApi, VoiceNoteReceipt};
use super::retry::{attempt, AttemptOutcome, RetryPolicy};
use super::status::SyncStatusStore;
use super::SyncError;
use crate::config::{SyncConfig, OUTBOX_BATCH_SIZE};
use crate::db::{DatabaseError, LocalStore};
use crate::gps::upload_batch;
use crate::models::{CachedHospital, OutboxAction, OutboxEntry, OutboxPayload};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushStats {
    pub delivered: usize,
    pub retried: usize,
    pub dropped: usize,
    /// Entries whose local bookkeeping failed after the attempt.
    pub storage_errors: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PullStats {
    pub hospitals_applied: usize,
    pub visits_applied: usize,
    pub skipped_pending: usize,
    pub skipped_invalid: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub push: PushStats,
    pub pull: PullStats,
}

/// What a delivered entry still needs locally.
enum Delivered {
    Entry,
    VoiceNote(VoiceNoteReceipt),
    /// Already settled by [`upload_batch`].
    GpsBatch,
}

pub struct SyncCoordinator<A, N> {
    store: Arc<LocalStore>,
    api: A,
    network: N,
    status: SyncStatusStore,
    policy: RetryPolicy,
    batch_size: usize,
    in_flight: Mutex<()>,
}

impl<A: RemoteApi, N: NetworkMonitor> SyncCoordinator<A, N> {
    pub fn new(store: Arc<LocalStore>, api: A, network: N, status: SyncStatusStore) -> Self {
        Self {
            store,
            api,
            network,
            status,
            policy: RetryPolicy::default(),
            batch_size: OUTBOX_BATCH_SIZE,
            in_flight: Mutex::new(()),
        }
    }

    pub fn from_config(
        store: Arc<LocalStore>,
        api: A,
        network: N,
        status: SyncStatusStore,
        config: &SyncConfig,
    ) -> Self {
        Self::new(store, api, network, status)
            .with_policy(RetryPolicy::from_config(config))
            .with_batch_size(config.outbox_batch_size)
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn status(&self) -> &SyncStatusStore {
        &self.status
    }

    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// Run one pass. A second call while a pass runs fails with
    /// [`SyncError::AlreadyRunning`] without touching the status store.
    pub async fn run_pass(&self) -> Result<SyncReport, SyncError> {
        let _guard = self.in_flight.try_lock().map_err(|_| SyncError::AlreadyRunning)?;

        let online = self.network.is_online().await;
        self.status.set_online(online);
        if !online {
            tracing::info!("Sync skipped: offline");
            self.refresh_pending_count();
            self.status.finish_failure(SyncError::Offline.to_string());
            return Err(SyncError::Offline);
        }

        tracing::info!("Sync pass starting");
        self.status.begin_sync();

        let result = self.push_and_pull().await;
        self.refresh_pending_count();

        match &result {
            Ok(report) => {
                self.status.finish_success(Utc::now());
                tracing::info!(
                    delivered = report.push.delivered,
                    retried = report.push.retried,
                    dropped = report.push.dropped,
                    hospitals = report.pull.hospitals_applied,
                    visits = report.pull.visits_applied,
                    skipped_pending = report.pull.skipped_pending,
                    "Sync pass finished"
                );
            }
            Err(e) => {
                self.status.finish_failure(e.to_string());
                tracing::error!(error = %e, "Sync pass failed");
            }
        }
        result
    }

    async fn push_and_pull(&self) -> Result<SyncReport, SyncError> {
        let push = self.push().await?;
        let pull = self.pull().await?;
        Ok(SyncReport { push, pull })
    }

    // ── Push ─────────────────────────────────────────────────────────────────

    async fn push(&self) -> Result<PushStats, SyncError> {
        let entries = self.store.pending_entries(self.batch_size)?;
        let mut stats = PushStats::default();
        if entries.is_empty() {
            return Ok(stats);
        }
        tracing::debug!(count = entries.len(), "Replaying outbox");

        for entry in &entries {
            if let Err(e) = self.push_entry(entry, &mut stats).await {
                stats.storage_errors += 1;
                tracing::error!(
                    entry_id = entry.id,
                    entity_type = %entry.entity_type,
                    entity_id = %entry.entity_id,
                    error = %e,
                    "Outbox bookkeeping failed, continuing"
                );
            }
        }
        Ok(stats)
    }

    async fn push_entry(&self, entry: &OutboxEntry, stats: &mut PushStats) -> Result<(), DatabaseError> {
        let outcome = attempt(&self.policy, entry.retry_count, || self.deliver(entry)).await;

        match outcome {
            AttemptOutcome::Succeeded(delivered) => {
                self.settle(entry, delivered)?;
                stats.delivered += 1;
                tracing::debug!(
                    entry_id = entry.id,
                    entity_type = %entry.entity_type,
                    entity_id = %entry.entity_id,
                    action = %entry.action,
                    "Outbox entry delivered"
                );
            }
            AttemptOutcome::Retry { backoff, error, .. } => {
                let retry_count = self.store.record_failure(entry.id)?;
                stats.retried += 1;
                tracing::warn!(
                    entry_id = entry.id,
                    entity_type = %entry.entity_type,
                    entity_id = %entry.entity_id,
                    retry_count,
                    transient = error.is_transient(),
                    backoff_ms = backoff.as_millis() as u64,
                    error = %error,
                    "Outbox delivery failed, will retry"
                );
                tokio::time::sleep(backoff).await;
            }
            AttemptOutcome::Exhausted { failures, error } => {
                let discarded_samples = self.store.drop_entry(entry)?;
                stats.dropped += 1;
                tracing::warn!(
                    entry_id = entry.id,
                    entity_type = %entry.entity_type,
                    entity_id = %entry.entity_id,
                    retry_count = failures,
                    discarded_samples,
                    error = %error,
                    "Outbox entry dropped after final failure"
                );
            }
        }
        Ok(())
    }

    /// Send one entry to the server. Any error counts as a delivery failure.
    async fn deliver(&self, entry: &OutboxEntry) -> Result<Delivered, SyncError> {
        let payload = entry
            .decode_payload()
            .map_err(|e| SyncError::InvalidPayload(e.to_string()))?;

        match (&payload, entry.action) {
            (OutboxPayload::Visit(visit), OutboxAction::Create) => {
                self.api.create_visit(visit).await?;
            }
            (OutboxPayload::Visit(visit), _) => {
                self.api.update_visit(visit).await?;
            }
            (OutboxPayload::VisitDeletion { id }, _) => {
                self.api.delete_visit(id).await?;
            }
            (OutboxPayload::Hospital(hospital), OutboxAction::Create) => {
                self.api.create_hospital(hospital).await?;
            }
            (OutboxPayload::Hospital(hospital), _) => {
                self.api.update_hospital(hospital).await?;
            }
            (OutboxPayload::VoiceNote(note), _) => {
                let receipt = self.api.upload_voice_note(note).await?;
                return Ok(Delivered::VoiceNote(receipt));
            }
            (OutboxPayload::GpsBatch { .. }, _) => {
                upload_batch(&self.store, &self.api, entry).await?;
                return Ok(Delivered::GpsBatch);
            }
        }
        Ok(Delivered::Entry)
    }

    fn settle(&self, entry: &OutboxEntry, delivered: Delivered) -> Result<(), DatabaseError> {
        match delivered {
            Delivered::Entry => {
                self.store.confirm_entry(entry)?;
            }
            Delivered::VoiceNote(receipt) => {
                if let Some(text) = receipt.transcription.as_deref() {
                    self.store.set_transcription(&entry.entity_id, text)?;
                }
                self.store.confirm_entry(entry)?;
            }
            Delivered::GpsBatch => {}
        }
        Ok(())
    }

    // ── Pull ─────────────────────────────────────────────────────────────────

    async fn pull(&self) -> Result<PullStats, SyncError> {
        let mut stats = PullStats::default();

        let hospitals: Vec<CachedHospital> = self
            .api
            .fetch_hospitals()
            .await?
            .into_iter()
            .map(CachedHospital::from)
            .collect();
        let applied = self.store.apply_pulled_hospitals(&hospitals)?;
        stats.hospitals_applied = applied.applied;
        stats.skipped_pending += applied.skipped_pending;

        let mut visits = Vec::new();
        for remote in self.api.fetch_visits().await? {
            let id = remote.id.clone();
            let status = remote.status.clone();
            match remote.into_record() {
                Some(record) => visits.push(record),
                None => {
                    stats.skipped_invalid += 1;
                    tracing::warn!(entity_id = %id, status = ?status, "Skipping pulled visit with unknown status");
                }
            }
        }
        let applied = self.store.apply_pulled_visits(&visits)?;
        stats.visits_applied = applied.applied;
        stats.skipped_pending += applied.skipped_pending;

        if stats.skipped_pending > 0 {
            tracing::warn!(skipped = stats.skipped_pending, "Pulled records skipped, local changes still queued");
        }
        Ok(stats)
    }

    fn refresh_pending_count(&self) {
        match self.store.pending_count() {
            Ok(count) => self.status.set_pending_count(count),
            Err(e) => tracing::warn!(error = %e, "Could not count pending outbox entries"),
        }
    }
}
