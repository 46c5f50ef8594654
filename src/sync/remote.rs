//! Remote API seam: the `RemoteApi` trait, its wire types, and an in-memory mock.

use std::collections::VecDeque;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::Notify;

use super::SyncError;
use crate::models::{
    CachedHospital, GpsSample, HospitalPayload, VisitPayload, VisitRecord, VisitStatus,
    VoiceNoteUpload,
};

/// Operations the sync engine needs from the central server.
pub trait RemoteApi: Send + Sync {
    fn fetch_hospitals(&self) -> impl Future<Output = Result<Vec<RemoteHospital>, SyncError>> + Send;

    fn fetch_visits(&self) -> impl Future<Output = Result<Vec<RemoteVisit>, SyncError>> + Send;

    fn create_visit(&self, visit: &VisitPayload) -> impl Future<Output = Result<(), SyncError>> + Send;

    fn update_visit(&self, visit: &VisitPayload) -> impl Future<Output = Result<(), SyncError>> + Send;

    fn delete_visit(&self, id: &str) -> impl Future<Output = Result<(), SyncError>> + Send;

    fn create_hospital(
        &self,
        hospital: &HospitalPayload,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;

    fn update_hospital(
        &self,
        hospital: &HospitalPayload,
    ) -> impl Future<Output = Result<(), SyncError>> + Send;

    fn upload_voice_note(
        &self,
        note: &VoiceNoteUpload,
    ) -> impl Future<Output = Result<VoiceNoteReceipt, SyncError>> + Send;

    fn upload_gps_batch(
        &self,
        visit_id: &str,
        tracks: &[GpsSample],
    ) -> impl Future<Output = Result<(), SyncError>> + Send;
}

/// Server answer to a voice-note upload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceNoteReceipt {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub transcription: Option<String>,
}

/// Body of the GPS batch upload.
#[derive(Debug, Serialize)]
pub struct GpsBatchBody<'a> {
    pub tracks: &'a [GpsSample],
}

/// Hospital as returned by `GET /hospitals`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteHospital {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub contact_person: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<RemoteHospital> for CachedHospital {
    fn from(h: RemoteHospital) -> Self {
        Self {
            id: h.id,
            name: h.name,
            city: h.city,
            address: h.address,
            country_code: h.country_code,
            contact_person: h.contact_person,
            phone: h.phone,
            email: h.email,
            synced: true,
            updated_at: h.updated_at.unwrap_or_else(Utc::now),
        }
    }
}

/// Visit as returned by `GET /visit-events`. Accepts the legacy field names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteVisit {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub hospital_id: Option<String>,
    #[serde(default)]
    pub hospital_name: Option<String>,
    #[serde(default, alias = "subject", deserialize_with = "optional_string_or_number")]
    pub visit_type: Option<String>,
    #[serde(default, deserialize_with = "optional_string_or_number")]
    pub place: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub is_cancelled: Option<bool>,
    #[serde(default)]
    pub is_not_realized: Option<bool>,
    #[serde(default, alias = "startTime")]
    pub scheduled_start: Option<DateTime<Utc>>,
    #[serde(default, alias = "endTime")]
    pub scheduled_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actual_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub actual_end: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_latitude: Option<f64>,
    #[serde(default)]
    pub start_longitude: Option<f64>,
    #[serde(default)]
    pub end_latitude: Option<f64>,
    #[serde(default)]
    pub end_longitude: Option<f64>,
    #[serde(default, alias = "remark")]
    pub notes: Option<String>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl RemoteVisit {
    /// Lifecycle state of the record. Flags win over the status string; no
    /// status at all means `scheduled`. `None` for an unknown status string.
    pub fn resolved_status(&self) -> Option<VisitStatus> {
        if self.is_cancelled == Some(true) {
            return Some(VisitStatus::Cancelled);
        }
        if self.is_not_realized == Some(true) {
            return Some(VisitStatus::NotRealized);
        }
        match self.status.as_deref().map(str::trim) {
            None | Some("") => Some(VisitStatus::Scheduled),
            Some(s) => VisitStatus::from_str(&s.to_ascii_lowercase().replace('-', "_")).ok(),
        }
    }

    /// Local record for this server visit, or `None` when its status is unknown.
    pub fn into_record(self) -> Option<VisitRecord> {
        let status = self.resolved_status()?;
        Some(VisitRecord {
            id: self.id,
            hospital_id: self.hospital_id,
            hospital_name: self.hospital_name,
            visit_type: self.visit_type,
            place: self.place,
            status,
            scheduled_start: self.scheduled_start,
            scheduled_end: self.scheduled_end,
            actual_start: self.actual_start,
            actual_end: self.actual_end,
            start_latitude: self.start_latitude,
            start_longitude: self.start_longitude,
            end_latitude: self.end_latitude,
            end_longitude: self.end_longitude,
            notes: self.notes,
            is_cancelled: status == VisitStatus::Cancelled,
            is_not_realized: status == VisitStatus::NotRealized,
            synced: true,
            updated_at: self.updated_at.unwrap_or_else(Utc::now),
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Int(i64),
    Float(f64),
}

impl From<StringOrNumber> for String {
    fn from(value: StringOrNumber) -> Self {
        match value {
            StringOrNumber::String(s) => s,
            StringOrNumber::Int(n) => n.to_string(),
            StringOrNumber::Float(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    StringOrNumber::deserialize(deserializer).map(String::from)
}

fn optional_string_or_number<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<StringOrNumber>::deserialize(deserializer)?.map(String::from))
}

// ─── Mock ────────────────────────────────────────────────────────────────────

/// A call recorded by [`MockRemoteApi`].
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteCall {
    FetchHospitals,
    FetchVisits,
    CreateVisit(String),
    UpdateVisit(String),
    DeleteVisit(String),
    CreateHospital(String),
    UpdateHospital(String),
    UploadVoiceNote(String),
    UploadGpsBatch { visit_id: String, sample_ids: Vec<i64> },
}

impl RemoteCall {
    fn is_push(&self) -> bool {
        !matches!(self, Self::FetchHospitals | Self::FetchVisits)
    }
}

#[derive(Default)]
struct MockState {
    calls: Vec<RemoteCall>,
    hospitals: Vec<RemoteHospital>,
    visits: Vec<RemoteVisit>,
    fail_push: bool,
    fail_pull: bool,
    fail_gps: bool,
    scripted_failures: VecDeque<SyncError>,
    transcription: Option<String>,
    push_gate: Option<Arc<Notify>>,
}

/// In-memory `RemoteApi` for tests: records calls and fails on demand.
#[derive(Default)]
pub struct MockRemoteApi {
    state: Mutex<MockState>,
}

impl MockRemoteApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hospitals(self, hospitals: Vec<RemoteHospital>) -> Self {
        self.with_state(|s| s.hospitals = hospitals);
        self
    }

    pub fn with_visits(self, visits: Vec<RemoteVisit>) -> Self {
        self.with_state(|s| s.visits = visits);
        self
    }

    /// Transcription returned by every voice-note upload.
    pub fn with_transcription(self, text: &str) -> Self {
        self.with_state(|s| s.transcription = Some(text.to_string()));
        self
    }

    /// Make every push call fail with HTTP 503.
    pub fn fail_push(&self, fail: bool) {
        self.with_state(|s| s.fail_push = fail);
    }

    /// Make both fetches fail with HTTP 500.
    pub fn fail_pull(&self, fail: bool) {
        self.with_state(|s| s.fail_pull = fail);
    }

    /// Make only GPS batch uploads fail.
    pub fn fail_gps(&self, fail: bool) {
        self.with_state(|s| s.fail_gps = fail);
    }

    /// Fail the next push call with `error`, once.
    pub fn fail_next(&self, error: SyncError) {
        self.with_state(|s| s.scripted_failures.push_back(error));
    }

    /// Hold every push call until the returned gate is notified or
    /// [`MockRemoteApi::release_push`] is called.
    pub fn stall_push(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.with_state(|s| s.push_gate = Some(gate.clone()));
        gate
    }

    pub fn release_push(&self) {
        if let Some(gate) = self.with_state(|s| s.push_gate.take()) {
            gate.notify_waiters();
        }
    }

    pub fn calls(&self) -> Vec<RemoteCall> {
        self.with_state(|s| s.calls.clone())
    }

    pub fn push_calls(&self) -> Vec<RemoteCall> {
        self.with_state(|s| s.calls.iter().filter(|c| c.is_push()).cloned().collect())
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockState) -> T) -> T {
        let mut guard = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    async fn record_push(&self, call: RemoteCall) -> Result<(), SyncError> {
        if let Some(gate) = self.with_state(|s| s.push_gate.clone()) {
            gate.notified().await;
        }
        self.with_state(|s| {
            let gps = matches!(call, RemoteCall::UploadGpsBatch { .. });
            s.calls.push(call);
            if let Some(error) = s.scripted_failures.pop_front() {
                return Err(error);
            }
            if s.fail_push || (gps && s.fail_gps) {
                return Err(SyncError::Http {
                    status: 503,
                    body: "service unavailable".into(),
                });
            }
            Ok(())
        })
    }

    fn record_pull(&self, call: RemoteCall) -> Result<(), SyncError> {
        self.with_state(|s| {
            s.calls.push(call);
            if s.fail_pull {
                return Err(SyncError::Http {
                    status: 500,
                    body: "internal error".into(),
                });
            }
            Ok(())
        })
    }
}

impl RemoteApi for MockRemoteApi {
    async fn fetch_hospitals(&self) -> Result<Vec<RemoteHospital>, SyncError> {
        self.record_pull(RemoteCall::FetchHospitals)?;
        Ok(self.with_state(|s| s.hospitals.clone()))
    }

    async fn fetch_visits(&self) -> Result<Vec<RemoteVisit>, SyncError> {
        self.record_pull(RemoteCall::FetchVisits)?;
        Ok(self.with_state(|s| s.visits.clone()))
    }

    async fn create_visit(&self, visit: &VisitPayload) -> Result<(), SyncError> {
        self.record_push(RemoteCall::CreateVisit(visit.id.clone())).await
    }

    async fn update_visit(&self, visit: &VisitPayload) -> Result<(), SyncError> {
        self.record_push(RemoteCall::UpdateVisit(visit.id.clone())).await
    }

    async fn delete_visit(&self, id: &str) -> Result<(), SyncError> {
        self.record_push(RemoteCall::DeleteVisit(id.to_string())).await
    }

    async fn create_hospital(&self, hospital: &HospitalPayload) -> Result<(), SyncError> {
        self.record_push(RemoteCall::CreateHospital(hospital.id.clone())).await
    }

    async fn update_hospital(&self, hospital: &HospitalPayload) -> Result<(), SyncError> {
        self.record_push(RemoteCall::UpdateHospital(hospital.id.clone())).await
    }

    async fn upload_voice_note(&self, note: &VoiceNoteUpload) -> Result<VoiceNoteReceipt, SyncError> {
        self.record_push(RemoteCall::UploadVoiceNote(note.voice_note_id.clone())).await?;
        Ok(VoiceNoteReceipt {
            id: note.voice_note_id.clone(),
            transcription: self.with_state(|s| s.transcription.clone()),
        })
    }

    async fn upload_gps_batch(&self, visit_id: &str, tracks: &[GpsSample]) -> Result<(), SyncError> {
        self.record_push(RemoteCall::UploadGpsBatch {
            visit_id: visit_id.to_string(),
            sample_ids: tracks.iter().map(|t| t.id).collect(),
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_visit_accepts_legacy_names() {
        let json = r#"{
            "id": 42,
            "hospitalId": 7,
            "subject": "3",
            "startTime": "2025-01-01T09:00:00Z",
            "endTime": "2025-01-01T10:00:00Z",
            "remark": "bring brochures",
            "status": "scheduled"
        }"#;
        let visit: RemoteVisit = serde_json::from_str(json).unwrap();
        assert_eq!(visit.id, "42");
        assert_eq!(visit.hospital_id.as_deref(), Some("7"));
        assert_eq!(visit.visit_type.as_deref(), Some("3"));
        assert_eq!(visit.notes.as_deref(), Some("bring brochures"));
        assert!(visit.scheduled_end.is_some());
    }

    #[test]
    fn status_resolution() {
        let mut visit = RemoteVisit {
            id: "v".into(),
            ..Default::default()
        };
        assert_eq!(visit.resolved_status(), Some(VisitStatus::Scheduled));

        visit.status = Some("in-progress".into());
        assert_eq!(visit.resolved_status(), Some(VisitStatus::InProgress));

        visit.is_not_realized = Some(true);
        assert_eq!(visit.resolved_status(), Some(VisitStatus::NotRealized));

        visit.is_cancelled = Some(true);
        assert_eq!(visit.resolved_status(), Some(VisitStatus::Cancelled));
    }

    #[test]
    fn unknown_status_yields_no_record() {
        let visit = RemoteVisit {
            id: "v".into(),
            status: Some("archived".into()),
            ..Default::default()
        };
        assert!(visit.into_record().is_none());
    }

    #[test]
    fn record_from_remote_is_synced() {
        let visit = RemoteVisit {
            id: "v".into(),
            status: Some("completed".into()),
            ..Default::default()
        };
        let record = visit.into_record().unwrap();
        assert!(record.synced);
        assert_eq!(record.status, VisitStatus::Completed);
        assert!(!record.is_cancelled);
    }

    #[test]
    fn receipt_transcription_optional() {
        let receipt: VoiceNoteReceipt = serde_json::from_str(r#"{"id": "n1"}"#).unwrap();
        assert!(receipt.transcription.is_none());
    }

    #[tokio::test]
    async fn mock_records_and_fails_on_demand() {
        let api = MockRemoteApi::new();
        api.delete_visit("v-1").await.unwrap();

        api.fail_next(SyncError::Transport("reset".into()));
        assert!(api.delete_visit("v-2").await.is_err());
        assert!(api.delete_visit("v-3").await.is_ok());

        api.fail_pull(true);
        assert!(api.fetch_visits().await.is_err());

        assert_eq!(api.push_calls().len(), 3);
        assert_eq!(api.calls().len(), 4);
    }
}
