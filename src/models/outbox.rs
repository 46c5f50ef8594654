use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{EntityType, OutboxAction, VisitStatus};
use super::hospital::CachedHospital;
use super::visit::VisitRecord;
use crate::db::DatabaseError;

/// A persisted, not yet confirmed remote mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxEntry {
    pub id: i64,
    pub entity_type: EntityType,
    pub entity_id: String,
    pub action: OutboxAction,
    /// Serialized [`OutboxPayload`]; validated by [`OutboxEntry::decode_payload`].
    pub payload: String,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
}

impl OutboxEntry {
    /// Parse the stored payload and check it describes this row's entity and action.
    pub fn decode_payload(&self) -> Result<OutboxPayload, DatabaseError> {
        let payload: OutboxPayload =
            serde_json::from_str(&self.payload).map_err(|e| DatabaseError::InvalidPayload {
                entry_id: self.id,
                reason: e.to_string(),
            })?;
        payload
            .check(self.entity_type, &self.entity_id, self.action)
            .map_err(|reason| DatabaseError::InvalidPayload {
                entry_id: self.id,
                reason,
            })?;
        Ok(payload)
    }
}

/// Body of a visit create/update as the remote API expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitPayload {
    pub id: String,
    pub hospital_id: Option<String>,
    pub hospital_name: Option<String>,
    pub visit_type: Option<String>,
    pub place: Option<String>,
    pub status: VisitStatus,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub start_latitude: Option<f64>,
    pub start_longitude: Option<f64>,
    pub end_latitude: Option<f64>,
    pub end_longitude: Option<f64>,
    pub notes: Option<String>,
    pub is_cancelled: bool,
    pub is_not_realized: bool,
}

impl From<&VisitRecord> for VisitPayload {
    fn from(v: &VisitRecord) -> Self {
        Self {
            id: v.id.clone(),
            hospital_id: v.hospital_id.clone(),
            hospital_name: v.hospital_name.clone(),
            visit_type: v.visit_type.clone(),
            place: v.place.clone(),
            status: v.status,
            scheduled_start: v.scheduled_start,
            scheduled_end: v.scheduled_end,
            actual_start: v.actual_start,
            actual_end: v.actual_end,
            start_latitude: v.start_latitude,
            start_longitude: v.start_longitude,
            end_latitude: v.end_latitude,
            end_longitude: v.end_longitude,
            notes: v.notes.clone(),
            is_cancelled: v.is_cancelled,
            is_not_realized: v.is_not_realized,
        }
    }
}

/// Body of a hospital create/update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HospitalPayload {
    pub id: String,
    pub name: String,
    pub city: Option<String>,
    pub address: Option<String>,
    pub country_code: Option<String>,
    pub contact_person: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

impl From<&CachedHospital> for HospitalPayload {
    fn from(h: &CachedHospital) -> Self {
        Self {
            id: h.id.clone(),
            name: h.name.clone(),
            city: h.city.clone(),
            address: h.address.clone(),
            country_code: h.country_code.clone(),
            contact_person: h.contact_person.clone(),
            phone: h.phone.clone(),
            email: h.email.clone(),
        }
    }
}

/// What the multipart voice-note upload needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceNoteUpload {
    pub voice_note_id: String,
    pub visit_id: String,
    pub file_path: String,
    pub duration_ms: i64,
}

/// Typed content of an outbox row, persisted as tagged JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboxPayload {
    Visit(VisitPayload),
    VisitDeletion { id: String },
    Hospital(HospitalPayload),
    VoiceNote(VoiceNoteUpload),
    /// Marker: upload every GPS sample stored for the visit.
    GpsBatch { visit_id: String },
}

impl OutboxPayload {
    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Visit(_) | Self::VisitDeletion { .. } => EntityType::Visit,
            Self::Hospital(_) => EntityType::Hospital,
            Self::VoiceNote(_) => EntityType::VoiceNote,
            Self::GpsBatch { .. } => EntityType::GpsTrack,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            Self::Visit(v) => &v.id,
            Self::VisitDeletion { id } => id,
            Self::Hospital(h) => &h.id,
            Self::VoiceNote(n) => &n.voice_note_id,
            Self::GpsBatch { visit_id } => visit_id,
        }
    }

    fn accepts(&self, action: OutboxAction) -> bool {
        match self {
            Self::Visit(_) | Self::Hospital(_) => {
                matches!(action, OutboxAction::Create | OutboxAction::Update)
            }
            Self::VisitDeletion { .. } => action == OutboxAction::Delete,
            Self::VoiceNote(_) | Self::GpsBatch { .. } => action == OutboxAction::Create,
        }
    }

    /// Verify the payload agrees with the row columns it is stored under.
    pub fn check(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        action: OutboxAction,
    ) -> Result<(), String> {
        if self.entity_type() != entity_type {
            return Err(format!(
                "payload is for {} but row is {}",
                self.entity_type(),
                entity_type
            ));
        }
        if self.entity_id() != entity_id {
            return Err(format!(
                "payload id {} does not match entity id {}",
                self.entity_id(),
                entity_id
            ));
        }
        if !self.accepts(action) || !entity_type.supports(action) {
            return Err(format!("action {action} not valid for {entity_type} payload"));
        }
        Ok(())
    }
}
