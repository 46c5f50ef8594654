use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::VisitStatus;

/// A scheduled or performed visit at a hospital.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitRecord {
    pub id: String,
    pub hospital_id: Option<String>,
    pub hospital_name: Option<String>,
    /// Subject code, see [`super::codes::visit_type_label`].
    pub visit_type: Option<String>,
    /// Place code, see [`super::codes::place_label`].
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
    pub synced: bool,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a visit on the device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVisit {
    pub hospital_id: Option<String>,
    pub hospital_name: Option<String>,
    pub visit_type: Option<String>,
    pub place: Option<String>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

/// Partial edit of the descriptive fields of a visit. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisitChanges {
    pub hospital_id: Option<String>,
    pub hospital_name: Option<String>,
    pub visit_type: Option<String>,
    pub place: Option<String>,
    pub scheduled_start: Option<DateTime<Utc>>,
    pub scheduled_end: Option<DateTime<Utc>>,
    pub notes: Option<String>,
}

impl VisitRecord {
    /// Fresh `scheduled` record for a client-generated id.
    pub fn scheduled(id: impl Into<String>, input: NewVisit) -> Self {
        Self {
            id: id.into(),
            hospital_id: input.hospital_id,
            hospital_name: input.hospital_name,
            visit_type: input.visit_type,
            place: input.place,
            status: VisitStatus::Scheduled,
            scheduled_start: input.scheduled_start,
            scheduled_end: input.scheduled_end,
            actual_start: None,
            actual_end: None,
            start_latitude: None,
            start_longitude: None,
            end_latitude: None,
            end_longitude: None,
            notes: input.notes,
            is_cancelled: false,
            is_not_realized: false,
            synced: false,
            updated_at: Utc::now(),
        }
    }

    /// Apply an edit in place. Returns `true` if any field changed.
    pub fn apply(&mut self, changes: VisitChanges) -> bool {
        let before = self.clone();
        if let Some(v) = changes.hospital_id {
            self.hospital_id = Some(v);
        }
        if let Some(v) = changes.hospital_name {
            self.hospital_name = Some(v);
        }
        if let Some(v) = changes.visit_type {
            self.visit_type = Some(v);
        }
        if let Some(v) = changes.place {
            self.place = Some(v);
        }
        if let Some(v) = changes.scheduled_start {
            self.scheduled_start = Some(v);
        }
        if let Some(v) = changes.scheduled_end {
            self.scheduled_end = Some(v);
        }
        if let Some(v) = changes.notes {
            self.notes = Some(v);
        }
        *self != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheduled_record_starts_unsynced() {
        let visit = VisitRecord::scheduled(
            "v-1",
            NewVisit {
                hospital_id: Some("H1".into()),
                ..Default::default()
            },
        );
        assert_eq!(visit.status, VisitStatus::Scheduled);
        assert!(!visit.synced);
        assert!(!visit.is_cancelled);
        assert_eq!(visit.hospital_id.as_deref(), Some("H1"));
    }

    #[test]
    fn apply_reports_changes() {
        let mut visit = VisitRecord::scheduled("v-1", NewVisit::default());
        assert!(!visit.apply(VisitChanges::default()));
        assert!(visit.apply(VisitChanges {
            notes: Some("bring kits".into()),
            ..Default::default()
        }));
        assert_eq!(visit.notes.as_deref(), Some("bring kits"));
    }

    #[test]
    fn serializes_camel_case() {
        let visit = VisitRecord::scheduled("v-1", NewVisit::default());
        let json = serde_json::to_value(&visit).unwrap();
        assert_eq!(json["status"], "scheduled");
        assert!(json.get("isNotRealized").is_some());
        assert!(json.get("scheduledStart").is_some());
    }
}
