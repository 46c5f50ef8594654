//! Offline edits of the hospital reference cache.
//!
//! Hospitals normally arrive through the pull phase. A representative can
//! still add a missing hospital or correct its contact data on the device;
//! those edits are queued like any other mutation.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::repository as repo;
use crate::db::{DatabaseError, LocalStore};
use crate::models::{CachedHospital, HospitalPayload, OutboxAction, OutboxPayload};
use crate::sync::SyncStatusStore;

/// Input for a hospital created on the device.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewHospital {
    pub name: String,
    pub city: Option<String>,
    pub address: Option<String>,
    pub country_code: Option<String>,
    pub contact_person: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

/// Partial edit; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HospitalChanges {
    pub name: Option<String>,
    pub city: Option<String>,
    pub address: Option<String>,
    pub country_code: Option<String>,
    pub contact_person: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
}

pub struct HospitalCache {
    store: Arc<LocalStore>,
    status: SyncStatusStore,
}

impl HospitalCache {
    pub fn new(store: Arc<LocalStore>, status: SyncStatusStore) -> Self {
        Self { store, status }
    }

    pub fn list(&self) -> Result<Vec<CachedHospital>, DatabaseError> {
        self.store.list_hospitals()
    }

    pub fn get(&self, id: &str) -> Result<Option<CachedHospital>, DatabaseError> {
        self.store.get_hospital(id)
    }

    pub fn create(&self, input: NewHospital) -> Result<CachedHospital, DatabaseError> {
        let name = required_name(&input.name)?;
        let hospital = CachedHospital {
            city: input.city,
            address: input.address,
            country_code: input.country_code,
            contact_person: input.contact_person,
            phone: input.phone,
            email: input.email,
            ..CachedHospital::new(Uuid::new_v4().to_string(), name)
        };

        self.store.transaction(|tx| {
            repo::upsert_hospital(tx, &hospital)?;
            repo::enqueue_payload(
                tx,
                &OutboxPayload::Hospital(HospitalPayload::from(&hospital)),
                OutboxAction::Create,
            )
        })?;
        tracing::info!(hospital_id = %hospital.id, "Hospital created offline");
        self.refresh_pending_count();
        Ok(hospital)
    }

    pub fn update(&self, id: &str, changes: HospitalChanges) -> Result<CachedHospital, DatabaseError> {
        let hospital = self.store.transaction(|tx| {
            let mut hospital = repo::get_hospital(tx, id)?.ok_or_else(|| DatabaseError::NotFound {
                entity_type: "hospital".into(),
                id: id.into(),
            })?;
            if let Some(name) = changes.name {
                hospital.name = required_name(&name)?;
            }
            let fields = [
                (&mut hospital.city, changes.city),
                (&mut hospital.address, changes.address),
                (&mut hospital.country_code, changes.country_code),
                (&mut hospital.contact_person, changes.contact_person),
                (&mut hospital.phone, changes.phone),
                (&mut hospital.email, changes.email),
            ];
            for (field, value) in fields {
                if value.is_some() {
                    *field = value;
                }
            }
            hospital.updated_at = Utc::now();
            hospital.synced = false;

            repo::upsert_hospital(tx, &hospital)?;
            repo::enqueue_payload(
                tx,
                &OutboxPayload::Hospital(HospitalPayload::from(&hospital)),
                OutboxAction::Update,
            )?;
            Ok::<_, DatabaseError>(hospital)
        })?;
        self.refresh_pending_count();
        Ok(hospital)
    }

    fn refresh_pending_count(&self) {
        match self.store.pending_count() {
            Ok(count) => self.status.set_pending_count(count),
            Err(e) => tracing::warn!(error = %e, "Could not count pending outbox entries"),
        }
    }
}

fn required_name(name: &str) -> Result<String, DatabaseError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(DatabaseError::ConstraintViolation("hospital name is required".into()));
    }
    Ok(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntityType;

    fn cache() -> HospitalCache {
        HospitalCache::new(Arc::new(LocalStore::open_in_memory().unwrap()), SyncStatusStore::new())
    }

    #[test]
    fn create_queues_hospital() {
        let cache = cache();
        let created = cache
            .create(NewHospital {
                name: "  St. Elisabeth  ".into(),
                city: Some("Bratislava".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(created.name, "St. Elisabeth");
        assert!(!created.synced);

        let entries = cache.store.pending_entries(50).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity_type, EntityType::Hospital);
        assert_eq!(entries[0].action, OutboxAction::Create);
        assert_eq!(cache.status.snapshot().pending_count, 1);
    }

    #[test]
    fn blank_name_rejected() {
        let cache = cache();
        let err = cache.create(NewHospital::default()).unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));
        assert!(cache.list().unwrap().is_empty());
    }

    #[test]
    fn update_changes_only_given_fields() {
        let cache = cache();
        let mut pulled = CachedHospital::new("H1", "University Hospital");
        pulled.city = Some("Kosice".into());
        pulled.synced = true;
        cache.store.upsert_hospital(&pulled).unwrap();

        let updated = cache
            .update(
                "H1",
                HospitalChanges {
                    phone: Some("+421 2 1234".into()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(updated.city.as_deref(), Some("Kosice"));
        assert_eq!(updated.phone.as_deref(), Some("+421 2 1234"));

        let stored = cache.get("H1").unwrap().unwrap();
        assert!(!stored.synced);
        assert_eq!(cache.store.pending_entries(50).unwrap()[0].action, OutboxAction::Update);
    }

    #[test]
    fn update_unknown_hospital_fails() {
        let cache = cache();
        let err = cache.update("missing", HospitalChanges::default()).unwrap_err();
        assert!(matches!(err, DatabaseError::NotFound { .. }));
        assert_eq!(cache.store.pending_count().unwrap(), 0);
    }
}
