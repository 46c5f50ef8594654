use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference-cache copy of a hospital the representative may visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedHospital {
    pub id: String,
    pub name: String,
    pub city: Option<String>,
    pub address: Option<String>,
    pub country_code: Option<String>,
    pub contact_person: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub synced: bool,
    pub updated_at: DateTime<Utc>,
}

impl CachedHospital {
    /// New unsynced hospital with only the required fields set.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            city: None,
            address: None,
            country_code: None,
            contact_person: None,
            phone: None,
            email: None,
            synced: false,
            updated_at: Utc::now(),
        }
    }
}
