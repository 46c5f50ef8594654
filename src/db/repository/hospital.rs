use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use super::{format_timestamp, parse_optional_timestamp};
use crate::db::DatabaseError;
use crate::models::CachedHospital;

const HOSPITAL_COLUMNS: &str =
    "id, name, city, address, country_code, contact_person, phone, email, synced, updated_at";

/// Insert or fully overwrite a cached hospital.
pub fn upsert_hospital(conn: &Connection, hospital: &CachedHospital) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO hospitals (id, name, city, address, country_code, contact_person, phone,
         email, synced, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            city = excluded.city,
            address = excluded.address,
            country_code = excluded.country_code,
            contact_person = excluded.contact_person,
            phone = excluded.phone,
            email = excluded.email,
            synced = excluded.synced,
            updated_at = excluded.updated_at",
        params![
            hospital.id,
            hospital.name,
            hospital.city,
            hospital.address,
            hospital.country_code,
            hospital.contact_person,
            hospital.phone,
            hospital.email,
            hospital.synced as i32,
            format_timestamp(&hospital.updated_at),
        ],
    )?;
    Ok(())
}

pub fn get_hospital(conn: &Connection, id: &str) -> Result<Option<CachedHospital>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {HOSPITAL_COLUMNS} FROM hospitals WHERE id = ?1"),
            params![id],
            hospital_row_from_rusqlite,
        )
        .optional()?;
    row.map(hospital_from_row).transpose()
}

/// All cached hospitals ordered by name.
pub fn list_hospitals(conn: &Connection) -> Result<Vec<CachedHospital>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {HOSPITAL_COLUMNS} FROM hospitals ORDER BY name COLLATE NOCASE ASC, id ASC"
    ))?;
    let rows = stmt.query_map([], hospital_row_from_rusqlite)?;

    let mut hospitals = Vec::new();
    for row in rows {
        hospitals.push(hospital_from_row(row?)?);
    }
    Ok(hospitals)
}

// Internal row type for CachedHospital mapping
struct HospitalRow {
    id: String,
    name: String,
    city: Option<String>,
    address: Option<String>,
    country_code: Option<String>,
    contact_person: Option<String>,
    phone: Option<String>,
    email: Option<String>,
    synced: i32,
    updated_at: Option<String>,
}

fn hospital_row_from_rusqlite(row: &rusqlite::Row<'_>) -> Result<HospitalRow, rusqlite::Error> {
    Ok(HospitalRow {
        id: row.get(0)?,
        name: row.get(1)?,
        city: row.get(2)?,
        address: row.get(3)?,
        country_code: row.get(4)?,
        contact_person: row.get(5)?,
        phone: row.get(6)?,
        email: row.get(7)?,
        synced: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn hospital_from_row(row: HospitalRow) -> Result<CachedHospital, DatabaseError> {
    Ok(CachedHospital {
        id: row.id,
        name: row.name,
        city: row.city,
        address: row.address,
        country_code: row.country_code,
        contact_person: row.contact_person,
        phone: row.phone,
        email: row.email,
        synced: row.synced != 0,
        updated_at: parse_optional_timestamp("hospitals.updated_at", row.updated_at)?
            .unwrap_or_else(Utc::now),
    })
}
