pub mod repository;
pub mod sqlite;
pub mod store;

pub use repository::*;
pub use sqlite::*;
pub use store::*;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    #[error("Invalid enum value for {field}: {value}")]
    InvalidEnum { field: String, value: String },

    #[error("Invalid timestamp in {field}: {value}")]
    InvalidTimestamp { field: String, value: String },

    #[error("Invalid payload in outbox entry {entry_id}: {reason}")]
    InvalidPayload { entry_id: i64, reason: String },

    #[error("Payload serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Schema setup failed at {step}: {reason}")]
    MigrationFailed { step: String, reason: String },

    #[error("Constraint violated: {0}")]
    ConstraintViolation(String),

    #[error("Local store is closed")]
    Closed,

    #[error("Internal lock error")]
    LockPoisoned,
}
