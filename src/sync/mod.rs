//! Outbox replay and server pull.
//!
//! `coordinator` runs one pass (push then pull) against a [`remote::RemoteApi`];
//! `background` schedules passes; `status` publishes the outcome.

pub mod background;
pub mod coordinator;
pub mod http;
pub mod network;
pub mod remote;
pub mod retry;
pub mod status;

pub use background::*;
pub use coordinator::*;
pub use http::*;
pub use network::*;
pub use remote::*;
pub use retry::*;
pub use status::*;

use thiserror::Error;

use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("No network connection")]
    Offline,

    #[error("A sync pass is already running")]
    AlreadyRunning,

    #[error("Server returned error (status {status}): {body}")]
    Http { status: u16, body: String },

    #[error("Cannot reach server: {0}")]
    Transport(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Malformed server response: {0}")]
    Decode(String),

    #[error("Invalid outbox payload: {0}")]
    InvalidPayload(String),

    #[error("Audio file missing for voice note {note_id}: {path}")]
    MissingAudio { note_id: String, path: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Sync pass exceeded {0:?}")]
    PassTimeout(std::time::Duration),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),
}

impl SyncError {
    /// Failures that may clear up on their own (network, 5xx, 408, 429).
    ///
    /// Used for log levels only: permanent failures are retried and dropped
    /// exactly like transient ones.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Offline | Self::Transport(_) | Self::Timeout(_) | Self::PassTimeout(_) => true,
            Self::Http { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_connect() || e.is_request() {
            Self::Transport(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            Self::Http {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            Self::Transport(e.to_string())
        }
    }
}
