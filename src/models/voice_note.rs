use serde::{Deserialize, Serialize};

/// Metadata of a recorded voice note; the audio itself stays on disk at `file_path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceNote {
    pub id: String,
    pub visit_record_id: String,
    pub file_path: String,
    pub duration_ms: i64,
    pub transcription: Option<String>,
    pub synced: bool,
}
