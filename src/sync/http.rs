//! reqwest implementation of [`RemoteApi`] for the mobile JSON API.

use std::time::Duration;

use reqwest::{multipart, RequestBuilder, Response};
use serde::de::DeserializeOwned;

use super::remote::{GpsBatchBody, RemoteApi, RemoteHospital, RemoteVisit, VoiceNoteReceipt};
use super::SyncError;
use crate::config::SyncConfig;
use crate::models::{GpsSample, HospitalPayload, VisitPayload, VoiceNoteUpload};

const AUDIO_MIME: &str = "audio/m4a";
const AUDIO_FILE_NAME: &str = "voice_note.m4a";

/// Source of the bearer token; owned by the authentication layer.
pub trait CredentialStore: Send + Sync {
    fn bearer_token(&self) -> Option<String>;
}

/// Fixed token, e.g. from `FIELDSYNC_API_TOKEN`.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    token: Option<String>,
}

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }
}

impl CredentialStore for StaticCredentials {
    fn bearer_token(&self) -> Option<String> {
        self.token.clone()
    }
}

/// HTTP client for the mobile API.
pub struct HttpRemoteApi<C: CredentialStore = StaticCredentials> {
    base_url: String,
    client: reqwest::Client,
    credentials: C,
}

impl<C: CredentialStore> HttpRemoteApi<C> {
    /// `base_url` includes the API prefix, e.g. `https://host/api/mobile`.
    pub fn new(base_url: &str, timeout: Duration, credentials: C) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Transport(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            credentials,
        })
    }

    pub fn from_config(config: &SyncConfig, credentials: C) -> Result<Self, SyncError> {
        Self::new(&config.api_base_url, config.request_timeout, credentials)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, SyncError> {
        let request = match self.credentials.bearer_token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SyncError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, SyncError> {
        let response = self.send(request).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| SyncError::Decode(e.to_string()))
    }
}

impl<C: CredentialStore> RemoteApi for HttpRemoteApi<C> {
    async fn fetch_hospitals(&self) -> Result<Vec<RemoteHospital>, SyncError> {
        self.send_json(self.client.get(self.url("/hospitals"))).await
    }

    async fn fetch_visits(&self) -> Result<Vec<RemoteVisit>, SyncError> {
        self.send_json(self.client.get(self.url("/visit-events"))).await
    }

    async fn create_visit(&self, visit: &VisitPayload) -> Result<(), SyncError> {
        self.send(self.client.post(self.url("/visit-events")).json(visit))
            .await?;
        Ok(())
    }

    async fn update_visit(&self, visit: &VisitPayload) -> Result<(), SyncError> {
        let url = self.url(&format!("/visit-events/{}", visit.id));
        self.send(self.client.put(url).json(visit)).await?;
        Ok(())
    }

    async fn delete_visit(&self, id: &str) -> Result<(), SyncError> {
        let url = self.url(&format!("/visit-events/{id}"));
        self.send(self.client.delete(url)).await?;
        Ok(())
    }

    async fn create_hospital(&self, hospital: &HospitalPayload) -> Result<(), SyncError> {
        self.send(self.client.post(self.url("/hospitals")).json(hospital))
            .await?;
        Ok(())
    }

    async fn update_hospital(&self, hospital: &HospitalPayload) -> Result<(), SyncError> {
        let url = self.url(&format!("/hospitals/{}", hospital.id));
        self.send(self.client.put(url).json(hospital)).await?;
        Ok(())
    }

    async fn upload_voice_note(&self, note: &VoiceNoteUpload) -> Result<VoiceNoteReceipt, SyncError> {
        let audio = match tokio::fs::read(&note.file_path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SyncError::MissingAudio {
                    note_id: note.voice_note_id.clone(),
                    path: note.file_path.clone(),
                });
            }
            Err(e) => return Err(SyncError::Io(e)),
        };

        let part = multipart::Part::bytes(audio)
            .file_name(AUDIO_FILE_NAME)
            .mime_str(AUDIO_MIME)?;
        let form = multipart::Form::new()
            .part("audio", part)
            .text("visitEventId", note.visit_id.clone())
            .text("duration", note.duration_ms.to_string());

        self.send_json(self.client.post(self.url("/voice-notes")).multipart(form))
            .await
    }

    async fn upload_gps_batch(&self, visit_id: &str, tracks: &[GpsSample]) -> Result<(), SyncError> {
        let url = self.url(&format!("/visit-events/{visit_id}/gps-tracks"));
        self.send(self.client.post(url).json(&GpsBatchBody { tracks }))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewVisit, VisitRecord};
    use axum::extract::{Multipart, Path, State};
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::{get, post, put};
    use axum::{Json, Router};
    use chrono::Utc;
    use std::sync::{Arc, Mutex};
    use tokio::net::TcpListener;

    type Log = Arc<Mutex<Vec<String>>>;

    const TOKEN: &str = "test-token";

    fn authorized(headers: &HeaderMap) -> bool {
        headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v == format!("Bearer {TOKEN}"))
    }

    async fn hospitals(headers: HeaderMap) -> Result<Json<serde_json::Value>, StatusCode> {
        if !authorized(&headers) {
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(Json(serde_json::json!([
            { "id": "H1", "name": "University Hospital", "city": "Bratislava", "countryCode": "SK" }
        ])))
    }

    async fn visits() -> Json<serde_json::Value> {
        Json(serde_json::json!([
            { "id": "v-1", "hospitalId": "H1", "status": "completed", "remark": "ok" }
        ]))
    }

    async fn create_visit(State(log): State<Log>, Json(body): Json<serde_json::Value>) -> StatusCode {
        log.lock().unwrap().push(format!("POST visit {}", body["id"].as_str().unwrap_or("")));
        StatusCode::CREATED
    }

    async fn update_visit(
        State(log): State<Log>,
        Path(id): Path<String>,
        Json(body): Json<serde_json::Value>,
    ) -> StatusCode {
        log.lock().unwrap().push(format!("PUT visit {id} status={}", body["status"]));
        StatusCode::OK
    }

    async fn delete_visit(State(log): State<Log>, Path(id): Path<String>) -> StatusCode {
        log.lock().unwrap().push(format!("DELETE visit {id}"));
        StatusCode::NO_CONTENT
    }

    async fn voice_note(State(log): State<Log>, mut multipart: Multipart) -> Json<serde_json::Value> {
        while let Some(field) = multipart.next_field().await.unwrap() {
            let name = field.name().unwrap_or("").to_string();
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let data = field.bytes().await.unwrap();
            let entry = match name.as_str() {
                "audio" => format!(
                    "audio {} {} {}",
                    file_name.unwrap_or_default(),
                    content_type.unwrap_or_default(),
                    data.len()
                ),
                _ => format!("{name}={}", String::from_utf8_lossy(&data)),
            };
            log.lock().unwrap().push(entry);
        }
        Json(serde_json::json!({ "id": "srv-9", "transcription": "Met the pharmacist." }))
    }

    async fn gps_tracks(
        State(log): State<Log>,
        Path(id): Path<String>,
        Json(body): Json<serde_json::Value>,
    ) -> StatusCode {
        let count = body["tracks"].as_array().map(Vec::len).unwrap_or(0);
        log.lock().unwrap().push(format!("GPS {id} {count}"));
        StatusCode::OK
    }

    async fn broken() -> (StatusCode, &'static str) {
        (StatusCode::INTERNAL_SERVER_ERROR, "database down")
    }

    async fn slow() -> Json<serde_json::Value> {
        tokio::time::sleep(Duration::from_secs(2)).await;
        Json(serde_json::json!([]))
    }

    async fn spawn_server() -> (String, Log) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let app = Router::new()
            .route("/api/mobile/hospitals", get(hospitals).post(broken))
            .route("/api/mobile/visit-events", get(visits).post(create_visit))
            .route(
                "/api/mobile/visit-events/:id",
                put(update_visit).delete(delete_visit),
            )
            .route("/api/mobile/visit-events/:id/gps-tracks", post(gps_tracks))
            .route("/api/mobile/voice-notes", post(voice_note))
            .route("/slow/hospitals", get(slow))
            .with_state(log.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}"), log)
    }

    fn client(base: &str, token: Option<&str>) -> HttpRemoteApi {
        HttpRemoteApi::new(
            &format!("{base}/api/mobile/"),
            Duration::from_secs(5),
            StaticCredentials::new(token.map(str::to_string)),
        )
        .unwrap()
    }

    fn payload() -> VisitPayload {
        let mut visit = VisitRecord::scheduled("v-7", NewVisit::default());
        visit.status = crate::models::VisitStatus::InProgress;
        VisitPayload::from(&visit)
    }

    #[tokio::test]
    async fn fetch_hospitals_sends_bearer_token() {
        let (base, _log) = spawn_server().await;
        let api = client(&base, Some(TOKEN));
        assert_eq!(api.base_url(), format!("{base}/api/mobile"));

        let hospitals = api.fetch_hospitals().await.unwrap();
        assert_eq!(hospitals.len(), 1);
        assert_eq!(hospitals[0].country_code.as_deref(), Some("SK"));

        let anonymous = client(&base, None);
        let err = anonymous.fetch_hospitals().await.unwrap_err();
        assert!(matches!(err, SyncError::Http { status: 401, .. }));
    }

    #[tokio::test]
    async fn fetch_visits_maps_legacy_fields() {
        let (base, _log) = spawn_server().await;
        let visits = client(&base, Some(TOKEN)).fetch_visits().await.unwrap();
        assert_eq!(visits[0].notes.as_deref(), Some("ok"));
    }

    #[tokio::test]
    async fn visit_mutations_hit_expected_routes() {
        let (base, log) = spawn_server().await;
        let api = client(&base, Some(TOKEN));
        let visit = payload();

        api.create_visit(&visit).await.unwrap();
        api.update_visit(&visit).await.unwrap();
        api.delete_visit("v-7").await.unwrap();

        let log = log.lock().unwrap().clone();
        assert_eq!(
            log,
            vec![
                "POST visit v-7".to_string(),
                "PUT visit v-7 status=\"in_progress\"".to_string(),
                "DELETE visit v-7".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn server_error_keeps_status_and_body() {
        let (base, _log) = spawn_server().await;
        let api = client(&base, Some(TOKEN));
        let hospital = HospitalPayload {
            id: "H9".into(),
            name: "New Clinic".into(),
            city: None,
            address: None,
            country_code: None,
            contact_person: None,
            phone: None,
            email: None,
        };
        match api.create_hospital(&hospital).await.unwrap_err() {
            SyncError::Http { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, "database down");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn voice_note_upload_is_multipart() {
        let (base, log) = spawn_server().await;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("note.m4a");
        std::fs::write(&path, vec![7u8; 64]).unwrap();

        let receipt = client(&base, Some(TOKEN))
            .upload_voice_note(&VoiceNoteUpload {
                voice_note_id: "n-1".into(),
                visit_id: "v-7".into(),
                file_path: path.to_string_lossy().into_owned(),
                duration_ms: 4200,
            })
            .await
            .unwrap();
        assert_eq!(receipt.transcription.as_deref(), Some("Met the pharmacist."));

        let log = log.lock().unwrap().clone();
        assert!(log.contains(&"audio voice_note.m4a audio/m4a 64".to_string()));
        assert!(log.contains(&"visitEventId=v-7".to_string()));
        assert!(log.contains(&"duration=4200".to_string()));
    }

    #[tokio::test]
    async fn missing_audio_fails_before_request() {
        let (base, log) = spawn_server().await;
        let err = client(&base, Some(TOKEN))
            .upload_voice_note(&VoiceNoteUpload {
                voice_note_id: "n-1".into(),
                visit_id: "v-7".into(),
                file_path: "/nonexistent/recording.m4a".into(),
                duration_ms: 1000,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingAudio { .. }));
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn gps_batch_posts_tracks() {
        let (base, log) = spawn_server().await;
        let tracks: Vec<GpsSample> = (1..=3)
            .map(|id| GpsSample {
                id,
                visit_record_id: "v-7".into(),
                latitude: 48.15,
                longitude: 17.11,
                accuracy: 5.0,
                timestamp: Utc::now(),
            })
            .collect();
        client(&base, Some(TOKEN))
            .upload_gps_batch("v-7", &tracks)
            .await
            .unwrap();
        assert_eq!(log.lock().unwrap().clone(), vec!["GPS v-7 3".to_string()]);
    }

    #[tokio::test]
    async fn refused_connection_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = client(&format!("http://{addr}"), None)
            .fetch_hospitals()
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Transport(_)), "got {err:?}");
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn slow_server_times_out() {
        let (base, _log) = spawn_server().await;
        let api = HttpRemoteApi::new(
            &format!("{base}/slow"),
            Duration::from_millis(200),
            StaticCredentials::default(),
        )
        .unwrap();
        let err = api.fetch_hospitals().await.unwrap_err();
        assert!(matches!(err, SyncError::Timeout(_)), "got {err:?}");
    }
}
