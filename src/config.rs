use std::path::PathBuf;
use std::time::Duration;

/// Application-level constants
pub const APP_NAME: &str = "Fieldsync";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Local database file name inside the data directory.
pub const DB_FILE_NAME: &str = "fieldsync.db";

/// Remote API base URL used when `FIELDSYNC_API_URL` is not set.
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:5000/api/mobile";

/// Per-request timeout for the remote API (30 seconds).
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Background sync interval (60 seconds).
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 60;

/// Upper bound for one whole sync pass (5 minutes).
pub const DEFAULT_PASS_TIMEOUT_SECS: u64 = 300;

/// GPS sampling interval while a visit is in progress (30 seconds).
pub const DEFAULT_GPS_INTERVAL_SECS: u64 = 30;

/// Minimum displacement that triggers a GPS sample (50 meters).
pub const DEFAULT_GPS_MIN_DISPLACEMENT_M: f64 = 50.0;

/// Outbox entries replayed per push phase.
pub const OUTBOX_BATCH_SIZE: usize = 50;

/// Delivery attempts before an outbox entry is abandoned.
pub const MAX_RETRIES: u32 = 3;

/// First backoff delay after a failed delivery (5 seconds).
pub const RETRY_BASE_DELAY_MS: u64 = 5_000;

/// Get the application data directory (~/Fieldsync/)
pub fn app_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_NAME)
}

/// Default location of the local store.
pub fn default_db_path() -> PathBuf {
    app_data_dir().join(DB_FILE_NAME)
}

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    "fieldsync=info,fieldsync_lib=info,warn"
}

/// Runtime configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the mobile API, including its path prefix.
    pub api_base_url: String,
    /// Bearer token handed to the credential store at startup, if any.
    pub api_token: Option<String>,
    pub db_path: PathBuf,
    pub request_timeout: Duration,
    pub sync_interval: Duration,
    pub pass_timeout: Duration,
    pub gps_interval: Duration,
    pub gps_min_displacement_m: f64,
    pub outbox_batch_size: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            api_token: None,
            db_path: default_db_path(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            sync_interval: Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            pass_timeout: Duration::from_secs(DEFAULT_PASS_TIMEOUT_SECS),
            gps_interval: Duration::from_secs(DEFAULT_GPS_INTERVAL_SECS),
            gps_min_displacement_m: DEFAULT_GPS_MIN_DISPLACEMENT_M,
            outbox_batch_size: OUTBOX_BATCH_SIZE,
            max_retries: MAX_RETRIES,
            retry_base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
        }
    }
}

impl SyncConfig {
    /// Build a config from `FIELDSYNC_*` environment variables.
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(url) = lookup("FIELDSYNC_API_URL").filter(|u| !u.trim().is_empty()) {
            config.api_base_url = url.trim().trim_end_matches('/').to_string();
        }
        config.api_token = lookup("FIELDSYNC_API_TOKEN").filter(|t| !t.is_empty());
        if let Some(path) = lookup("FIELDSYNC_DB_PATH").filter(|p| !p.is_empty()) {
            config.db_path = PathBuf::from(path);
        }
        if let Some(secs) = parse_secs(lookup("FIELDSYNC_SYNC_INTERVAL_SECS")) {
            config.sync_interval = secs;
        }
        if let Some(secs) = parse_secs(lookup("FIELDSYNC_REQUEST_TIMEOUT_SECS")) {
            config.request_timeout = secs;
        }

        config
    }
}

fn parse_secs(value: Option<String>) -> Option<Duration> {
    value?
        .trim()
        .parse::<u64>()
        .ok()
        .filter(|s| *s > 0)
        .map(Duration::from_secs)
}
