pub mod config;
pub mod db;
pub mod gps;
pub mod hospitals;
pub mod lifecycle;
pub mod models;
pub mod sync;

use std::sync::Arc;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

use db::{DatabaseError, LocalStore};
use sync::{
    start_background_sync, HttpRemoteApi, ReachabilityProbe, StaticCredentials, SyncCoordinator,
    SyncError, SyncStatusStore,
};

/// Failures that stop a session before or while it runs.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Sync error: {0}")]
    Sync(#[from] SyncError),

    #[error("API base URL has no host: {0}")]
    InvalidApiUrl(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Entry point of the `fieldsync` binary.
///
/// Panics only if the tokio runtime cannot be built.
pub fn run() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::default_log_filter())),
        )
        .init();

    tracing::info!("{} starting v{}", config::APP_NAME, config::APP_VERSION);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to start the tokio runtime");

    if let Err(e) = runtime.block_on(run_session(config::SyncConfig::from_env())) {
        tracing::error!(error = %e, "Session ended with an error");
        std::process::exit(1);
    }
}

/// Open the store, sync in the background until Ctrl-C, then close the store.
pub async fn run_session(config: config::SyncConfig) -> Result<(), SessionError> {
    let store = Arc::new(LocalStore::open(&config.db_path)?);

    let api = HttpRemoteApi::from_config(&config, StaticCredentials::new(config.api_token.clone()))?;
    let network = ReachabilityProbe::for_url(&config.api_base_url, config.request_timeout)
        .ok_or_else(|| SessionError::InvalidApiUrl(config.api_base_url.clone()))?;

    let status = SyncStatusStore::new();
    status.set_pending_count(store.pending_count()?);

    let coordinator = Arc::new(SyncCoordinator::from_config(
        store.clone(),
        api,
        network,
        status.clone(),
        &config,
    ));
    let background = start_background_sync(coordinator, config.sync_interval, config.pass_timeout);

    tracing::info!(
        api = %config.api_base_url,
        db = %config.db_path.display(),
        pending = status.snapshot().pending_count,
        "Session started"
    );

    let shutdown = tokio::signal::ctrl_c().await;
    background.shutdown().await;
    store.close()?;
    tracing::info!("Session closed");
    shutdown?;
    Ok(())
}
