//! Observable sync state for the UI layer.
//!
//! A `tokio::sync::watch` channel holds the latest [`SyncStatus`]; every
//! clone of [`SyncStatusStore`] publishes into the same channel.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub is_online: bool,
    pub pending_count: u64,
    /// Completion time of the last successful pass.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Message of the last failed pass; cleared when a pass starts.
    pub last_error: Option<String>,
}

impl Default for SyncStatus {
    fn default() -> Self {
        Self {
            is_syncing: false,
            is_online: true,
            pending_count: 0,
            last_sync_at: None,
            last_error: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SyncStatusStore {
    tx: Arc<watch::Sender<SyncStatus>>,
}

impl Default for SyncStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncStatusStore {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(SyncStatus::default());
        Self { tx: Arc::new(tx) }
    }

    /// Current state.
    pub fn snapshot(&self) -> SyncStatus {
        self.tx.borrow().clone()
    }

    /// Receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|s| {
            let changed = s.is_online != online;
            s.is_online = online;
            changed
        });
    }

    pub fn set_pending_count(&self, count: u64) {
        self.tx.send_if_modified(|s| {
            let changed = s.pending_count != count;
            s.pending_count = count;
            changed
        });
    }

    pub fn begin_sync(&self) {
        self.tx.send_modify(|s| {
            s.is_syncing = true;
            s.last_error = None;
        });
    }

    pub fn finish_success(&self, at: DateTime<Utc>) {
        self.tx.send_modify(|s| {
            s.is_syncing = false;
            s.last_sync_at = Some(at);
            s.last_error = None;
        });
    }

    /// Record a failed pass. `last_sync_at` keeps the last successful time.
    pub fn finish_failure(&self, message: impl Into<String>) {
        let message = message.into();
        self.tx.send_modify(|s| {
            s.is_syncing = false;
            s.last_error = Some(message);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_idle_and_online() {
        let store = SyncStatusStore::new();
        let status = store.snapshot();
        assert!(!status.is_syncing);
        assert!(status.is_online);
        assert_eq!(status.pending_count, 0);
        assert!(status.last_sync_at.is_none());
    }

    #[test]
    fn clones_share_state() {
        let store = SyncStatusStore::new();
        let other = store.clone();
        other.set_pending_count(4);
        assert_eq!(store.snapshot().pending_count, 4);
    }

    #[test]
    fn failure_keeps_last_success_time() {
        let store = SyncStatusStore::new();
        let at = Utc::now();
        store.begin_sync();
        store.finish_success(at);

        store.begin_sync();
        assert!(store.snapshot().is_syncing);
        store.finish_failure("No network connection");

        let status = store.snapshot();
        assert!(!status.is_syncing);
        assert_eq!(status.last_sync_at, Some(at));
        assert_eq!(status.last_error.as_deref(), Some("No network connection"));

        store.begin_sync();
        assert!(store.snapshot().last_error.is_none());
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let store = SyncStatusStore::new();
        let mut rx = store.subscribe();
        store.set_online(false);
        rx.changed().await.unwrap();
        assert!(!rx.borrow().is_online);

        // Unchanged value does not notify
        store.set_online(false);
        assert!(!rx.has_changed().unwrap());
    }
}
