//! Background sync scheduler: periodic and on-demand passes.
//!
//! Spawns a tokio task that runs a pass every `interval`, or sooner when
//! [`BackgroundSyncHandle::trigger`] is called. Each pass is bounded by
//! `pass_timeout`; a pass that overruns is abandoned and logged.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::coordinator::SyncCoordinator;
use super::network::NetworkMonitor;
use super::remote::RemoteApi;
use super::SyncError;

/// Handle for the background sync task.
///
/// Supports graceful shutdown via `shutdown()`; dropping the handle also
/// stops the task.
pub struct BackgroundSyncHandle {
    trigger: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl BackgroundSyncHandle {
    /// Request a pass now. Coalesces with a trigger that is already waiting.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Stop scheduling and wait for the task to finish. A running pass is
    /// allowed to complete (within its timeout).
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Background sync task ended abnormally");
            }
        }
    }
}

impl Drop for BackgroundSyncHandle {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Start the background scheduler on the current tokio runtime.
pub fn start_background_sync<A, N>(
    coordinator: Arc<SyncCoordinator<A, N>>,
    interval: Duration,
    pass_timeout: Duration,
) -> BackgroundSyncHandle
where
    A: RemoteApi + 'static,
    N: NetworkMonitor + 'static,
{
    let trigger = Arc::new(Notify::new());
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let task = tokio::spawn(scheduler_loop(
        coordinator,
        trigger.clone(),
        shutdown_rx,
        interval,
        pass_timeout,
    ));

    BackgroundSyncHandle {
        trigger,
        shutdown: shutdown_tx,
        task: Some(task),
    }
}

async fn scheduler_loop<A, N>(
    coordinator: Arc<SyncCoordinator<A, N>>,
    trigger: Arc<Notify>,
    mut shutdown: watch::Receiver<bool>,
    interval: Duration,
    pass_timeout: Duration,
) where
    A: RemoteApi,
    N: NetworkMonitor,
{
    tracing::info!(
        interval_secs = interval.as_secs(),
        pass_timeout_secs = pass_timeout.as_secs(),
        "Background sync started"
    );

    let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
            _ = trigger.notified() => {
                ticker.reset();
            }
        }
        if *shutdown.borrow() {
            break;
        }
        run_bounded_pass(&coordinator, pass_timeout).await;
    }

    tracing::info!("Background sync shutting down");
}

async fn run_bounded_pass<A, N>(coordinator: &SyncCoordinator<A, N>, pass_timeout: Duration)
where
    A: RemoteApi,
    N: NetworkMonitor,
{
    match tokio::time::timeout(pass_timeout, coordinator.run_pass()).await {
        Ok(Ok(_)) => {}
        Ok(Err(SyncError::Offline)) => {
            tracing::debug!("Background sync: offline");
        }
        Ok(Err(SyncError::AlreadyRunning)) => {
            tracing::debug!("Background sync: pass already running");
        }
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "Background sync pass failed");
        }
        Err(_) => {
            let e = SyncError::PassTimeout(pass_timeout);
            coordinator.status().finish_failure(e.to_string());
            tracing::error!(error = %e, "Background sync pass abandoned");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::LocalStore;
    use crate::models::{EntityType, NewVisit, OutboxAction, OutboxPayload, VisitPayload, VisitRecord};
    use crate::sync::{ManualNetworkMonitor, MockRemoteApi, RetryPolicy, SyncStatusStore};

    fn coordinator_with_pending() -> Arc<SyncCoordinator<MockRemoteApi, ManualNetworkMonitor>> {
        let store = Arc::new(LocalStore::open_in_memory().unwrap());
        let visit = VisitRecord::scheduled("v-1", NewVisit::default());
        store.upsert_visit(&visit).unwrap();
        store
            .enqueue(
                EntityType::Visit,
                "v-1",
                OutboxAction::Create,
                &OutboxPayload::Visit(VisitPayload::from(&visit)),
            )
            .unwrap();
        Arc::new(
            SyncCoordinator::new(
                store,
                MockRemoteApi::new(),
                ManualNetworkMonitor::new(true),
                SyncStatusStore::new(),
            )
            .with_policy(RetryPolicy::new(3, Duration::ZERO)),
        )
    }

    async fn wait_for_pending(coordinator: &SyncCoordinator<MockRemoteApi, ManualNetworkMonitor>, count: u64) {
        let mut rx = coordinator.status().subscribe();
        tokio::time::timeout(Duration::from_secs(5), async {
            while coordinator.store().pending_count().unwrap() != count {
                let _ = rx.changed().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn first_tick_runs_a_pass() {
        let coordinator = coordinator_with_pending();
        let handle = start_background_sync(coordinator.clone(), Duration::from_secs(3600), Duration::from_secs(5));

        wait_for_pending(&coordinator, 0).await;
        assert!(coordinator.status().snapshot().last_sync_at.is_some());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn trigger_runs_an_extra_pass() {
        let coordinator = coordinator_with_pending();
        let handle = start_background_sync(coordinator.clone(), Duration::from_secs(3600), Duration::from_secs(5));
        wait_for_pending(&coordinator, 0).await;

        let visit = VisitRecord::scheduled("v-2", NewVisit::default());
        coordinator.store().upsert_visit(&visit).unwrap();
        coordinator
            .store()
            .enqueue(
                EntityType::Visit,
                "v-2",
                OutboxAction::Create,
                &OutboxPayload::Visit(VisitPayload::from(&visit)),
            )
            .unwrap();

        handle.trigger();
        wait_for_pending(&coordinator, 0).await;
        assert_eq!(coordinator.api().push_calls().len(), 2);
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn stuck_pass_is_abandoned_and_guard_released() {
        let coordinator = coordinator_with_pending();
        let _gate = coordinator.api().stall_push();

        let pass_timeout = Duration::from_millis(50);
        run_bounded_pass(&coordinator, pass_timeout).await;

        let status = coordinator.status().snapshot();
        assert!(!status.is_syncing);
        assert_eq!(
            status.last_error,
            Some(SyncError::PassTimeout(pass_timeout).to_string())
        );
        assert_eq!(coordinator.store().pending_count().unwrap(), 1);

        coordinator.api().release_push();
        let report = coordinator.run_pass().await.unwrap();
        assert_eq!(report.push.delivered, 1);
        assert_eq!(coordinator.store().pending_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn shutdown_stops_the_task() {
        let coordinator = coordinator_with_pending();
        let handle = start_background_sync(coordinator.clone(), Duration::from_secs(3600), Duration::from_secs(5));
        wait_for_pending(&coordinator, 0).await;
        handle.shutdown().await;

        let calls = coordinator.api().calls().len();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(coordinator.api().calls().len(), calls);
    }
}
