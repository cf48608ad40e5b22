// State module - Periodic snapshots of the supervisor for readers

use crate::error::{DevhubError, Result};
use crate::service::{ServiceInfo, ServiceManager};
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Immutable copy of every service at one instant
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub services: Vec<ServiceInfo>,
    pub taken_at: DateTime<Local>,
    /// Increases by one per published snapshot; 0 before the first pull
    pub revision: u64,
}

impl Snapshot {
    fn empty() -> Self {
        Self {
            services: Vec::new(),
            taken_at: Local::now(),
            revision: 0,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ServiceInfo> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// Republishes `ServiceManager` state on a fixed interval.
///
/// Readers only ever touch the last published `Snapshot`, never the
/// supervision lock.
pub struct StateManager {
    manager: ServiceManager,
    interval: Duration,
    current: watch::Receiver<Arc<Snapshot>>,
    /// Handed to the loop on `start`
    sender: Mutex<Option<watch::Sender<Arc<Snapshot>>>>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StateManager {
    pub fn new(manager: ServiceManager) -> Self {
        let interval = manager.settings().snapshot_interval();
        Self::with_interval(manager, interval)
    }

    pub fn with_interval(manager: ServiceManager, interval: Duration) -> Self {
        let (sender, current) = watch::channel(Arc::new(Snapshot::empty()));
        Self {
            manager,
            interval,
            current,
            sender: Mutex::new(Some(sender)),
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Publish a first snapshot, then keep refreshing in the background
    pub async fn start(&self) -> Result<()> {
        let sender = self.sender.lock().await.take().ok_or_else(|| {
            DevhubError::Other("state manager already started".to_string())
        })?;

        publish(&self.manager, &sender).await;

        let task = tokio::spawn(run_snapshots(
            self.manager.clone(),
            sender,
            self.interval,
            self.cancel.clone(),
        ));
        *self.task.lock().await = Some(task);

        debug!("State manager started (interval {:?})", self.interval);
        Ok(())
    }

    /// Cancel the loop and release subscribers. Idempotent.
    pub async fn stop(&self) {
        self.cancel.cancel();

        // Never started: dropping the sender still ends subscriptions
        self.sender.lock().await.take();

        if let Some(task) = self.task.lock().await.take() {
            let _ = task.await;
            debug!("State manager stopped");
        }
    }

    /// The last published snapshot
    pub fn get_services(&self) -> Arc<Snapshot> {
        self.current.borrow().clone()
    }

    /// Receiver that wakes on every new snapshot; closes on `stop`
    pub fn subscribe(&self) -> watch::Receiver<Arc<Snapshot>> {
        self.current.clone()
    }
}

async fn publish(manager: &ServiceManager, sender: &watch::Sender<Arc<Snapshot>>) {
    let services = manager.get_services().await;
    let revision = sender.borrow().revision + 1;

    sender.send_replace(Arc::new(Snapshot {
        services,
        taken_at: Local::now(),
        revision,
    }));
}

async fn run_snapshots(
    manager: ServiceManager,
    sender: watch::Sender<Arc<Snapshot>>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately and start() already published
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => publish(&manager, &sender).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServiceConfig, SupervisorSettings};
    use crate::service::ServiceState;

    fn test_manager() -> ServiceManager {
        let settings = SupervisorSettings {
            sample_interval_ms: 50,
            snapshot_interval_ms: 50,
            ..SupervisorSettings::default()
        };
        let services = vec![
            ServiceConfig::new("web", "/bin/sleep").with_args(["30"]),
            ServiceConfig::new("api", "/bin/sleep").with_args(["30"]),
        ];
        ServiceManager::new(services, settings).unwrap()
    }

    #[tokio::test]
    async fn test_start_publishes_first_snapshot() {
        let manager = test_manager();
        let state = StateManager::new(manager.clone());
        assert_eq!(state.get_services().revision, 0);
        assert!(state.get_services().services.is_empty());

        state.start().await.unwrap();

        let snapshot = state.get_services();
        assert_eq!(snapshot.revision, 1);
        assert_eq!(snapshot.services.len(), 2);
        assert_eq!(snapshot.get("web").unwrap().state, ServiceState::Stopped);
        assert!(snapshot.get("nope").is_none());

        state.stop().await;
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let manager = test_manager();
        let state = StateManager::new(manager.clone());

        state.start().await.unwrap();
        assert!(state.start().await.is_err());

        state.stop().await;
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_snapshot_follows_manager() {
        let manager = test_manager();
        let state = StateManager::new(manager.clone());
        state.start().await.unwrap();

        let held = state.get_services();
        manager.start_service("web").await.unwrap();

        let mut updates = state.subscribe();
        let snapshot = tokio::time::timeout(Duration::from_secs(3), async {
            loop {
                updates.changed().await.unwrap();
                let snapshot = updates.borrow_and_update().clone();
                if snapshot.get("web").map(|s| s.state) == Some(ServiceState::Running) {
                    return snapshot;
                }
            }
        })
        .await
        .unwrap();

        assert!(snapshot.revision > held.revision);
        // Earlier snapshots are never mutated
        assert_eq!(held.get("web").unwrap().state, ServiceState::Stopped);

        state.stop().await;
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_releases_subscribers_and_keeps_last_snapshot() {
        let manager = test_manager();
        let state = StateManager::new(manager.clone());
        state.start().await.unwrap();

        let mut updates = state.subscribe();
        state.stop().await;
        state.stop().await;

        // Drain a pending change, then the channel reports closed
        let _ = updates.borrow_and_update();
        let closed = tokio::time::timeout(Duration::from_secs(1), updates.changed())
            .await
            .unwrap();
        assert!(closed.is_err());

        let last = state.get_services();
        assert!(last.revision >= 1);
        assert_eq!(last.services.len(), 2);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let manager = test_manager();
        let state = StateManager::new(manager.clone());

        let mut updates = state.subscribe();
        state.stop().await;
        assert!(updates.changed().await.is_err());

        manager.shutdown().await;
    }
}
