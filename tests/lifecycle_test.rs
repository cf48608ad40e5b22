// Integration tests for service lifecycle as seen through published snapshots

use devhub::config::{ServiceConfig, SupervisorSettings};
use devhub::service::{ServiceManager, ServiceState};
use devhub::state::{Snapshot, StateManager};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn fast_settings() -> SupervisorSettings {
    SupervisorSettings {
        sample_interval_ms: 100,
        snapshot_interval_ms: 100,
        restart_grace_ms: 2000,
        shutdown_timeout_ms: 1000,
        kill_timeout_ms: 1000,
        log_capacity: 200,
    }
}

fn sh(name: &str, script: &str) -> ServiceConfig {
    ServiceConfig::new(name, "/bin/sh").with_args(["-c", script])
}

/// Wait for a snapshot in which `name` is in `state`
async fn snapshot_with(
    state: &StateManager,
    name: &str,
    wanted: ServiceState,
    timeout: Duration,
) -> Arc<Snapshot> {
    snapshot_matching(state, timeout, |snapshot| {
        snapshot.get(name).map(|s| s.state) == Some(wanted)
    })
    .await
}

async fn snapshot_matching<F>(state: &StateManager, timeout: Duration, accept: F) -> Arc<Snapshot>
where
    F: Fn(&Snapshot) -> bool,
{
    let mut updates = state.subscribe();
    tokio::time::timeout(timeout, async {
        loop {
            let snapshot = updates.borrow_and_update().clone();
            if accept(&snapshot) {
                return snapshot;
            }
            updates.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("no matching snapshot within {:?}", timeout))
}

#[tokio::test]
async fn test_crash_is_reported_in_snapshots() {
    let manager =
        ServiceManager::new(vec![sh("web", "sleep 1; exit 1")], fast_settings()).unwrap();
    let state = StateManager::new(manager.clone());
    state.start().await.unwrap();

    manager.start_service("web").await.unwrap();

    let running = snapshot_with(&state, "web", ServiceState::Running, Duration::from_secs(2)).await;
    let web = running.get("web").unwrap();
    assert!(web.pid.is_some());
    assert!(web.started_at.is_some());
    assert!(web.error_msg.is_none());

    let crashed = snapshot_with(&state, "web", ServiceState::Crashed, Duration::from_secs(5)).await;
    let web = crashed.get("web").unwrap();
    let error = web.error_msg.clone().unwrap();
    assert!(!error.is_empty());
    assert!(error.contains("code 1"));
    assert!(web.pid.is_none());

    state.stop().await;
    manager.shutdown().await;
}

#[tokio::test]
async fn test_one_crash_does_not_disturb_other_services() {
    let manager = ServiceManager::new(
        vec![
            sh("flaky", "exit 7"),
            ServiceConfig::new("steady", "/bin/sleep").with_args(["30"]),
        ],
        fast_settings(),
    )
    .unwrap();
    let state = StateManager::new(manager.clone());
    state.start().await.unwrap();

    manager.start_service("steady").await.unwrap();
    manager.start_service("flaky").await.unwrap();

    snapshot_with(&state, "flaky", ServiceState::Crashed, Duration::from_secs(3)).await;
    let snapshot =
        snapshot_with(&state, "steady", ServiceState::Running, Duration::from_secs(3)).await;
    let steady = snapshot.get("steady").unwrap();
    assert!(steady.error_msg.is_none());
    assert!(steady.pid.is_some());

    state.stop().await;
    manager.shutdown().await;
}

#[tokio::test]
async fn test_stop_kills_whole_process_group() {
    // The leader's children share its group and get the same kill
    let manager = ServiceManager::new(
        vec![sh("tree", "sleep 30 & sleep 30 & echo ready; wait")],
        fast_settings(),
    )
    .unwrap();
    let state = StateManager::new(manager.clone());
    state.start().await.unwrap();

    manager.start_service("tree").await.unwrap();
    snapshot_with(&state, "tree", ServiceState::Running, Duration::from_secs(3)).await;

    manager.stop_service("tree").await.unwrap();
    let snapshot =
        snapshot_with(&state, "tree", ServiceState::Stopped, Duration::from_secs(3)).await;
    assert!(snapshot.get("tree").unwrap().error_msg.is_none());

    state.stop().await;
    manager.shutdown().await;
}

#[tokio::test]
async fn test_restart_cycle() {
    let manager = ServiceManager::new(
        vec![sh("api", "echo booted; sleep 30")],
        fast_settings(),
    )
    .unwrap();
    let state = StateManager::new(manager.clone());
    state.start().await.unwrap();

    manager.start_service("api").await.unwrap();
    let first = snapshot_with(&state, "api", ServiceState::Running, Duration::from_secs(3)).await;
    let first_pid = first.get("api").unwrap().pid;

    manager.restart_service("api").await.unwrap();
    let second = snapshot_matching(&state, Duration::from_secs(3), |snapshot| {
        snapshot
            .get("api")
            .map(|s| s.state == ServiceState::Running && s.pid != first_pid)
            .unwrap_or(false)
    })
    .await;
    let second_pid = second.get("api").unwrap().pid;

    assert!(first_pid.is_some());
    assert!(second_pid.is_some());

    // Output of both runs lands in the same buffer
    let logs = manager.logs("api").await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        let booted = logs
            .lock()
            .await
            .search("booted", 0, 10)
            .len();
        if booted == 2 {
            break;
        }
        assert!(Instant::now() < deadline, "expected two boots, saw {}", booted);
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    state.stop().await;
    manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_is_bounded() {
    let services = vec![
        ServiceConfig::new("a", "/bin/sleep").with_args(["30"]),
        ServiceConfig::new("b", "/bin/sleep").with_args(["30"]),
        sh("stubborn", "trap '' TERM; sleep 30"),
    ];
    let settings = fast_settings();
    let manager = ServiceManager::new(services, settings.clone()).unwrap();

    for name in ["a", "b", "stubborn"] {
        manager.start_service(name).await.unwrap();
    }
    tokio::time::sleep(Duration::from_millis(200)).await;

    let started = Instant::now();
    manager.shutdown().await;
    let elapsed = started.elapsed();

    // Services are stopped concurrently, so one stubborn service costs one budget
    assert!(elapsed < settings.shutdown_budget() + Duration::from_secs(1));

    for info in manager.get_services().await {
        assert_eq!(info.state, ServiceState::Stopped, "{} not stopped", info.name);
        assert!(info.pid.is_none());
    }

    // Second call is a no-op
    let started = Instant::now();
    manager.shutdown().await;
    assert!(started.elapsed() < Duration::from_millis(100));
}
