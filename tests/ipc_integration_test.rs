#![cfg(unix)]

// Integration tests for the automation endpoint: a real supervisor behind a Unix socket

use devhub::config::{DevhubConfig, ServiceConfig, SupervisorSettings};
use devhub::control::ControlAction;
use devhub::daemon::Supervisor;
use devhub::error::{DevhubError, ErrorKind};
use devhub::ipc::{Command, IpcClient, LogOptions, ResponseData, SearchOptions};
use devhub::service::ServiceState;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::TempDir;

fn test_config() -> DevhubConfig {
    let mut greeter = ServiceConfig::new("greeter", "/bin/sh").with_args([
        "-c",
        "echo hello; echo warning: disk low; echo goodbye; sleep 30",
    ]);
    greeter.autostart = true;

    DevhubConfig {
        settings: SupervisorSettings {
            sample_interval_ms: 100,
            snapshot_interval_ms: 100,
            shutdown_timeout_ms: 1000,
            kill_timeout_ms: 1000,
            ..SupervisorSettings::default()
        },
        services: vec![
            greeter,
            ServiceConfig::new("idle", "/bin/sleep").with_args(["30"]),
        ],
    }
}

/// Run a blocking client call off the async runtime
async fn call(socket: PathBuf, command: Command) -> devhub::ipc::Response {
    tokio::task::spawn_blocking(move || {
        IpcClient::with_socket_path(socket)
            .send_command(command)
            .unwrap()
    })
    .await
    .unwrap()
}

async fn wait_for(socket: &PathBuf, name: &str, state: ServiceState) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let response = call(
            socket.clone(),
            Command::Get {
                name: name.to_string(),
            },
        )
        .await;
        if let Ok(ResponseData::Service(info)) = response.result {
            if info.state == state {
                return;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{} never reached {}",
            name,
            state
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

async fn wait_for_lines(socket: &PathBuf, name: &str, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let response = call(
            socket.clone(),
            Command::Logs(LogOptions {
                name: name.to_string(),
                lines: None,
                offset: None,
            }),
        )
        .await;
        if let Ok(ResponseData::Logs(lines)) = response.result {
            if lines.len() >= count {
                return;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "{} never printed {} lines",
            name,
            count
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_endpoint_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let socket = temp_dir.path().join("devhub.sock");

    let supervisor = Supervisor::start(test_config(), Some(socket.as_path())).await.unwrap();
    assert!(socket.exists());

    // list
    let response = call(socket.clone(), Command::List).await;
    match response.result.unwrap() {
        ResponseData::ServiceList(services) => {
            let names: Vec<&str> = services.iter().map(|s| s.name.as_str()).collect();
            assert_eq!(names, vec!["greeter", "idle"]);
        }
        other => panic!("Unexpected reply: {:?}", other),
    }

    wait_for(&socket, "greeter", ServiceState::Running).await;
    wait_for_lines(&socket, "greeter", 3).await;

    // logs with defaults and with an offset
    let response = call(
        socket.clone(),
        Command::Logs(LogOptions {
            name: "greeter".to_string(),
            lines: None,
            offset: None,
        }),
    )
    .await;
    assert_eq!(
        response.result.unwrap(),
        ResponseData::Logs(vec![
            "hello".to_string(),
            "warning: disk low".to_string(),
            "goodbye".to_string(),
        ])
    );

    let response = call(
        socket.clone(),
        Command::Logs(LogOptions {
            name: "greeter".to_string(),
            lines: Some(1),
            offset: Some(1),
        }),
    )
    .await;
    assert_eq!(
        response.result.unwrap(),
        ResponseData::Logs(vec!["warning: disk low".to_string()])
    );

    // search
    let response = call(
        socket.clone(),
        Command::Search(SearchOptions {
            name: "greeter".to_string(),
            pattern: "WARNING".to_string(),
            context_lines: Some(1),
            max_results: None,
        }),
    )
    .await;
    match response.result.unwrap() {
        ResponseData::Matches(matches) => {
            assert_eq!(matches.len(), 1);
            let lines: Vec<&str> = matches[0].lines.iter().map(|e| e.line.as_str()).collect();
            assert_eq!(lines, vec!["hello", "warning: disk low", "goodbye"]);
            assert_eq!(matches[0].match_index, 1);
        }
        other => panic!("Unexpected reply: {:?}", other),
    }

    // control
    let response = call(
        socket.clone(),
        Command::Control {
            name: "idle".to_string(),
            action: ControlAction::Start,
        },
    )
    .await;
    assert_eq!(
        response.result.unwrap(),
        ResponseData::Done {
            name: "idle".to_string(),
            action: ControlAction::Start,
        }
    );
    wait_for(&socket, "idle", ServiceState::Running).await;

    let response = call(
        socket.clone(),
        Command::Health {
            name: "idle".to_string(),
        },
    )
    .await;
    match response.result.unwrap() {
        ResponseData::Health(report) => {
            assert_eq!(report.service.state, ServiceState::Running);
            assert!(report.uptime_secs.is_some());
        }
        other => panic!("Unexpected reply: {:?}", other),
    }

    supervisor.shutdown().await;
    assert!(!socket.exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_endpoint_error_kinds() {
    let temp_dir = TempDir::new().unwrap();
    let socket = temp_dir.path().join("devhub.sock");

    let supervisor = Supervisor::start(test_config(), Some(socket.as_path())).await.unwrap();

    let response = call(
        socket.clone(),
        Command::Get {
            name: "missing".to_string(),
        },
    )
    .await;
    let reply = response.result.unwrap_err();
    assert_eq!(reply.kind, ErrorKind::NotFound);
    assert!(reply.message.contains("missing"));

    let response = call(
        socket.clone(),
        Command::Control {
            name: "greeter".to_string(),
            action: ControlAction::Start,
        },
    )
    .await;
    assert_eq!(response.result.unwrap_err().kind, ErrorKind::AlreadyRunning);

    let response = call(
        socket.clone(),
        Command::Logs(LogOptions {
            name: "missing".to_string(),
            lines: None,
            offset: None,
        }),
    )
    .await;
    assert_eq!(response.result.unwrap_err().kind, ErrorKind::NotFound);

    // The CLI-facing call turns replies back into typed errors
    let client_socket = socket.clone();
    let result = tokio::task::spawn_blocking(move || {
        IpcClient::with_socket_path(client_socket).request(Command::Control {
            name: "greeter".to_string(),
            action: ControlAction::Start,
        })
    })
    .await
    .unwrap();
    assert!(matches!(result, Err(DevhubError::AlreadyRunning(name)) if name == "greeter"));

    supervisor.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_client_reports_missing_supervisor() {
    let temp_dir = TempDir::new().unwrap();
    let socket = temp_dir.path().join("devhub.sock");

    let result = tokio::task::spawn_blocking(move || {
        IpcClient::with_socket_path(socket).request(Command::List)
    })
    .await
    .unwrap();

    assert!(matches!(result, Err(DevhubError::DaemonNotRunning)));
}
