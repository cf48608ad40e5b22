// Daemon module - Foreground supervisor host wiring every component together

use crate::config::DevhubConfig;
use crate::control::{Control, DEFAULT_CONTEXT_LINES, DEFAULT_LOG_LINES, DEFAULT_MAX_RESULTS};
use crate::error::Result;
use crate::service::{HealthStatus, ServiceManager, ServiceState};
use crate::state::{Snapshot, StateManager};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[cfg(unix)]
use crate::ipc::{Command, IpcServer, ResponseData};
#[cfg(unix)]
use std::path::PathBuf;
#[cfg(unix)]
use tokio_util::sync::CancellationToken;

#[cfg(unix)]
struct Endpoint {
    socket_path: PathBuf,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// A running supervisor: services, snapshots, change log and endpoint
pub struct Supervisor {
    manager: ServiceManager,
    state: Arc<StateManager>,
    control: Control,
    watcher: JoinHandle<()>,
    #[cfg(unix)]
    endpoint: Option<Endpoint>,
}

impl Supervisor {
    /// Bring everything up. With `socket_path` set (unix only) the automation
    /// endpoint listens there.
    pub async fn start(config: DevhubConfig, socket_path: Option<&Path>) -> Result<Self> {
        let DevhubConfig { settings, services } = config;
        let manager = ServiceManager::new(services, settings)?;

        let started = manager.start_autostart().await;
        info!("Started {} autostart service(s)", started);

        let state = Arc::new(StateManager::new(manager.clone()));
        state.start().await?;
        let control = Control::new(manager.clone(), Arc::clone(&state));

        let watcher = tokio::spawn(log_changes(state.subscribe()));

        #[cfg(unix)]
        let endpoint = match socket_path {
            Some(path) => match serve(path, control.clone()) {
                Ok(endpoint) => Some(endpoint),
                Err(e) => {
                    state.stop().await;
                    manager.shutdown().await;
                    return Err(e);
                }
            },
            None => None,
        };
        #[cfg(not(unix))]
        if socket_path.is_some() {
            tracing::warn!("The automation endpoint is only available on unix");
        }

        Ok(Self {
            manager,
            state,
            control,
            watcher,
            #[cfg(unix)]
            endpoint,
        })
    }

    pub fn control(&self) -> &Control {
        &self.control
    }

    pub fn manager(&self) -> &ServiceManager {
        &self.manager
    }

    /// Stop snapshots and the endpoint, then every service
    pub async fn shutdown(self) {
        info!("Shutting down supervisor");

        self.state.stop().await;
        // Subscription closed by the state manager
        let _ = self.watcher.await;

        #[cfg(unix)]
        if let Some(endpoint) = self.endpoint {
            endpoint.cancel.cancel();
            let _ = endpoint.task.await;
            info!("Automation endpoint at {} closed", endpoint.socket_path.display());
        }

        self.manager.shutdown().await;
        info!("Supervisor stopped");
    }
}

/// Run a supervisor for `config_path` until Ctrl-C or SIGTERM
pub async fn run(config_path: &Path, socket_path: &Path) -> Result<()> {
    let config = DevhubConfig::from_file(config_path)?;
    info!(
        "Loaded {} service(s) from {}",
        config.services.len(),
        config_path.display()
    );

    let supervisor = Supervisor::start(config, Some(socket_path)).await?;

    let outcome = wait_for_signal().await;
    if let Err(ref e) = outcome {
        error!("Signal handling failed: {}", e);
    }

    supervisor.shutdown().await;
    outcome
}

/// Answer one automation command through the control surface
#[cfg(unix)]
pub async fn dispatch(control: &Control, command: Command) -> Result<ResponseData> {
    match command {
        Command::List => Ok(ResponseData::ServiceList(control.list())),
        Command::Get { name } => Ok(ResponseData::Service(control.get(&name)?)),
        Command::Health { name } => Ok(ResponseData::Health(control.health(&name)?)),
        Command::Logs(options) => {
            let lines = control
                .logs(
                    &options.name,
                    options.lines.unwrap_or(DEFAULT_LOG_LINES),
                    options.offset.unwrap_or(0),
                )
                .await?;
            Ok(ResponseData::Logs(lines))
        }
        Command::Search(options) => {
            let matches = control
                .search(
                    &options.name,
                    &options.pattern,
                    options.context_lines.unwrap_or(DEFAULT_CONTEXT_LINES),
                    options.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
                )
                .await?;
            Ok(ResponseData::Matches(matches))
        }
        Command::Control { name, action } => {
            control.control(&name, action).await?;
            Ok(ResponseData::Done { name, action })
        }
    }
}

#[cfg(unix)]
fn serve(socket_path: &Path, control: Control) -> Result<Endpoint> {
    let mut server = IpcServer::with_socket_path(socket_path);
    server.start()?;
    info!("Automation endpoint listening on {}", socket_path.display());

    let cancel = server.shutdown_token();
    let task = tokio::spawn(async move {
        let result = server
            .run(move |command| {
                let control = control.clone();
                async move { dispatch(&control, command).await }
            })
            .await;

        if let Err(e) = result {
            error!("Automation endpoint error: {}", e);
        }
    });

    Ok(Endpoint {
        socket_path: socket_path.to_path_buf(),
        cancel,
        task,
    })
}

/// Log every state or health change seen in published snapshots
async fn log_changes(mut updates: watch::Receiver<Arc<Snapshot>>) {
    let mut seen: HashMap<String, (ServiceState, HealthStatus)> = HashMap::new();

    loop {
        let snapshot = updates.borrow_and_update().clone();

        for service in &snapshot.services {
            let current = (service.state, service.health);
            let previous = seen.insert(service.name.clone(), current);

            match previous {
                Some(previous) if previous == current => {}
                Some((state, _)) if state != service.state => match service.error_msg {
                    Some(ref msg) => info!(
                        "{}: {} -> {} ({})",
                        service.name, state, service.state, msg
                    ),
                    None => info!("{}: {} -> {}", service.name, state, service.state),
                },
                Some(_) => info!("{}: health {}", service.name, service.health),
                None => {}
            }
        }

        if updates.changed().await.is_err() {
            break;
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM"),
        _ = sigint.recv() => info!("Received SIGINT"),
    }

    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C");
    Ok(())
}
