use crate::config::ServiceConfig;
use crate::logs::{LogCache, SharedLogCache};
use crate::process::{KillScope, ProcessHandle, KILL_SCOPE};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl ServiceState {
    /// A process is (or is about to be) live
    pub fn is_active(&self) -> bool {
        matches!(self, ServiceState::Starting | ServiceState::Running)
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServiceState::Stopped => write!(f, "stopped"),
            ServiceState::Starting => write!(f, "starting"),
            ServiceState::Running => write!(f, "running"),
            ServiceState::Stopping => write!(f, "stopping"),
            ServiceState::Crashed => write!(f, "crashed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Unknown,
    Healthy,
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "unknown"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Point-in-time copy of one service, safe to hand to any consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInfo {
    pub name: String,
    pub port: Option<u16>,
    pub state: ServiceState,
    pub health: HealthStatus,
    pub pid: Option<u32>,
    pub started_at: Option<DateTime<Local>>,
    pub cpu_percent: f32,
    pub memory_mb: f64,
    pub error_msg: Option<String>,
    pub kill_scope: KillScope,
}

impl ServiceInfo {
    pub fn uptime(&self) -> Option<chrono::Duration> {
        self.started_at.map(|started| Local::now() - started)
    }
}

/// Live supervision record for one configured service.
///
/// Only `ServiceManager` holds these, behind its lock.
#[derive(Debug)]
pub(crate) struct ServiceRuntime {
    pub name: String,
    pub config: ServiceConfig,
    pub handle: Option<ProcessHandle>,
    pub state: ServiceState,
    pub error_msg: Option<String>,
    pub started_at: Option<DateTime<Local>>,
    pub health: HealthStatus,
    pub cpu_percent: f32,
    pub memory_mb: f64,
    pub logs: SharedLogCache,
    /// Bumped on every start; stale exit or sample results are dropped
    pub generation: u64,
    pub monitor: Option<JoinHandle<()>>,
    pub pump: Option<JoinHandle<()>>,
}

impl ServiceRuntime {
    pub fn new(config: ServiceConfig, log_capacity: usize) -> Self {
        Self {
            name: config.name.clone(),
            config,
            handle: None,
            state: ServiceState::Stopped,
            error_msg: None,
            started_at: None,
            health: HealthStatus::Unknown,
            cpu_percent: 0.0,
            memory_mb: 0.0,
            logs: LogCache::shared(log_capacity),
            generation: 0,
            monitor: None,
            pump: None,
        }
    }

    pub fn info(&self) -> ServiceInfo {
        ServiceInfo {
            name: self.name.clone(),
            port: self.config.port,
            state: self.state,
            health: self.health,
            pid: self.handle.as_ref().map(|h| h.pid()),
            started_at: self.started_at,
            cpu_percent: self.cpu_percent,
            memory_mb: self.memory_mb,
            error_msg: self.error_msg.clone(),
            kill_scope: self
                .handle
                .as_ref()
                .map(|h| h.kill_scope())
                .unwrap_or(KILL_SCOPE),
        }
    }

    /// Enter `Starting` for a new generation and clear per-run fields
    pub fn begin_start(&mut self) -> u64 {
        self.clear_process();
        self.generation += 1;
        self.state = ServiceState::Starting;
        self.error_msg = None;
        self.generation
    }

    /// Drop everything tied to the process that just went away
    pub fn clear_process(&mut self) {
        self.handle = None;
        self.started_at = None;
        self.health = HealthStatus::Unknown;
        self.cpu_percent = 0.0;
        self.memory_mb = 0.0;
    }
}
