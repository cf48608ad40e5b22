// Control surface - The operations shared by the CLI and the automation endpoint

use crate::error::{DevhubError, Result};
use crate::logs::SearchMatch;
use crate::service::{ServiceInfo, ServiceManager};
use crate::state::StateManager;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_LOG_LINES: usize = 50;
pub const DEFAULT_CONTEXT_LINES: usize = 2;
pub const DEFAULT_MAX_RESULTS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
}

impl FromStr for ControlAction {
    type Err = DevhubError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "start" => Ok(ControlAction::Start),
            "stop" => Ok(ControlAction::Stop),
            "restart" => Ok(ControlAction::Restart),
            other => Err(DevhubError::Other(format!(
                "Unknown action '{}' (expected start, stop or restart)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for ControlAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlAction::Start => write!(f, "start"),
            ControlAction::Stop => write!(f, "stop"),
            ControlAction::Restart => write!(f, "restart"),
        }
    }
}

/// Detail view of one service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub service: ServiceInfo,
    pub uptime_secs: Option<i64>,
}

/// Reads go to the latest snapshot or the log buffers; commands go to the manager
#[derive(Clone)]
pub struct Control {
    manager: ServiceManager,
    state: Arc<StateManager>,
}

impl Control {
    pub fn new(manager: ServiceManager, state: Arc<StateManager>) -> Self {
        Self { manager, state }
    }

    pub fn list(&self) -> Vec<ServiceInfo> {
        self.state.get_services().services.clone()
    }

    pub fn get(&self, name: &str) -> Result<ServiceInfo> {
        self.state
            .get_services()
            .get(name)
            .cloned()
            .ok_or_else(|| DevhubError::ServiceNotFound(name.to_string()))
    }

    pub fn health(&self, name: &str) -> Result<HealthReport> {
        let service = self.get(name)?;
        let uptime_secs = service.uptime().map(|d| d.num_seconds().max(0));
        Ok(HealthReport {
            service,
            uptime_secs,
        })
    }

    /// Up to `lines` lines, ending `offset` lines before the newest
    pub async fn logs(&self, name: &str, lines: usize, offset: usize) -> Result<Vec<String>> {
        let logs = self.manager.logs(name).await?;
        let cache = logs.lock().await;
        Ok(cache
            .read(lines, offset)
            .into_iter()
            .map(|entry| entry.line)
            .collect())
    }

    pub async fn search(
        &self,
        name: &str,
        pattern: &str,
        context_lines: usize,
        max_results: usize,
    ) -> Result<Vec<SearchMatch>> {
        let logs = self.manager.logs(name).await?;
        let cache = logs.lock().await;
        Ok(cache.search(pattern, context_lines, max_results))
    }

    pub async fn control(&self, name: &str, action: ControlAction) -> Result<()> {
        match action {
            ControlAction::Start => self.manager.start_service(name).await,
            ControlAction::Stop => self.manager.stop_service(name).await,
            ControlAction::Restart => self.manager.restart_service(name).await,
        }
    }
}
