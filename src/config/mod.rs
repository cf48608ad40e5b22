use crate::error::{DevhubError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Definition of one supervised service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Service name (unique identifier)
    pub name: String,

    /// Executable to launch (looked up on PATH when not absolute)
    pub command: String,

    /// Command-line arguments
    #[serde(default)]
    pub args: Vec<String>,

    /// Working directory for the process
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Extra environment variables
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Port the service advertises
    #[serde(default)]
    pub port: Option<u16>,

    /// Optional liveness probe
    #[serde(default)]
    pub health_check: Option<HealthCheck>,

    /// Start the service as soon as the supervisor comes up
    #[serde(default)]
    pub autostart: bool,
}

/// Reachability probe run by the sampler
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum HealthCheck {
    /// Succeeds when a TCP connection can be opened
    Tcp {
        #[serde(default = "default_probe_host")]
        host: String,
        /// Defaults to the service port
        #[serde(default)]
        port: Option<u16>,
        #[serde(default = "default_probe_timeout")]
        timeout_ms: u64,
    },
    /// Succeeds when the command exits with status 0
    Command {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_probe_timeout")]
        timeout_ms: u64,
    },
}

fn default_probe_host() -> String {
    "127.0.0.1".to_string()
}

fn default_probe_timeout() -> u64 {
    1000
}

impl HealthCheck {
    pub fn timeout(&self) -> Duration {
        match self {
            HealthCheck::Tcp { timeout_ms, .. } | HealthCheck::Command { timeout_ms, .. } => {
                Duration::from_millis(*timeout_ms)
            }
        }
    }
}

/// Timing and capacity knobs for the supervisor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// Health/resource sampling period
    #[serde(default = "default_sample_interval")]
    pub sample_interval_ms: u64,

    /// Snapshot republish period
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_ms: u64,

    /// How long restart waits for the old process before starting anyway
    #[serde(default = "default_restart_grace")]
    pub restart_grace_ms: u64,

    /// Per-service graceful stop budget during shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,

    /// Wait after the forced kill during shutdown
    #[serde(default = "default_kill_timeout")]
    pub kill_timeout_ms: u64,

    /// Lines retained per service
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

fn default_sample_interval() -> u64 {
    1000
}

fn default_snapshot_interval() -> u64 {
    1000
}

fn default_restart_grace() -> u64 {
    5000
}

fn default_shutdown_timeout() -> u64 {
    5000
}

fn default_kill_timeout() -> u64 {
    2000
}

fn default_log_capacity() -> usize {
    5000
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            sample_interval_ms: default_sample_interval(),
            snapshot_interval_ms: default_snapshot_interval(),
            restart_grace_ms: default_restart_grace(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            kill_timeout_ms: default_kill_timeout(),
            log_capacity: default_log_capacity(),
        }
    }
}

impl SupervisorSettings {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    pub fn restart_grace(&self) -> Duration {
        Duration::from_millis(self.restart_grace_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn kill_timeout(&self) -> Duration {
        Duration::from_millis(self.kill_timeout_ms)
    }

    /// Upper bound on how long `ServiceManager::shutdown` can wait on processes
    pub fn shutdown_budget(&self) -> Duration {
        self.shutdown_timeout() + self.kill_timeout()
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_interval_ms == 0 || self.snapshot_interval_ms == 0 {
            return Err(DevhubError::ConfigValidationError(
                "sample and snapshot intervals must be greater than zero".to_string(),
            ));
        }

        if self.log_capacity == 0 {
            return Err(DevhubError::ConfigValidationError(
                "log_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}

/// Whole configuration file: settings plus the ordered service list
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DevhubConfig {
    #[serde(default)]
    pub settings: SupervisorSettings,

    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

impl DevhubConfig {
    /// Load the configuration from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<DevhubConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| DevhubError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config: DevhubConfig = match extension {
            "toml" => toml::from_str(&contents)
                .map_err(|e| DevhubError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?,
            "json" => serde_json::from_str(&contents)
                .map_err(|e| DevhubError::InvalidConfig(format!("Failed to parse JSON: {}", e)))?,
            _ => {
                return Err(DevhubError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        if config.services.is_empty() {
            return Err(DevhubError::InvalidConfig(
                "No services configured in file".to_string(),
            ));
        }

        let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
        for service in &mut config.services {
            service.expand_env_vars();
            service.resolve_cwd(base_dir);
        }

        config.validate()?;

        Ok(config)
    }

    /// Validate settings, every service, and name uniqueness
    pub fn validate(&self) -> Result<()> {
        self.settings.validate()?;
        validate_services(&self.services)
    }
}

/// Check each service and reject duplicate names
pub fn validate_services(services: &[ServiceConfig]) -> Result<()> {
    let mut seen = HashSet::new();
    for service in services {
        service.validate()?;
        if !seen.insert(service.name.as_str()) {
            return Err(DevhubError::DuplicateService(service.name.clone()));
        }
    }
    Ok(())
}

impl ServiceConfig {
    /// Minimal service definition, mostly for tests and programmatic setups
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            cwd: None,
            env: HashMap::new(),
            port: None,
            health_check: None,
            autostart: false,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(DevhubError::MissingConfigField("name".to_string()));
        }

        if self.command.is_empty() {
            return Err(DevhubError::MissingConfigField(format!(
                "command (service '{}')",
                self.name
            )));
        }

        if let Some(ref cwd) = self.cwd {
            if !cwd.is_dir() {
                return Err(DevhubError::ConfigValidationError(format!(
                    "Working directory for '{}' is not a directory: {}",
                    self.name,
                    cwd.display()
                )));
            }
        }

        match self.health_check {
            Some(HealthCheck::Tcp { port: None, .. }) if self.port.is_none() => {
                return Err(DevhubError::ConfigValidationError(format!(
                    "TCP health check for '{}' needs a port",
                    self.name
                )));
            }
            Some(HealthCheck::Command { ref command, .. }) if command.is_empty() => {
                return Err(DevhubError::MissingConfigField(format!(
                    "health_check.command (service '{}')",
                    self.name
                )));
            }
            _ => {}
        }

        Ok(())
    }

    fn expand_env_vars(&mut self) {
        self.command = expand_env_in_string(&self.command);
        self.args = self.args.iter().map(|a| expand_env_in_string(a)).collect();

        if let Some(ref cwd) = self.cwd {
            self.cwd = Some(PathBuf::from(expand_env_in_string(&cwd.to_string_lossy())));
        }

        for value in self.env.values_mut() {
            *value = expand_env_in_string(value);
        }
    }

    fn resolve_cwd(&mut self, base_dir: &Path) {
        if let Some(ref cwd) = self.cwd {
            if cwd.is_relative() {
                self.cwd = Some(base_dir.join(cwd));
            }
        }
    }
}

/// Replace `${VAR}` and `$VAR` with values from the supervisor's environment
fn expand_env_in_string(s: &str) -> String {
    if !s.contains('$') {
        return s.to_string();
    }

    // Longest names first so `$HOME_DIR` is not clobbered by `$HOME`
    let mut vars: Vec<(String, String)> = std::env::vars().collect();
    vars.sort_by(|a, b| b.0.len().cmp(&a.0.len()));

    let mut result = s.to_string();
    for (key, value) in &vars {
        result = result.replace(&format!("${{{}}}", key), value);
    }
    for (key, value) in &vars {
        result = result.replace(&format!("${}", key), value);
    }

    result
}
