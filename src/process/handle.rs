use crate::config::ServiceConfig;
use crate::error::{DevhubError, Result};
use crate::logs::SharedLogCache;
use crate::process::platform::{self, KillScope};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader, Lines};
use tokio::process::{Child, ChildStderr, ChildStdout, Command};

/// Control handle for one live service process.
///
/// Cheap to clone; it only carries the pid, so terminating never needs the
/// `Child` that the exit monitor is blocked on.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    name: String,
    pid: u32,
    kill_scope: KillScope,
}

/// Everything produced by a successful spawn
#[derive(Debug)]
pub struct SpawnedProcess {
    pub handle: ProcessHandle,
    /// Owned by the exit monitor
    pub exit: ExitWaiter,
    /// Owned by the output pump
    pub output: ProcessOutput,
}

/// Waits for the child to exit
#[derive(Debug)]
pub struct ExitWaiter {
    name: String,
    child: Child,
}

/// Stdout and stderr pipes of a spawned child
#[derive(Debug)]
pub struct ProcessOutput {
    stdout: Option<ChildStdout>,
    stderr: Option<ChildStderr>,
}

impl ProcessHandle {
    /// Spawn a service process in its own process group with piped output.
    ///
    /// Returns `SpawnFailed` if the executable cannot be launched.
    pub fn spawn(config: &ServiceConfig) -> Result<SpawnedProcess> {
        let mut command = Command::new(&config.command);
        command
            .args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(false);

        if let Some(ref cwd) = config.cwd {
            command.current_dir(cwd);
        }

        platform::isolate(&mut command);

        let mut child = command
            .spawn()
            .map_err(|e| DevhubError::SpawnFailed(config.name.clone(), e.to_string()))?;

        let pid = match child.id() {
            Some(pid) => pid,
            None => {
                return Err(DevhubError::SpawnFailed(
                    config.name.clone(),
                    "process exited before its pid could be read".to_string(),
                ))
            }
        };

        let output = ProcessOutput {
            stdout: child.stdout.take(),
            stderr: child.stderr.take(),
        };

        Ok(SpawnedProcess {
            handle: ProcessHandle {
                name: config.name.clone(),
                pid,
                kill_scope: platform::KILL_SCOPE,
            },
            exit: ExitWaiter {
                name: config.name.clone(),
                child,
            },
            output,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn kill_scope(&self) -> KillScope {
        self.kill_scope
    }

    /// Forcefully kill the process (and its group where supported).
    ///
    /// A process that is already gone counts as success.
    pub fn terminate(&self) -> Result<()> {
        tracing::debug!(
            "Killing service {} (PID: {}, scope: {})",
            self.name,
            self.pid,
            self.kill_scope
        );
        platform::force_kill(self.pid)
    }

    /// Ask the process to exit; same as `terminate` where no graceful signal exists
    pub fn interrupt(&self) -> Result<()> {
        tracing::debug!("Interrupting service {} (PID: {})", self.name, self.pid);
        platform::interrupt(self.pid)
    }
}

impl ExitWaiter {
    /// Block until the child exits. A reap failure surfaces as `MonitorLost`.
    pub async fn wait(mut self) -> Result<ExitStatus> {
        self.child
            .wait()
            .await
            .map_err(|e| DevhubError::MonitorLost(self.name.clone(), e.to_string()))
    }
}

impl ProcessOutput {
    /// Feed merged stdout/stderr lines into `logs` until both pipes close
    pub async fn pump(self, logs: SharedLogCache) {
        let mut stdout = self.stdout.map(|s| BufReader::new(s).lines());
        let mut stderr = self.stderr.map(|s| BufReader::new(s).lines());

        loop {
            let (from_stdout, next) = tokio::select! {
                line = next_line(&mut stdout), if stdout.is_some() => (true, line),
                line = next_line(&mut stderr), if stderr.is_some() => (false, line),
                else => break,
            };

            match next {
                Ok(Some(line)) => {
                    logs.lock().await.append(line);
                }
                // EOF or read error closes that side
                _ => {
                    if from_stdout {
                        stdout = None;
                    } else {
                        stderr = None;
                    }
                }
            }
        }
    }
}

async fn next_line<R>(lines: &mut Option<Lines<R>>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    match lines {
        Some(lines) => lines.next_line().await,
        None => Ok(None),
    }
}

/// Human readable description of how a process ended
pub fn describe_exit(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with code {}", code);
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {}", signal);
        }
    }

    "exited with unknown status".to_string()
}
