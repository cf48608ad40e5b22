//! Platform-specific process isolation and termination.
//!
//! On unix every service is spawned as the leader of a fresh process group
//! and signals go to the whole group, so helpers forked by the service die
//! with it. Elsewhere only the spawned process itself can be targeted:
//! descendants it started may outlive a stop. `KILL_SCOPE` reports which
//! guarantee the current build provides.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// What a termination request reaches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KillScope {
    /// The service and every descendant in its process group
    ProcessGroup,
    /// Only the directly spawned process
    SingleProcess,
}

impl std::fmt::Display for KillScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KillScope::ProcessGroup => write!(f, "process-group"),
            KillScope::SingleProcess => write!(f, "single-process"),
        }
    }
}

pub use imp::KILL_SCOPE;
pub(crate) use imp::{force_kill, interrupt, isolate};

#[cfg(unix)]
mod imp {
    use super::KillScope;
    use crate::error::{DevhubError, Result};
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;
    use tokio::process::Command;

    pub const KILL_SCOPE: KillScope = KillScope::ProcessGroup;

    pub fn isolate(command: &mut Command) {
        command.process_group(0);
    }

    pub fn force_kill(pid: u32) -> Result<()> {
        signal_group(pid, Signal::SIGKILL)
    }

    pub fn interrupt(pid: u32) -> Result<()> {
        signal_group(pid, Signal::SIGTERM)
    }

    fn signal_group(pid: u32, signal: Signal) -> Result<()> {
        let pgid = super::validate_pid(pid)?;

        match killpg(Pid::from_raw(pgid), signal) {
            Ok(()) => Ok(()),
            // Group already gone
            Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(DevhubError::SignalError(format!(
                "Failed to send {} to process group {}: {}",
                signal, pgid, e
            ))),
        }
    }
}

#[cfg(not(unix))]
mod imp {
    use super::KillScope;
    use crate::error::{DevhubError, Result};
    use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
    use tokio::process::Command;

    pub const KILL_SCOPE: KillScope = KillScope::SingleProcess;

    pub fn isolate(_command: &mut Command) {}

    pub fn force_kill(pid: u32) -> Result<()> {
        super::validate_pid(pid)?;

        let sys_pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::new(),
        );

        match system.process(sys_pid) {
            Some(process) if !process.kill() => Err(DevhubError::SignalError(format!(
                "Failed to kill process {}",
                pid
            ))),
            _ => Ok(()),
        }
    }

    /// No graceful signal is available; fall back to the forced kill
    pub fn interrupt(pid: u32) -> Result<()> {
        force_kill(pid)
    }
}

fn validate_pid(pid: u32) -> Result<i32> {
    // pid 0 would address the supervisor's own process group
    match i32::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(raw),
        _ => Err(crate::error::DevhubError::InvalidProcessId(pid.to_string())),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::DevhubError;
    use tokio::process::Command;

    #[test]
    fn test_unix_kills_whole_group() {
        assert_eq!(KILL_SCOPE, KillScope::ProcessGroup);
    }

    #[test]
    fn test_rejects_pid_zero() {
        assert!(matches!(
            force_kill(0),
            Err(DevhubError::InvalidProcessId(_))
        ));
        assert!(matches!(
            interrupt(u32::MAX),
            Err(DevhubError::InvalidProcessId(_))
        ));
    }

    #[tokio::test]
    async fn test_kill_of_dead_group_is_success() {
        let mut command = Command::new("/bin/sh");
        command.args(["-c", "exit 0"]);
        isolate(&mut command);

        let mut child = command.spawn().unwrap();
        let pid = child.id().unwrap();
        child.wait().await.unwrap();

        assert!(force_kill(pid).is_ok());
    }
}
