// Health probes - Reachability checks run by the sampler

use crate::config::HealthCheck;
use crate::service::HealthStatus;
use std::process::Stdio;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;

/// Run the configured probe for a service.
///
/// A service without a probe is healthy as long as it is running.
pub async fn probe(check: Option<&HealthCheck>, service_port: Option<u16>) -> HealthStatus {
    let Some(check) = check else {
        return HealthStatus::Healthy;
    };

    let passed = match check {
        HealthCheck::Tcp { host, port, .. } => match port.or(service_port) {
            Some(port) => probe_tcp(host, port, check).await,
            None => false,
        },
        HealthCheck::Command { command, args, .. } => probe_command(command, args, check).await,
    };

    if passed {
        HealthStatus::Healthy
    } else {
        HealthStatus::Unhealthy
    }
}

async fn probe_tcp(host: &str, port: u16, check: &HealthCheck) -> bool {
    match timeout(check.timeout(), TcpStream::connect((host, port))).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            tracing::trace!("TCP probe {}:{} failed: {}", host, port, e);
            false
        }
        Err(_) => {
            tracing::trace!("TCP probe {}:{} timed out", host, port);
            false
        }
    }
}

async fn probe_command(command: &str, args: &[String], check: &HealthCheck) -> bool {
    let child = Command::new(command)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn();

    let mut child = match child {
        Ok(child) => child,
        Err(e) => {
            tracing::debug!("Health command '{}' could not be started: {}", command, e);
            return false;
        }
    };

    match timeout(check.timeout(), child.wait()).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(_)) => false,
        // Dropping the child kills it
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    fn tcp(port: Option<u16>) -> HealthCheck {
        HealthCheck::Tcp {
            host: "127.0.0.1".to_string(),
            port,
            timeout_ms: 500,
        }
    }

    #[tokio::test]
    async fn test_absent_check_is_healthy() {
        assert_eq!(probe(None, None).await, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_tcp_probe_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert_eq!(probe(Some(&tcp(Some(port))), None).await, HealthStatus::Healthy);
        // Falls back to the service port
        assert_eq!(probe(Some(&tcp(None)), Some(port)).await, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_tcp_probe_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        assert_eq!(probe(Some(&tcp(Some(port))), None).await, HealthStatus::Unhealthy);
        assert_eq!(probe(Some(&tcp(None)), None).await, HealthStatus::Unhealthy);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_probe() {
        let passing = HealthCheck::Command {
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), "exit 0".to_string()],
            timeout_ms: 1000,
        };
        let failing = HealthCheck::Command {
            command: "/bin/sh".to_string(),
            args: vec!["-c".to_string(), "exit 1".to_string()],
            timeout_ms: 1000,
        };
        let slow = HealthCheck::Command {
            command: "/bin/sleep".to_string(),
            args: vec!["5".to_string()],
            timeout_ms: 100,
        };

        assert_eq!(probe(Some(&passing), None).await, HealthStatus::Healthy);
        assert_eq!(probe(Some(&failing), None).await, HealthStatus::Unhealthy);
        assert_eq!(probe(Some(&slow), None).await, HealthStatus::Unhealthy);
    }
}
