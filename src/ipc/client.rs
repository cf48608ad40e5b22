//! Blocking client for the supervisor's control socket, used by the CLI.

use crate::error::{DevhubError, Result};
use crate::ipc::{Command, Request, Response, ResponseData};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

const CONNECT_ATTEMPTS: u32 = 3;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

pub struct IpcClient {
    socket_path: PathBuf,
    next_id: AtomicU64,
}

impl IpcClient {
    pub fn with_socket_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Send a command and unwrap the reply.
    ///
    /// A supervisor-side failure keeps its category, so a missing service
    /// comes back as `ServiceNotFound` and a live one as `AlreadyRunning`.
    pub fn request(&self, command: Command) -> Result<ResponseData> {
        self.send_command(command)?.result.map_err(DevhubError::from)
    }

    /// Send one command and return the supervisor's response as is.
    ///
    /// Only connecting is retried. A written request is never resent because
    /// control actions are not idempotent.
    pub fn send_command(&self, command: Command) -> Result<Response> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let stream = self.connect()?;
        let response = exchange(stream, &Request::new(id, command))?;

        if response.id != id {
            return Err(DevhubError::ProtocolError(format!(
                "reply {} does not answer request {}",
                response.id, id
            )));
        }
        Ok(response)
    }

    fn connect(&self) -> Result<UnixStream> {
        if !self.socket_path.exists() {
            return Err(DevhubError::DaemonNotRunning);
        }

        let mut attempt = 1;
        loop {
            match UnixStream::connect(&self.socket_path) {
                Ok(stream) => return Ok(stream),
                // A stale socket file left by a supervisor that died
                Err(e) if matches!(e.kind(), ErrorKind::ConnectionRefused | ErrorKind::NotFound) => {
                    return Err(DevhubError::DaemonNotRunning)
                }
                Err(e) if attempt < CONNECT_ATTEMPTS => {
                    debug!(
                        "Connecting to {} failed ({}), retrying",
                        self.socket_path.display(),
                        e
                    );
                    std::thread::sleep(CONNECT_BACKOFF);
                    attempt += 1;
                }
                Err(e) => {
                    return Err(DevhubError::ConnectionError(format!(
                        "{}: {}",
                        self.socket_path.display(),
                        e
                    )))
                }
            }
        }
    }
}

/// Write one request line and read one reply line
fn exchange(mut stream: UnixStream, request: &Request) -> Result<Response> {
    let mut line = serde_json::to_string(request)
        .map_err(|e| DevhubError::SerializationError(e.to_string()))?;
    line.push('\n');
    stream
        .write_all(line.as_bytes())
        .map_err(|e| DevhubError::IpcError(format!("sending request: {}", e)))?;

    let mut reply = String::new();
    BufReader::new(stream)
        .read_line(&mut reply)
        .map_err(|e| DevhubError::IpcError(format!("reading reply: {}", e)))?;
    if reply.trim().is_empty() {
        return Err(DevhubError::ProtocolError(
            "supervisor closed the connection without replying".to_string(),
        ));
    }

    serde_json::from_str(&reply).map_err(|e| DevhubError::DeserializationError(e.to_string()))
}
