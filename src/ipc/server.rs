// IPC Server - Accepts automation clients on a Unix socket

use crate::error::{DevhubError, Result};
use crate::ipc::{Command, Request, Response, ResponseData, DEFAULT_SOCKET_PATH};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// IPC server for handling client connections
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    cancel: CancellationToken,
}

impl IpcServer {
    /// Create a new IPC server with the default socket path
    pub fn new() -> Self {
        Self::with_socket_path(DEFAULT_SOCKET_PATH)
    }

    /// Create a new IPC server with a custom socket path
    pub fn with_socket_path<P: AsRef<Path>>(path: P) -> Self {
        Self {
            socket_path: path.as_ref().to_path_buf(),
            listener: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Bind the Unix socket. Must be called from within a tokio runtime.
    pub fn start(&mut self) -> Result<()> {
        // A stale socket from a previous run blocks the bind
        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                DevhubError::IpcError(format!("Failed to remove existing socket: {}", e))
            })?;
        }

        let listener = UnixListener::bind(&self.socket_path)
            .map_err(|e| DevhubError::IpcError(format!("Failed to bind to socket: {}", e)))?;

        // Owner only
        {
            use std::os::unix::fs::PermissionsExt;
            let permissions = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(&self.socket_path, permissions).map_err(|e| {
                DevhubError::IpcError(format!("Failed to set socket permissions: {}", e))
            })?;
        }

        self.listener = Some(listener);
        Ok(())
    }

    /// Token that ends `run` when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Serve connections until the shutdown token fires, then remove the socket.
    ///
    /// Each connection carries one JSON request line and gets one JSON
    /// response line back.
    pub async fn run<F, Fut>(mut self, handler: F) -> Result<()>
    where
        F: Fn(Command) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ResponseData>> + Send,
    {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| DevhubError::IpcError("Server not started".to_string()))?;
        let handler = Arc::new(handler);

        debug!("IPC server listening on {}", self.socket_path.display());

        loop {
            let stream = tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _addr)) => stream,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        continue;
                    }
                },
            };

            let handler = Arc::clone(&handler);
            tokio::spawn(async move {
                if let Err(e) = Self::handle_connection(stream, handler.as_ref()).await {
                    warn!("IPC connection failed: {}", e);
                }
            });
        }

        drop(listener);
        self.stop()
    }

    async fn handle_connection<F, Fut>(stream: UnixStream, handler: &F) -> Result<()>
    where
        F: Fn(Command) -> Fut,
        Fut: Future<Output = Result<ResponseData>>,
    {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut request_line = String::new();
        reader
            .read_line(&mut request_line)
            .await
            .map_err(|e| DevhubError::IpcError(format!("Failed to read request: {}", e)))?;

        let request: Request = serde_json::from_str(&request_line).map_err(|e| {
            DevhubError::DeserializationError(format!("Failed to deserialize request: {}", e))
        })?;

        let response = match handler(request.command).await {
            Ok(data) => Response::success(request.id, data),
            Err(e) => Response::error(request.id, &e),
        };

        let mut response_json = serde_json::to_string(&response).map_err(|e| {
            DevhubError::SerializationError(format!("Failed to serialize response: {}", e))
        })?;
        response_json.push('\n');

        writer
            .write_all(response_json.as_bytes())
            .await
            .map_err(|e| DevhubError::IpcError(format!("Failed to write response: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| DevhubError::IpcError(format!("Failed to flush stream: {}", e)))?;

        Ok(())
    }

    /// Stop listening and clean up the socket file
    pub fn stop(&mut self) -> Result<()> {
        self.listener = None;

        if self.socket_path.exists() {
            std::fs::remove_file(&self.socket_path).map_err(|e| {
                DevhubError::IpcError(format!("Failed to remove socket file: {}", e))
            })?;
        }

        Ok(())
    }

    /// Get the socket path being used
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Default for IpcServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
