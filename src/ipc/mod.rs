// IPC module - JSON lines over a Unix socket between the CLI and a running supervisor

pub mod client;
pub mod protocol;
pub mod server;

pub use client::IpcClient;
pub use protocol::{
    Command, ErrorReply, LogOptions, Request, Response, ResponseData, SearchOptions,
};
pub use server::IpcServer;

/// Default socket path for supervisor communication
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/devhub.sock";
