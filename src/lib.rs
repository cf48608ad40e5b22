// Library exports for devhub

#[cfg(unix)]
pub mod cli;
pub mod config;
pub mod control;
pub mod daemon;
pub mod error;
pub mod health;
#[cfg(unix)]
pub mod ipc;
pub mod logs;
pub mod process;
pub mod service;
pub mod state;
