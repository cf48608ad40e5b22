// Service supervision - lifecycle state machine over supervised processes

mod manager;
mod types;

pub use manager::ServiceManager;
pub use types::{HealthStatus, ServiceInfo, ServiceState};
