// Process module - Spawning, termination and sampling of service processes

mod handle;
pub mod monitor;
pub mod platform;

pub use handle::{describe_exit, ExitWaiter, ProcessHandle, ProcessOutput, SpawnedProcess};
pub use monitor::{ResourceSampler, ResourceUsage};
pub use platform::{KillScope, KILL_SCOPE};
