use std::collections::HashMap;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// CPU and memory of one service's process tree
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceUsage {
    pub cpu_percent: f32,
    pub memory_bytes: u64,
}

impl ResourceUsage {
    pub fn memory_mb(&self) -> f64 {
        self.memory_bytes as f64 / (1024.0 * 1024.0)
    }
}

/// Collects resource usage for supervised process trees
pub struct ResourceSampler {
    /// System information collector
    system: System,
    /// Parent pid -> direct children, rebuilt on every refresh
    children: HashMap<Pid, Vec<Pid>>,
}

impl ResourceSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            children: HashMap::new(),
        }
    }

    /// Refresh the process table once for a whole sampling tick.
    ///
    /// CPU usage is computed relative to the previous refresh, so the first
    /// sample for a new process reads 0%.
    pub fn refresh(&mut self) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_cpu().with_memory(),
        );

        self.children.clear();
        for (pid, process) in self.system.processes() {
            if let Some(parent) = process.parent() {
                self.children.entry(parent).or_default().push(*pid);
            }
        }
    }

    /// Whether `pid` was present at the last refresh
    pub fn is_alive(&self, pid: u32) -> bool {
        self.system.process(Pid::from_u32(pid)).is_some()
    }

    /// Usage summed over `pid` and all of its descendants.
    ///
    /// Returns `None` if the root process was not seen at the last refresh.
    pub fn usage(&self, pid: u32) -> Option<ResourceUsage> {
        let root = Pid::from_u32(pid);
        self.system.process(root)?;

        let mut usage = ResourceUsage {
            cpu_percent: 0.0,
            memory_bytes: 0,
        };
        let mut pending = vec![root];

        while let Some(current) = pending.pop() {
            if let Some(process) = self.system.process(current) {
                usage.cpu_percent += process.cpu_usage();
                usage.memory_bytes += process.memory();
            }
            if let Some(kids) = self.children.get(&current) {
                pending.extend(kids.iter().copied());
            }
        }

        Some(usage)
    }
}

impl Default for ResourceSampler {
    fn default() -> Self {
        Self::new()
    }
}
