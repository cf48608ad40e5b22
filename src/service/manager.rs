use crate::config::{validate_services, HealthCheck, ServiceConfig, SupervisorSettings};
use crate::error::{DevhubError, Result};
use crate::health;
use crate::logs::SharedLogCache;
use crate::process::{
    describe_exit, ExitWaiter, ProcessHandle, ResourceSampler, ResourceUsage, SpawnedProcess,
};
use crate::service::types::{HealthStatus, ServiceInfo, ServiceRuntime, ServiceState};
use chrono::Local;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{Notify, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long shutdown lets monitor and pump tasks finish before aborting them
const TASK_DRAIN: Duration = Duration::from_millis(200);

/// Owner of every service runtime and the only place their state changes.
///
/// Cloning is cheap and every clone drives the same services. All runtime
/// state sits behind one lock; spawning, signalling and waiting on processes
/// happen outside it and only the resulting transition is applied under it.
#[derive(Clone)]
pub struct ServiceManager {
    inner: Arc<Inner>,
}

struct Inner {
    runtimes: RwLock<Vec<ServiceRuntime>>,
    settings: SupervisorSettings,
    /// Signalled whenever a service leaves `Stopping` or a start fails
    settled: Notify,
    cancel: CancellationToken,
    sampler: std::sync::Mutex<Option<JoinHandle<()>>>,
    shut_down: AtomicBool,
}

struct SampleTarget {
    name: String,
    generation: u64,
    pid: u32,
    check: Option<HealthCheck>,
    port: Option<u16>,
}

struct SampleResult {
    name: String,
    generation: u64,
    usage: Option<ResourceUsage>,
    health: HealthStatus,
}

impl ServiceManager {
    /// Create runtimes for every service (all `Stopped`) and start the sampler.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(services: Vec<ServiceConfig>, settings: SupervisorSettings) -> Result<Self> {
        settings.validate()?;
        validate_services(&services)?;

        let runtimes = services
            .into_iter()
            .map(|config| ServiceRuntime::new(config, settings.log_capacity))
            .collect();

        let inner = Arc::new(Inner {
            runtimes: RwLock::new(runtimes),
            settings,
            settled: Notify::new(),
            cancel: CancellationToken::new(),
            sampler: std::sync::Mutex::new(None),
            shut_down: AtomicBool::new(false),
        });

        let sampler = tokio::spawn(run_sampler(
            Arc::downgrade(&inner),
            inner.settings.sample_interval(),
            inner.cancel.clone(),
        ));
        *inner
            .sampler
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(sampler);

        Ok(Self { inner })
    }

    pub fn settings(&self) -> &SupervisorSettings {
        &self.inner.settings
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Copy of every service, in configuration order
    pub async fn get_services(&self) -> Vec<ServiceInfo> {
        let runtimes = self.inner.runtimes.read().await;
        runtimes.iter().map(ServiceRuntime::info).collect()
    }

    pub async fn get_service(&self, name: &str) -> Option<ServiceInfo> {
        let runtimes = self.inner.runtimes.read().await;
        find(&runtimes, name).ok().map(ServiceRuntime::info)
    }

    /// The service's output buffer
    pub async fn logs(&self, name: &str) -> Result<SharedLogCache> {
        let runtimes = self.inner.runtimes.read().await;
        Ok(find(&runtimes, name)?.logs.clone())
    }

    /// Spawn the service and return once the spawn itself succeeded.
    ///
    /// The service stays `Starting` until the sampler sees it alive and healthy.
    pub async fn start_service(&self, name: &str) -> Result<()> {
        self.ensure_accepting(name)?;

        let (config, generation) = {
            let mut runtimes = self.inner.runtimes.write().await;
            let runtime = find_mut(&mut runtimes, name)?;

            match runtime.state {
                ServiceState::Starting | ServiceState::Running => {
                    return Err(DevhubError::AlreadyRunning(name.to_string()));
                }
                ServiceState::Stopping => {
                    return Err(DevhubError::OperationFailed(
                        name.to_string(),
                        "service is still stopping".to_string(),
                    ));
                }
                ServiceState::Stopped | ServiceState::Crashed => {}
            }

            let generation = runtime.begin_start();
            (runtime.config.clone(), generation)
        };

        self.launch(config, generation).await
    }

    /// Kill the service's process group; the exit monitor settles it to `Stopped`
    pub async fn stop_service(&self, name: &str) -> Result<()> {
        let (handle, previous, generation) = {
            let mut runtimes = self.inner.runtimes.write().await;
            let runtime = find_mut(&mut runtimes, name)?;

            match runtime.state {
                ServiceState::Stopped | ServiceState::Crashed => {
                    debug!("Service {} is not running, nothing to stop", name);
                    return Ok(());
                }
                ServiceState::Stopping => return Ok(()),
                ServiceState::Starting | ServiceState::Running => {}
            }

            let previous = runtime.state;
            runtime.state = ServiceState::Stopping;

            match runtime.handle.clone() {
                Some(handle) => (handle, previous, runtime.generation),
                // Spawn still in flight; launch() kills it once it lands
                None => return Ok(()),
            }
        };

        info!("Stopping service {} (PID: {})", name, handle.pid());

        if let Err(e) = handle.terminate() {
            error!("Failed to stop service {}: {}", name, e);

            let mut runtimes = self.inner.runtimes.write().await;
            if let Ok(runtime) = find_mut(&mut runtimes, name) {
                if runtime.generation == generation && runtime.state == ServiceState::Stopping {
                    runtime.state = previous;
                    runtime.error_msg = Some(e.to_string());
                }
            }

            return Err(DevhubError::StopError(name.to_string(), e.to_string()));
        }

        Ok(())
    }

    /// Stop, wait up to the restart grace period, then start regardless.
    ///
    /// A service that is already stopped or crashed counts as stopped.
    pub async fn restart_service(&self, name: &str) -> Result<()> {
        self.ensure_accepting(name)?;
        self.stop_service(name).await?;

        let grace = self.inner.settings.restart_grace();
        let settled = self.wait_until_settled(name, grace).await?;
        if !settled {
            warn!(
                "Service {} did not exit within {:?}, starting a new instance anyway",
                name, grace
            );
        }

        let (config, generation) = {
            let mut runtimes = self.inner.runtimes.write().await;
            let runtime = find_mut(&mut runtimes, name)?;

            if runtime.state.is_active() {
                return Err(DevhubError::AlreadyRunning(name.to_string()));
            }

            let generation = runtime.begin_start();
            (runtime.config.clone(), generation)
        };

        self.launch(config, generation).await?;

        if !settled {
            let mut runtimes = self.inner.runtimes.write().await;
            if let Ok(runtime) = find_mut(&mut runtimes, name) {
                if runtime.generation == generation {
                    runtime.error_msg = Some(format!(
                        "previous instance did not exit within {}ms; restarted anyway",
                        grace.as_millis()
                    ));
                }
            }
        }

        Ok(())
    }

    /// Start every service marked `autostart`, returning how many started
    pub async fn start_autostart(&self) -> usize {
        let names: Vec<String> = {
            let runtimes = self.inner.runtimes.read().await;
            runtimes
                .iter()
                .filter(|r| r.config.autostart)
                .map(|r| r.name.clone())
                .collect()
        };

        let mut started = 0;
        for name in names {
            match self.start_service(&name).await {
                Ok(()) => started += 1,
                Err(e) => warn!("Autostart of {} failed: {}", name, e),
            }
        }
        started
    }

    /// Stop every service and the sampler. Idempotent.
    ///
    /// Each live service gets a graceful signal and `shutdown_timeout` to
    /// exit, then a forced kill. The whole call is bounded by
    /// `SupervisorSettings::shutdown_budget`.
    pub async fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already performed");
            return;
        }

        let deadline = Instant::now() + self.inner.settings.shutdown_budget();
        info!("Shutting down all services");

        self.inner.cancel.cancel();
        let sampler = self
            .inner
            .sampler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut sampler) = sampler {
            if tokio::time::timeout_at(deadline, &mut sampler).await.is_err() {
                warn!("Sampler did not stop before the shutdown deadline");
                sampler.abort();
            }
        }

        let targets: Vec<(String, ProcessHandle)> = {
            let mut runtimes = self.inner.runtimes.write().await;
            runtimes
                .iter_mut()
                .filter(|r| r.state.is_active() || r.state == ServiceState::Stopping)
                .filter_map(|runtime| {
                    runtime.state = ServiceState::Stopping;
                    runtime
                        .handle
                        .clone()
                        .map(|handle| (runtime.name.clone(), handle))
                })
                .collect()
        };

        let mut stops = JoinSet::new();
        for (name, handle) in targets {
            let manager = self.clone();
            stops.spawn(async move { manager.stop_for_shutdown(&name, &handle, deadline).await });
        }
        while stops.join_next().await.is_some() {}

        let tasks: Vec<JoinHandle<()>> = {
            let mut runtimes = self.inner.runtimes.write().await;
            runtimes
                .iter_mut()
                .flat_map(|r| [r.monitor.take(), r.pump.take()])
                .flatten()
                .collect()
        };
        // Orphans of a crashed service can hold its pipes open indefinitely
        let drain_deadline = deadline.min(Instant::now() + TASK_DRAIN);
        for mut task in tasks {
            if tokio::time::timeout_at(drain_deadline, &mut task).await.is_err() {
                task.abort();
            }
        }

        let mut runtimes = self.inner.runtimes.write().await;
        for runtime in runtimes.iter_mut() {
            if runtime.state == ServiceState::Stopping {
                error!("Exit of service {} was not observed before the deadline", runtime.name);
                runtime.clear_process();
                runtime.state = ServiceState::Stopped;
                runtime.error_msg = Some(
                    DevhubError::TimeoutError("exit not observed before shutdown deadline".to_string())
                        .to_string(),
                );
            }
        }

        info!("All services shut down");
    }

    async fn stop_for_shutdown(&self, name: &str, handle: &ProcessHandle, deadline: Instant) {
        info!("Stopping service {} (PID: {})", name, handle.pid());
        if let Err(e) = handle.interrupt() {
            warn!("Failed to interrupt service {}: {}", name, e);
        }

        let graceful = self
            .inner
            .settings
            .shutdown_timeout()
            .min(deadline.saturating_duration_since(Instant::now()));
        if matches!(self.wait_until_settled(name, graceful).await, Ok(true)) {
            return;
        }

        warn!(
            "Service {} did not exit within {:?}, killing it",
            name, graceful
        );
        if let Err(e) = handle.terminate() {
            error!("Failed to kill service {}: {}", name, e);
        }

        let remaining = deadline.saturating_duration_since(Instant::now());
        if !matches!(self.wait_until_settled(name, remaining).await, Ok(true)) {
            error!(
                "Service {} (PID: {}) still not reaped after kill",
                name,
                handle.pid()
            );
        }
    }

    async fn launch(&self, config: ServiceConfig, generation: u64) -> Result<()> {
        let name = config.name.clone();
        debug!(
            "Spawning service {}: {} {}",
            name,
            config.command,
            config.args.join(" ")
        );

        let SpawnedProcess {
            handle,
            exit,
            output,
        } = match ProcessHandle::spawn(&config) {
            Ok(spawned) => spawned,
            Err(e) => {
                error!("Failed to start service {}: {}", name, e);
                {
                    let mut runtimes = self.inner.runtimes.write().await;
                    if let Ok(runtime) = find_mut(&mut runtimes, &name) {
                        if runtime.generation == generation {
                            runtime.state = ServiceState::Crashed;
                            runtime.error_msg = Some(e.to_string());
                        }
                    }
                }
                self.inner.settled.notify_waiters();
                return Err(e);
            }
        };

        let (superseded, stop_requested) = {
            let mut runtimes = self.inner.runtimes.write().await;
            let runtime = find_mut(&mut runtimes, &name)?;

            // Both tasks run even for a superseded spawn so the child is reaped
            let pump = tokio::spawn(output.pump(runtime.logs.clone()));
            let monitor = tokio::spawn(watch_exit(
                Arc::downgrade(&self.inner),
                name.clone(),
                generation,
                exit,
            ));

            if runtime.generation == generation {
                runtime.handle = Some(handle.clone());
                runtime.started_at = Some(Local::now());
                runtime.pump = Some(pump);
                runtime.monitor = Some(monitor);
                (false, runtime.state == ServiceState::Stopping)
            } else {
                (true, false)
            }
        };

        if superseded || stop_requested {
            debug!("Service {} was stopped while starting", name);
            if let Err(e) = handle.terminate() {
                warn!("Failed to kill service {} after an early stop: {}", name, e);
            }
            return Ok(());
        }

        info!("Service {} started (PID: {})", name, handle.pid());
        Ok(())
    }

    /// Wait until the service is no longer `Stopping`; `false` on timeout
    async fn wait_until_settled(&self, name: &str, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;

        loop {
            let notified = self.inner.settled.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let runtimes = self.inner.runtimes.read().await;
                if find(&runtimes, name)?.state != ServiceState::Stopping {
                    return Ok(true);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(false);
            }
        }
    }

    fn ensure_accepting(&self, name: &str) -> Result<()> {
        if self.is_shut_down() {
            return Err(DevhubError::OperationFailed(
                name.to_string(),
                "supervisor is shutting down".to_string(),
            ));
        }
        Ok(())
    }
}

impl Inner {
    async fn record_exit(&self, name: &str, generation: u64, outcome: Result<ExitStatus>) {
        {
            let mut runtimes = self.runtimes.write().await;
            let Ok(runtime) = find_mut(&mut runtimes, name) else {
                return;
            };

            if runtime.generation != generation {
                debug!("Ignoring exit of a replaced process of service {}", name);
                return;
            }

            let was_stopping = runtime.state == ServiceState::Stopping;
            runtime.clear_process();
            runtime.monitor = None;

            match outcome {
                Ok(status) if was_stopping => {
                    info!("Service {} stopped ({})", name, describe_exit(&status));
                    runtime.state = ServiceState::Stopped;
                    runtime.error_msg = None;
                }
                Ok(status) => {
                    let detail = describe_exit(&status);
                    warn!("Service {} crashed: {}", name, detail);
                    runtime.state = ServiceState::Crashed;
                    runtime.error_msg = Some(format!("process {}", detail));
                }
                Err(e) => {
                    error!("{}", e);
                    runtime.state = ServiceState::Crashed;
                    runtime.error_msg = Some(e.to_string());
                }
            }
        }

        self.settled.notify_waiters();
    }

    /// One sampling pass over every service with a live process
    async fn sample(&self, sampler: &mut ResourceSampler) {
        let targets: Vec<SampleTarget> = {
            let runtimes = self.runtimes.read().await;
            runtimes
                .iter()
                .filter(|r| r.state.is_active())
                .filter_map(|r| {
                    r.handle.as_ref().map(|handle| SampleTarget {
                        name: r.name.clone(),
                        generation: r.generation,
                        pid: handle.pid(),
                        check: r.config.health_check.clone(),
                        port: r.config.port,
                    })
                })
                .collect()
        };

        if targets.is_empty() {
            return;
        }

        sampler.refresh();

        let mut probes = JoinSet::new();
        for target in targets {
            let usage = sampler.usage(target.pid);
            probes.spawn(async move {
                let health = health::probe(target.check.as_ref(), target.port).await;
                SampleResult {
                    name: target.name,
                    generation: target.generation,
                    usage,
                    health,
                }
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!("Health probe task failed: {}", e),
            }
        }

        let mut runtimes = self.runtimes.write().await;
        for result in results {
            let Ok(runtime) = find_mut(&mut runtimes, &result.name) else {
                continue;
            };
            if runtime.generation != result.generation || !runtime.state.is_active() {
                continue;
            }
            // Gone from the process table; the exit monitor settles it
            let Some(usage) = result.usage else {
                continue;
            };

            runtime.cpu_percent = usage.cpu_percent;
            runtime.memory_mb = usage.memory_mb();
            runtime.health = result.health;

            if runtime.state == ServiceState::Starting && result.health == HealthStatus::Healthy {
                info!("Service {} is running", runtime.name);
                runtime.state = ServiceState::Running;
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn watch_exit(inner: Weak<Inner>, name: String, generation: u64, exit: ExitWaiter) {
    let outcome = exit.wait().await;

    match inner.upgrade() {
        Some(inner) => inner.record_exit(&name, generation, outcome).await,
        None => debug!("Service {} exited after its manager was dropped", name),
    }
}

async fn run_sampler(inner: Weak<Inner>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sampler = ResourceSampler::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let Some(inner) = inner.upgrade() else {
            break;
        };
        // Dropping an unfinished pass aborts its probes
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = inner.sample(&mut sampler) => {}
        }
    }

    debug!("Sampler stopped");
}

fn find<'a>(runtimes: &'a [ServiceRuntime], name: &str) -> Result<&'a ServiceRuntime> {
    runtimes
        .iter()
        .find(|r| r.name == name)
        .ok_or_else(|| DevhubError::ServiceNotFound(name.to_string()))
}

fn find_mut<'a>(runtimes: &'a mut [ServiceRuntime], name: &str) -> Result<&'a mut ServiceRuntime> {
    runtimes
        .iter_mut()
        .find(|r| r.name == name)
        .ok_or_else(|| DevhubError::ServiceNotFound(name.to_string()))
}
