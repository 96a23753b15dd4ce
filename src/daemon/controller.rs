//! Daemon lifecycle: start, health-check, adopt, stop.
//!
//! One [`DaemonController`] owns one daemon target (host + port). All state
//! lives in the controller; nothing is global, so controllers for different
//! ports are independent.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Mutex;

use super::health::{HealthChecker, PortState};
use super::pid_cache::PidCache;
use super::port::PortAllocator;
use super::process::{pid_alive, terminate_pid, wait_for_exit, KillOutcome, LaunchPlan, ProcessHandle};
use crate::config::{Settings, WatchdogSettings};
use crate::utils::{Result, SupervisorError};
use crate::watchdog;
use crate::watchdog::lister::native_lister;

/// Daemon stdout/stderr for `port`, truncated on every spawn there.
pub fn daemon_log_name(port: u16) -> String {
    format!("daemon-{port}.log")
}

/// Watchdog stderr, appended to.
pub const WATCHDOG_LOG: &str = "watchdog.log";

/// How long the runnability probe waits for an answer from a bound port.
const PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Grace period after a forced kill before giving up on a pid.
const KILL_GRACE: Duration = Duration::from_secs(2);

/// Result of [`DaemonController::start`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StartOutcome {
    /// A new daemon was spawned and answered within the health timeout.
    Started { pid: u32, port: u16 },
    /// A daemon already answered on the port and was adopted.
    AlreadyRunning { pid: Option<u32>, port: u16 },
    /// The daemon never became reachable; `output` is what it printed.
    Failed { port: u16, output: String },
}

impl StartOutcome {
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    pub fn pid(&self) -> Option<u32> {
        match self {
            Self::Started { pid, .. } => Some(*pid),
            Self::AlreadyRunning { pid, .. } => *pid,
            Self::Failed { .. } => None,
        }
    }
}

/// The daemon the controller currently knows about.
#[derive(Debug)]
struct DaemonInstance {
    pid: Option<u32>,
    /// Present only when this controller spawned the process.
    handle: Option<ProcessHandle>,
}

/// Supervisor for one daemon endpoint.
///
/// `start` and `stop` serialize on an internal lock: a second `start` waits
/// for the first to finish and then finds the daemon running; a `stop`
/// issued mid-start terminates whatever that start produced.
///
/// # Example
/// ```no_run
/// use sublack::config::Settings;
/// use sublack::daemon::{DaemonController, PortAllocator};
///
/// # async fn example() -> anyhow::Result<()> {
/// let ports = PortAllocator::new();
/// let controller = DaemonController::new(&Settings::default(), &ports)?;
///
/// if controller.start().await?.is_success() {
///     // send formatting requests to controller.port()
///     controller.stop().await;
/// }
/// # Ok(())
/// # }
/// ```
pub struct DaemonController {
    host: String,
    port: u16,
    /// The port came from the settings rather than the allocator.
    port_fixed: bool,
    plan: LaunchPlan,
    health_timeout: Duration,
    poll_interval: Duration,
    stop_timeout: Duration,
    watchdog: WatchdogSettings,
    cache_root: PathBuf,
    pid_cache: PidCache,
    health: HealthChecker,
    state: Mutex<Option<DaemonInstance>>,
}

impl DaemonController {
    /// Build a controller. Without a configured port, one is taken from
    /// `ports` right away, so controllers sharing an allocator never collide.
    pub fn new(settings: &Settings, ports: &PortAllocator) -> Result<Self> {
        let port = match settings.port {
            Some(port) => port,
            None => ports.allocate()?,
        };
        let cache_root = settings.cache_root();

        Ok(Self {
            host: settings.host.clone(),
            port,
            port_fixed: settings.port.is_some(),
            plan: LaunchPlan::from_settings(settings),
            health_timeout: settings.health_timeout(),
            poll_interval: settings.poll_interval(),
            stop_timeout: settings.stop_timeout(),
            watchdog: settings.watchdog.clone(),
            pid_cache: PidCache::in_dir(&cache_root),
            cache_root,
            health: HealthChecker::new()?,
            state: Mutex::new(None),
        })
    }

    /// Replace the launch plan (primary and fallback daemon commands).
    #[must_use]
    pub fn with_launch_plan(mut self, plan: LaunchPlan) -> Self {
        self.plan = plan;
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn pid_cache(&self) -> &PidCache {
        &self.pid_cache
    }

    /// PID of the daemon this controller knows about, if any.
    pub async fn pid(&self) -> Option<u32> {
        self.state.lock().await.as_ref().and_then(|instance| instance.pid)
    }

    /// True iff nothing is bound to `port`, so a daemon could be started there.
    ///
    /// Waits for an in-flight `start` so the answer reflects its result.
    pub async fn is_runnable(&self, port: u16) -> bool {
        let _state = self.state.lock().await;
        self.health.probe_port(&self.host, port, PROBE_TIMEOUT).await == PortState::Free
    }

    /// Whether the daemon answers right now.
    pub async fn is_running(&self) -> bool {
        self.health.ping(&self.host, self.port).await
    }

    /// Start the daemon unless one already answers on the port.
    ///
    /// Configuration problems (no runnable executable, port held by another
    /// program) are errors. A daemon that never becomes reachable is a
    /// [`StartOutcome::Failed`], with its output logged.
    pub async fn start(&self) -> Result<StartOutcome> {
        let mut state = self.state.lock().await;

        if let Some(instance) = state.as_mut() {
            let exited = instance.handle.as_mut().is_some_and(ProcessHandle::has_exited);
            if !exited && self.is_running().await {
                tracing::info!("Daemon already running on port {}", self.port);
                return Ok(StartOutcome::AlreadyRunning { pid: instance.pid, port: self.port });
            }
            tracing::debug!("Known daemon on port {} is gone, starting anew", self.port);
            *state = None;
        }

        match self.health.probe_port(&self.host, self.port, PROBE_TIMEOUT).await {
            PortState::Free => {}
            PortState::Daemon => {
                let pid = match self.pid_cache.read() {
                    Some(pid) if pid_alive(pid) && self.owns_pid(pid).await => Some(pid),
                    _ => None,
                };
                tracing::info!("Adopting daemon already running on port {} (pid {pid:?})", self.port);
                *state = Some(DaemonInstance { pid, handle: None });
                return Ok(StartOutcome::AlreadyRunning { pid, port: self.port });
            }
            PortState::Occupied => {
                tracing::error!("Port {} is used by another program", self.port);
                return Err(SupervisorError::PortOccupied { port: self.port });
            }
        }

        let mut handle = self.spawn()?;
        let pid = handle.pid();

        let reachable = tokio::select! {
            up = self.health.is_running(&self.host, self.port, self.health_timeout, self.poll_interval) => up,
            status = handle.wait() => {
                tracing::debug!("Daemon exited during startup: {status:?}");
                false
            }
        };

        if !reachable {
            if !handle.has_exited() {
                if let Err(e) = handle.kill().await {
                    tracing::warn!("Failed to kill unreachable daemon (pid {pid}): {e}");
                }
            }
            let output = handle.output();
            tracing::error!(
                "Daemon failed to start on port {} within {:?}:\n{output}",
                self.port,
                self.health_timeout
            );
            return Ok(StartOutcome::Failed { port: self.port, output });
        }

        if let Err(e) = self.pid_cache.write(pid) {
            tracing::warn!("Could not persist daemon pid {pid}: {e}");
        }
        *state = Some(DaemonInstance { pid: Some(pid), handle: Some(handle) });
        tracing::info!("Daemon started on port {} (pid {pid})", self.port);

        self.spawn_watchdog(pid);
        Ok(StartOutcome::Started { pid, port: self.port })
    }

    /// Start the daemon if it isn't answering yet.
    pub async fn ensure_running(&self) -> Result<StartOutcome> {
        if self.is_running().await {
            let pid = self.pid().await.or_else(|| self.pid_cache.read());
            return Ok(StartOutcome::AlreadyRunning { pid, port: self.port });
        }
        self.start().await
    }

    /// Try the launch candidates in order; the first one that spawns wins.
    fn spawn(&self) -> Result<ProcessHandle> {
        let log_path = self.cache_root.join(daemon_log_name(self.port));
        let bind_args = vec![
            "--bind-host".to_string(),
            self.host.clone(),
            "--bind-port".to_string(),
            self.port.to_string(),
        ];

        let mut tried = Vec::new();
        for command in self.plan.candidates() {
            match ProcessHandle::spawn(command, &bind_args, &log_path) {
                Ok(handle) => return Ok(handle),
                Err(e) => {
                    tracing::warn!("Could not run '{}': {e}", command.label());
                    tried.push(command.label());
                }
            }
        }

        tracing::error!("No daemon executable could be started");
        Err(SupervisorError::ExecutableNotFound { tried })
    }

    fn spawn_watchdog(&self, pid: u32) {
        if !self.watchdog.enabled {
            return;
        }
        let program = match self.watchdog.program() {
            Ok(program) => program,
            Err(e) => {
                tracing::warn!("No watchdog for daemon pid {pid}: {e}");
                return;
            }
        };
        if let Err(e) = watchdog::spawn_detached(
            &program,
            &self.watchdog.watched_name(),
            pid,
            self.watchdog.interval().as_secs(),
            &self.cache_root.join(WATCHDOG_LOG),
        ) {
            tracing::warn!("Failed to spawn watchdog for daemon pid {pid}: {e}");
        }
    }

    /// Stop the daemon.
    ///
    /// Uses the owned process handle when this controller started the
    /// daemon, otherwise the cached PID (possibly written by an earlier host).
    /// Returns false when there was nothing to stop or the process would not
    /// die; never errors.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.lock().await;
        tracing::debug!("Stopping daemon on port {}", self.port);

        let stopped = match state.take() {
            Some(DaemonInstance { handle: Some(mut handle), .. }) => {
                let pid = handle.pid();
                self.stop_handle(&mut handle).await.then_some(pid)
            }
            Some(DaemonInstance { pid: Some(pid), handle: None }) => {
                self.stop_pid(pid).await.then_some(pid)
            }
            Some(DaemonInstance { pid: None, handle: None }) | None => {
                match self.pid_cache.read() {
                    Some(pid) => self.stop_pid(pid).await.then_some(pid),
                    None => {
                        tracing::warn!("No pid cached - cannot stop daemon");
                        None
                    }
                }
            }
        };

        let Some(pid) = stopped else {
            return false;
        };
        self.forget(pid);
        tracing::info!("Daemon stopped");
        true
    }

    /// Drop `pid` from the pid cache unless another daemon was recorded since.
    fn forget(&self, pid: u32) {
        if let Err(e) = self.pid_cache.clear_if(pid) {
            tracing::warn!("Could not clear pid cache: {e}");
        }
    }

    /// Whether `pid` still runs a daemon launched the way this controller
    /// launches them, rather than a process that inherited a recycled pid.
    async fn owns_pid(&self, pid: u32) -> bool {
        let lister = match native_lister() {
            Ok(lister) => lister,
            Err(e) => {
                tracing::warn!("Cannot inspect pid {pid}: {e}");
                return false;
            }
        };
        let entry = match tokio::task::spawn_blocking(move || lister.lookup(pid)).await {
            Ok(Ok(entry)) => entry,
            Ok(Err(e)) => {
                tracing::warn!("Cannot inspect pid {pid}: {e}");
                return false;
            }
            Err(e) => {
                tracing::warn!("Process lookup for pid {pid} panicked: {e}");
                return false;
            }
        };
        match entry {
            Some(entry) if !entry.zombie => self.matches_launch(&entry.name),
            _ => false,
        }
    }

    /// Match a command line (POSIX) or image name (Windows) against the
    /// launch plan and, where the command line is visible, the bound port.
    fn matches_launch(&self, command: &str) -> bool {
        let ours: Vec<String> = self
            .plan
            .candidates()
            .flat_map(|c| {
                std::iter::once(c.program.to_string_lossy().into_owned()).chain(c.args.iter().cloned())
            })
            .filter_map(|word| stem(&word))
            .collect();
        let words: Vec<&str> = command.split_whitespace().collect();
        let launched_by_us = words.iter().filter_map(|w| stem(w)).any(|s| ours.contains(&s));
        if cfg!(windows) {
            return launched_by_us;
        }

        let port = self.port.to_string();
        let bound = words
            .windows(2)
            .any(|w| w[0] == "--bind-port" && (!self.port_fixed || w[1] == port));
        launched_by_us && bound
    }

    async fn stop_handle(&self, handle: &mut ProcessHandle) -> bool {
        let pid = handle.pid();
        if let Err(e) = handle.terminate() {
            tracing::warn!("Failed to terminate daemon pid {pid}: {e}");
        }
        if handle.wait_timeout(self.stop_timeout).await {
            return true;
        }

        tracing::warn!("Daemon pid {pid} ignored terminate for {:?}, killing", self.stop_timeout);
        if let Err(e) = handle.kill().await {
            tracing::error!("Failed to kill daemon pid {pid}: {e}");
            return false;
        }
        true
    }

    async fn stop_pid(&self, pid: u32) -> bool {
        if !pid_alive(pid) {
            tracing::info!("Cached daemon pid {pid} is not running");
            self.forget(pid);
            return false;
        }
        if !self.owns_pid(pid).await {
            tracing::warn!("Pid {pid} is no longer a daemon started here, leaving it alone");
            self.forget(pid);
            return false;
        }

        match terminate_pid(pid) {
            Ok(KillOutcome::Signaled) => {}
            Ok(KillOutcome::AlreadyGone) => return true,
            Err(e) => {
                tracing::error!("Failed to stop daemon pid {pid}: {e}");
                return false;
            }
        }

        let timeout = self.stop_timeout + KILL_GRACE;
        let gone = wait_for_exit(pid, timeout, self.poll_interval).await;
        if !gone {
            tracing::error!("Daemon pid {pid} still alive after {timeout:?}");
        }
        gone
    }
}

/// Lowercased file stem of a command word, `None` for flags.
fn stem(word: &str) -> Option<String> {
    if word.starts_with('-') {
        return None;
    }
    Path::new(word).file_stem().map(|s| s.to_string_lossy().to_ascii_lowercase())
}
