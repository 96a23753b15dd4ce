//! Orphan watchdog.
//!
//! The watchdog is a separate process started next to every daemon. It
//! watches the host (the program that launched the daemon) in the OS process
//! table and terminates the daemon once the host is gone, even if the host
//! died without running any shutdown code. A thread inside the host would die
//! with it, hence the separate process.

pub mod lister;

use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use crate::daemon::process::{terminate_pid, KillOutcome};
use crate::utils::Result;
use lister::{native_lister, ProcessEntry, ProcessLister, WATCHDOG_COMMAND};

/// What a process table scan found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Presence {
    pub watched: bool,
    pub target: bool,
}

/// How a watchdog session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchdogExit {
    /// The target was gone before the watchdog had to act.
    TargetGone,
    /// The watched process disappeared and the target was terminated.
    TargetTerminated,
}

pub struct WatchdogSession {
    watched: String,
    target_pid: u32,
    interval: Duration,
    lister: Arc<dyn ProcessLister>,
}

impl WatchdogSession {
    /// Session using the process lister of the running OS.
    pub fn new(watched: &str, target_pid: u32, interval: Duration) -> Result<Self> {
        Ok(Self::with_lister(watched, target_pid, interval, native_lister()?))
    }

    pub fn with_lister(
        watched: &str,
        target_pid: u32,
        interval: Duration,
        lister: Arc<dyn ProcessLister>,
    ) -> Self {
        tracing::debug!("platform lister: {}", lister.kind());
        Self { watched: watched.to_string(), target_pid, interval, lister }
    }

    /// Evaluate a snapshot. The target itself never counts as the watched
    /// process, whatever its command line looks like.
    pub fn presence(&self, entries: &[ProcessEntry]) -> Presence {
        let mut presence = Presence { watched: false, target: false };
        for entry in entries {
            if entry.pid == self.target_pid {
                if !entry.zombie {
                    presence.target = true;
                }
            } else if self.lister.is_watched(entry, &self.watched) {
                tracing::debug!("watched found at line {entry:?}");
                presence.watched = true;
            }
        }
        presence
    }

    async fn scan(&self) -> std::io::Result<Presence> {
        let lister = Arc::clone(&self.lister);
        let entries = tokio::task::spawn_blocking(move || lister.snapshot())
            .await
            .map_err(std::io::Error::other)??;
        Ok(self.presence(&entries))
    }

    /// Watch until the host or the target disappears.
    ///
    /// There is no timeout: the session lives exactly as long as the watched
    /// process. A failed scan is logged and retried on the next tick rather
    /// than treated as "host gone".
    pub async fn run(&self) -> std::io::Result<WatchdogExit> {
        tracing::info!(
            "Watching '{}' every {:?}, target pid {}",
            self.watched,
            self.interval,
            self.target_pid
        );

        loop {
            tokio::time::sleep(self.interval).await;

            let presence = match self.scan().await {
                Ok(presence) => presence,
                Err(e) => {
                    tracing::warn!("Process table scan failed: {e}");
                    continue;
                }
            };

            if !presence.target {
                tracing::info!("Process {} already terminated", self.target_pid);
                return Ok(WatchdogExit::TargetGone);
            }
            if !presence.watched {
                tracing::info!("'{}' not running anymore", self.watched);
                break;
            }
        }

        self.terminate_target()
    }

    fn terminate_target(&self) -> std::io::Result<WatchdogExit> {
        tracing::info!("killing target {}", self.target_pid);
        match terminate_pid(self.target_pid)? {
            KillOutcome::Signaled => Ok(WatchdogExit::TargetTerminated),
            KillOutcome::AlreadyGone => {
                tracing::info!("Process {} already terminated", self.target_pid);
                Ok(WatchdogExit::TargetGone)
            }
        }
    }
}

/// Start a watchdog process for `target_pid`, detached from our own process
/// group so it survives whatever kills the host. Returns the watchdog's pid.
pub fn spawn_detached(
    program: &Path,
    watched: &str,
    target_pid: u32,
    interval_secs: u64,
    log_path: &Path,
) -> std::io::Result<u32> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let log = std::fs::OpenOptions::new().create(true).append(true).open(log_path)?;

    let mut std_cmd = std::process::Command::new(program);
    std_cmd
        .arg("-v")
        .arg(WATCHDOG_COMMAND)
        .arg(watched)
        .arg(target_pid.to_string())
        .arg(interval_secs.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::from(log));
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        std_cmd.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        std_cmd.creation_flags(CREATE_NEW_PROCESS_GROUP | crate::daemon::process::CREATE_NO_WINDOW);
    }

    // tokio reaps the child in the background once the handle is dropped.
    let mut cmd = tokio::process::Command::from(std_cmd);
    cmd.kill_on_drop(false);

    let child = cmd.spawn()?;
    let pid = child.id().unwrap_or_default();
    tracing::info!("Watchdog started (pid {pid}) watching '{watched}' for daemon pid {target_pid}");
    Ok(pid)
}
