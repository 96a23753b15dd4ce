//! Daemon process ownership and cross-platform process signaling.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tokio::process::{Child, Command};

use crate::config::Settings;

/// `CREATE_NO_WINDOW`: keep helper processes from flashing a console.
#[cfg(windows)]
pub(crate) const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// One concrete way of invoking the daemon executable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl LaunchCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self { program: program.into(), args: Vec::new() }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Human-readable form, used in logs and errors.
    pub fn label(&self) -> String {
        std::iter::once(self.program.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// The configured daemon command plus at most one vendored fallback.
///
/// Resolution walks the candidates in order and stops at the first one that
/// spawns, so the retry depth is fixed at two.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    primary: LaunchCommand,
    fallback: Option<LaunchCommand>,
}

impl LaunchPlan {
    pub fn new(primary: LaunchCommand, fallback: Option<LaunchCommand>) -> Self {
        Self { primary, fallback }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        let primary = LaunchCommand::new(expand_home(&settings.daemon_command));
        let fallback = match (&settings.vendor_python, &settings.vendor_daemon_script) {
            (Some(python), Some(script)) => {
                Some(LaunchCommand::new(python).arg(script.to_string_lossy()))
            }
            _ => None,
        };
        Self { primary, fallback }
    }

    pub fn candidates(&self) -> impl Iterator<Item = &LaunchCommand> {
        std::iter::once(&self.primary).chain(self.fallback.as_ref())
    }
}

/// Expand a leading `~/` the way a shell would.
fn expand_home(command: &str) -> PathBuf {
    if let Some(rest) = command.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(command)
}

/// An owned, running daemon process.
///
/// stdout and stderr go to a log file so the daemon never blocks on a full
/// pipe after the host exits; the log is read back when startup fails.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: u32,
    log_path: PathBuf,
}

impl ProcessHandle {
    /// Spawn `command` followed by `extra_args`, truncating `log_path`.
    pub fn spawn(
        command: &LaunchCommand,
        extra_args: &[String],
        log_path: &Path,
    ) -> std::io::Result<Self> {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let log = File::create(log_path)?;

        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .args(extra_args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log.try_clone()?))
            .stderr(Stdio::from(log))
            .kill_on_drop(false);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);

        let child = cmd.spawn()?;
        let pid = child.id().ok_or_else(|| {
            std::io::Error::other("process exited before reporting a pid")
        })?;

        tracing::debug!("Spawned '{} {}' (pid {pid})", command.label(), extra_args.join(" "));
        Ok(Self { child, pid, log_path: log_path.to_path_buf() })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Whatever the process has written to its log so far.
    pub fn output(&self) -> String {
        std::fs::read_to_string(&self.log_path).unwrap_or_default()
    }

    /// Ask the process to exit (SIGTERM; a tree kill on Windows).
    pub fn terminate(&mut self) -> std::io::Result<()> {
        if self.has_exited() {
            return Ok(());
        }
        terminate_pid(self.pid).map(|_| ())
    }

    /// Forcefully kill the process and reap it.
    pub async fn kill(&mut self) -> std::io::Result<()> {
        self.child.kill().await
    }

    pub async fn wait(&mut self) -> std::io::Result<ExitStatus> {
        self.child.wait().await
    }

    /// Wait for exit for at most `timeout`. Returns true if the process exited.
    pub async fn wait_timeout(&mut self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!("pid {} exited with {status}", self.pid);
                true
            }
            Ok(Err(e)) => {
                tracing::warn!("Failed waiting on pid {}: {e}", self.pid);
                false
            }
            Err(_) => false,
        }
    }

    pub fn has_exited(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(Some(_)))
    }
}

/// Result of signaling a process by PID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Signaled,
    AlreadyGone,
}

/// Send a termination request to `pid`.
///
/// A PID that no longer exists is reported as [`KillOutcome::AlreadyGone`].
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn terminate_pid(pid: u32) -> std::io::Result<KillOutcome> {
    let raw = to_pid_t(pid)?;
    // SAFETY: kill(2) has no memory-safety preconditions; `raw` is a positive pid.
    let ret = unsafe { libc::kill(raw, libc::SIGTERM) };
    if ret == 0 {
        tracing::debug!("Sent SIGTERM to pid {pid}");
        return Ok(KillOutcome::Signaled);
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        Ok(KillOutcome::AlreadyGone)
    } else {
        Err(err)
    }
}

/// Whether a process with this PID currently exists.
#[cfg(unix)]
#[allow(unsafe_code)]
pub fn pid_alive(pid: u32) -> bool {
    let Ok(raw) = to_pid_t(pid) else {
        return false;
    };
    // SAFETY: signal 0 only performs the existence and permission check.
    let ret = unsafe { libc::kill(raw, 0) };
    let exists = ret == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM);
    exists && !is_zombie(pid)
}

/// A zombie still answers signal 0 until its parent reaps it, which an
/// orphaned daemon's new parent may never do.
#[cfg(unix)]
fn is_zombie(pid: u32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // The command name in parentheses may contain spaces; the state follows it.
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .is_some_and(|state| state == "Z")
}

#[cfg(unix)]
fn to_pid_t(pid: u32) -> std::io::Result<libc::pid_t> {
    match libc::pid_t::try_from(pid) {
        Ok(raw) if raw > 0 => Ok(raw),
        _ => Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, format!("invalid pid {pid}"))),
    }
}

/// Kill `pid` and its whole process tree with `taskkill /F /T`.
#[cfg(windows)]
pub fn terminate_pid(pid: u32) -> std::io::Result<KillOutcome> {
    use std::os::windows::process::CommandExt;

    if !pid_alive(pid) {
        return Ok(KillOutcome::AlreadyGone);
    }
    let status = std::process::Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid.to_string()])
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .creation_flags(CREATE_NO_WINDOW)
        .status()?;
    if status.success() {
        tracing::debug!("daemon with pid {pid} destroyed");
        Ok(KillOutcome::Signaled)
    } else if pid_alive(pid) {
        Err(std::io::Error::other(format!("taskkill failed for pid {pid}")))
    } else {
        Ok(KillOutcome::AlreadyGone)
    }
}

#[cfg(windows)]
pub fn pid_alive(pid: u32) -> bool {
    use std::os::windows::process::CommandExt;

    let output = std::process::Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}"), "/FO", "CSV", "/NH"])
        .stderr(Stdio::null())
        .creation_flags(CREATE_NO_WINDOW)
        .output();
    match output {
        Ok(out) => crate::watchdog::lister::parse_tasklist_csv(&String::from_utf8_lossy(&out.stdout))
            .iter()
            .any(|entry| entry.pid == pid),
        Err(_) => false,
    }
}

/// Poll until `pid` disappears or `timeout` elapses.
pub async fn wait_for_exit(pid: u32, timeout: Duration, poll: Duration) -> bool {
    let start = Instant::now();
    loop {
        if !pid_alive(pid) {
            return true;
        }
        if start.elapsed() >= timeout {
            return false;
        }
        tokio::time::sleep(poll).await;
    }
}
