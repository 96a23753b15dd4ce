//! OS process table snapshots.
//!
//! POSIX systems and Windows expose unrelated process-listing tools, so each
//! gets its own [`ProcessLister`]. The right one is picked once, when the
//! watchdog is built.

use std::process::{Command, Stdio};
use std::sync::Arc;

use crate::utils::{Result, SupervisorError};

/// Subcommand name the watchdog runs under. Any command line containing it
/// as a separate word is a watchdog, never the watched host.
pub const WATCHDOG_COMMAND: &str = "watchdog";

/// One row of the process table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessEntry {
    pub pid: u32,
    /// Full command line on POSIX, image name on Windows.
    pub name: String,
    pub zombie: bool,
}

pub trait ProcessLister: Send + Sync {
    /// Short label for logs.
    fn kind(&self) -> &'static str;

    /// Take a snapshot of the process table.
    fn snapshot(&self) -> std::io::Result<Vec<ProcessEntry>>;

    /// The row for `pid`, if it exists.
    fn lookup(&self, pid: u32) -> std::io::Result<Option<ProcessEntry>> {
        Ok(self.snapshot()?.into_iter().find(|entry| entry.pid == pid))
    }

    /// Whether `entry` is an instance of the watched program.
    fn is_watched(&self, entry: &ProcessEntry, watched: &str) -> bool;
}

/// Pick the lister for the running OS.
pub fn native_lister() -> Result<Arc<dyn ProcessLister>> {
    if cfg!(windows) {
        Ok(Arc::new(TasklistLister))
    } else if cfg!(unix) {
        Ok(Arc::new(PsLister))
    } else {
        Err(SupervisorError::UnsupportedPlatform { platform: std::env::consts::OS })
    }
}

/// `ps` based lister for Linux and macOS.
#[derive(Debug, Clone, Copy, Default)]
pub struct PsLister;

impl ProcessLister for PsLister {
    fn kind(&self) -> &'static str {
        "ps"
    }

    fn snapshot(&self) -> std::io::Result<Vec<ProcessEntry>> {
        let output = Command::new("ps")
            .args(["-eo", "pid=,tty=,stat=,args="])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()?;
        if !output.status.success() {
            return Err(std::io::Error::other(format!("ps exited with {}", output.status)));
        }
        Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout)))
    }

    fn lookup(&self, pid: u32) -> std::io::Result<Option<ProcessEntry>> {
        // ps exits non-zero when no process matches.
        let output = Command::new("ps")
            .args(["-o", "pid=,tty=,stat=,args=", "-p", &pid.to_string()])
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()?;
        Ok(parse_ps_output(&String::from_utf8_lossy(&output.stdout))
            .into_iter()
            .find(|entry| entry.pid == pid))
    }

    fn is_watched(&self, entry: &ProcessEntry, watched: &str) -> bool {
        !entry.zombie
            && entry.pid != std::process::id()
            && entry.name.contains(watched)
            && !is_watchdog_invocation(&entry.name)
    }
}

/// `tasklist /FO CSV` based lister for Windows.
#[derive(Debug, Clone, Copy, Default)]
pub struct TasklistLister;

impl ProcessLister for TasklistLister {
    fn kind(&self) -> &'static str {
        "tasklist"
    }

    fn snapshot(&self) -> std::io::Result<Vec<ProcessEntry>> {
        let mut cmd = Command::new("tasklist");
        cmd.args(["/FO", "CSV", "/NH"]).stdin(Stdio::null()).stderr(Stdio::null());
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(crate::daemon::process::CREATE_NO_WINDOW);
        }
        let output = cmd.output()?;
        if !output.status.success() {
            return Err(std::io::Error::other(format!("tasklist exited with {}", output.status)));
        }
        Ok(parse_tasklist_csv(&String::from_utf8_lossy(&output.stdout)))
    }

    /// Image names are all tasklist shows, so another `sublack.exe`
    /// watchdog is indistinguishable from an editor named `sublack`. Watching
    /// `sublack` itself on Windows keeps every other watchdog alive.
    fn is_watched(&self, entry: &ProcessEntry, watched: &str) -> bool {
        let name = entry.name.to_ascii_lowercase();
        let watched = watched.to_ascii_lowercase();
        entry.pid != std::process::id()
            && (name == watched || name == format!("{watched}.exe"))
    }
}

fn is_watchdog_invocation(command: &str) -> bool {
    command.split_whitespace().any(|word| word == WATCHDOG_COMMAND)
}

/// Split off the next whitespace-delimited field.
fn next_field(s: &str) -> Option<(&str, &str)> {
    let s = s.trim_start();
    let end = s.find(char::is_whitespace).unwrap_or(s.len());
    if end == 0 {
        None
    } else {
        Some((&s[..end], &s[end..]))
    }
}

/// Parse `ps -eo pid=,tty=,stat=,args=` output.
///
/// Rows that don't start with a numeric pid are skipped.
pub fn parse_ps_output(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter_map(|line| {
            let (pid, rest) = next_field(line)?;
            let pid = pid.parse::<u32>().ok()?;
            let (_tty, rest) = next_field(rest)?;
            let (stat, rest) = next_field(rest)?;
            Some(ProcessEntry {
                pid,
                name: rest.trim().to_string(),
                zombie: stat.starts_with('Z'),
            })
        })
        .collect()
}

/// Parse `tasklist /FO CSV` output into (image name, pid) entries.
///
/// The header row, if present, is skipped because its pid column isn't
/// numeric.
pub fn parse_tasklist_csv(output: &str) -> Vec<ProcessEntry> {
    output
        .lines()
        .filter_map(|line| {
            let fields = split_csv_line(line);
            let name = fields.first()?;
            let pid = fields.get(1)?.trim().parse::<u32>().ok()?;
            Some(ProcessEntry { pid, name: name.clone(), zombie: false })
        })
        .collect()
}

/// Split one CSV row, honoring quotes and doubled-quote escapes.
fn split_csv_line(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches(['\r', '\n']).chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut field)),
            c => field.push(c),
        }
    }
    fields.push(field);
    fields
}
