use owo_colors::OwoColorize;
use serde::Serialize;

use crate::cli::args::OutputFormat;
use sublack::daemon::{FormatOutcome, PortState, StartOutcome};

/// Snapshot printed by `daemon status`.
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub host: String,
    pub port: Option<u16>,
    pub running: bool,
    pub pid: Option<u32>,
    pub pid_alive: bool,
    pub port_state: Option<PortState>,
}

fn stdout_color() -> bool {
    supports_color::on(supports_color::Stream::Stdout).is_some()
}

fn stderr_color() -> bool {
    supports_color::on(supports_color::Stream::Stderr).is_some()
}

fn green(text: &str, color: bool) -> String {
    if color {
        text.green().to_string()
    } else {
        text.to_string()
    }
}

fn red(text: &str, color: bool) -> String {
    if color {
        text.red().to_string()
    } else {
        text.to_string()
    }
}

pub struct OutputFormatter {
    format: OutputFormat,
    color: bool,
}

impl OutputFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format, color: stdout_color() }
    }

    pub fn format_status(&self, report: &StatusReport) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(report).unwrap_or_else(|_| "{}".to_string())
            }
            OutputFormat::Human => self.status_human(report),
        }
    }

    fn status_human(&self, report: &StatusReport) -> String {
        let state = if report.running {
            green("running", self.color)
        } else {
            red("not running", self.color)
        };
        let endpoint = match report.port {
            Some(port) => format!("{}:{port}", report.host),
            None => "no port known".to_string(),
        };
        let mut output = format!("Daemon: {state} ({endpoint})");
        match report.pid {
            Some(pid) if report.pid_alive => output.push_str(&format!("\nPid: {pid}")),
            Some(pid) => output.push_str(&format!("\nPid: {pid} (stale)")),
            None => {}
        }
        if report.port_state == Some(PortState::Occupied) {
            output.push_str("\nPort is held by another program");
        }
        output
    }

    pub fn format_start(&self, outcome: &StartOutcome) -> String {
        if matches!(self.format, OutputFormat::Json) {
            return serde_json::to_string_pretty(outcome).unwrap_or_else(|_| "{}".to_string());
        }
        match outcome {
            StartOutcome::Started { pid, port } => format!(
                "{} on port {port} (pid {pid})",
                green("Daemon started", self.color)
            ),
            StartOutcome::AlreadyRunning { pid, port } => {
                let pid = pid.map_or_else(|| "unknown".to_string(), |p| p.to_string());
                format!("Daemon already running on port {port} (pid {pid})")
            }
            StartOutcome::Failed { port, output } => format!(
                "{} on port {port}\n{}",
                red("Daemon failed to start", self.color),
                output.trim_end()
            ),
        }
    }

    pub fn format_outcome(outcome: &FormatOutcome, file: &str) -> String {
        let label = outcome.message();
        if outcome.is_failure() {
            format!("{file}: {}", red(label, stderr_color()))
        } else {
            format!("{file}: {}", green(label, stderr_color()))
        }
    }
}
