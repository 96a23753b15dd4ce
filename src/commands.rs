use anyhow::{Context, Result};
use std::path::Path;
use std::time::Duration;

use crate::cli::args::{CacheCommands, DaemonCommands, OutputFormat};
use crate::cli::output::{OutputFormatter, StatusReport};
use sublack::cache::ResultCache;
use sublack::config::Settings;
use sublack::daemon::process::pid_alive;
use sublack::daemon::{
    DaemonController, FormatClient, FormatOptions, FormatOutcome, HealthChecker, LaunchCommand,
    PidCache, PortAllocator, PortState,
};
use sublack::format::{Backend, Formatter};
use sublack::watchdog::{WatchdogExit, WatchdogSession};

const STATUS_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

pub async fn handle_daemon_command(command: DaemonCommands, mut settings: Settings) -> Result<()> {
    match command {
        DaemonCommands::Start { port, host, watch, no_watchdog } => {
            apply_endpoint(&mut settings, port, host);
            if let Some(name) = watch {
                settings.watchdog.watched_process = Some(name);
            } else if settings.watchdog.watched_process.is_none() {
                // This process exits right after the start, so watching it
                // would stop the daemon within one interval.
                tracing::info!("No process to watch, watchdog disabled");
                settings.watchdog.enabled = false;
            }
            if no_watchdog {
                settings.watchdog.enabled = false;
            }

            let controller = DaemonController::new(&settings, &PortAllocator::new())?;
            let outcome = controller.start().await?;
            println!("{}", OutputFormatter::new(OutputFormat::Human).format_start(&outcome));
            if !outcome.is_success() {
                anyhow::bail!("daemon did not become reachable on port {}", controller.port());
            }
        }

        DaemonCommands::Stop => {
            let controller = DaemonController::new(&settings, &PortAllocator::new())?;
            if controller.stop().await {
                println!("Daemon stopped successfully");
            } else {
                println!("Daemon is not running");
            }
        }

        DaemonCommands::Status { port, format } => {
            apply_endpoint(&mut settings, port, None);
            let report = status_report(&settings).await?;
            println!("{}", OutputFormatter::new(format).format_status(&report));
        }

        DaemonCommands::Serve { port, host } => {
            apply_endpoint(&mut settings, port, host);
            let controller = DaemonController::new(&settings, &PortAllocator::new())?;
            let formatter = OutputFormatter::new(OutputFormat::Human);

            let outcome = controller.start().await?;
            println!("{}", formatter.format_start(&outcome));
            if !outcome.is_success() {
                anyhow::bail!("daemon did not become reachable on port {}", controller.port());
            }

            println!("Serving on {}:{}, press Ctrl-C to stop", controller.host(), controller.port());
            tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;

            if controller.stop().await {
                println!("Daemon stopped");
            }
        }
    }

    Ok(())
}

fn apply_endpoint(settings: &mut Settings, port: Option<u16>, host: Option<String>) {
    if port.is_some() {
        settings.port = port;
    }
    if let Some(host) = host {
        settings.host = host;
    }
}

async fn status_report(settings: &Settings) -> Result<StatusReport> {
    let pid = PidCache::in_dir(&settings.cache_root()).read();
    let alive = pid.is_some_and(pid_alive);

    let (running, port_state) = match settings.port {
        Some(port) => {
            let state = HealthChecker::new()?
                .probe_port(&settings.host, port, STATUS_PROBE_TIMEOUT)
                .await;
            (state == PortState::Daemon, Some(state))
        }
        // Without a known port the pid is all there is to go on.
        None => (alive, None),
    };

    Ok(StatusReport {
        host: settings.host.clone(),
        port: settings.port,
        running,
        pid,
        pid_alive: alive,
        port_state,
    })
}

pub struct FormatRequest<'a> {
    pub file: &'a Path,
    pub daemon: bool,
    pub line_length: Option<u32>,
    pub fast: bool,
    pub skip_string_normalization: bool,
    pub stdout: bool,
}

pub async fn handle_format_command(request: FormatRequest<'_>, settings: &Settings) -> Result<()> {
    let file = request.file;
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let mut options = FormatOptions::from_settings(&settings.format);
    if request.line_length.is_some() {
        options.line_length = request.line_length;
    }
    options.fast |= request.fast;
    options.skip_string_normalization |= request.skip_string_normalization;
    options.pyi = file.extension().is_some_and(|ext| ext == "pyi");

    let black = LaunchCommand::new(&settings.black_command);
    let backend = if request.daemon || settings.format.use_daemon {
        let port = settings
            .port
            .context("Formatting through the daemon needs a fixed `port` in the settings file")?;
        Backend::Daemon(FormatClient::new(&settings.host, port)?)
    } else {
        Backend::Subprocess(black.clone())
    };

    let formatter =
        Formatter::new(backend, black, options, ResultCache::in_dir(&settings.cache_root()));
    let outcome = formatter.format(&content).await;
    eprintln!("{}", OutputFormatter::format_outcome(&outcome, &file.display().to_string()));

    match outcome {
        FormatOutcome::Failed(detail) => anyhow::bail!("{}", detail.trim_end()),
        FormatOutcome::Reformatted(new) if !request.stdout => std::fs::write(file, new)
            .with_context(|| format!("Failed to write {}", file.display()))?,
        FormatOutcome::Reformatted(new) => print!("{new}"),
        FormatOutcome::Cached | FormatOutcome::Unchanged => {
            if request.stdout {
                print!("{content}");
            }
        }
    }
    Ok(())
}

pub fn handle_cache_command(command: CacheCommands, settings: &Settings) -> Result<()> {
    match command {
        CacheCommands::Clear => {
            let cache = ResultCache::in_dir(&settings.cache_root());
            cache
                .clear()
                .with_context(|| format!("Failed to clear {}", cache.path().display()))?;
            println!("Cache cleared");
        }
    }
    Ok(())
}

/// Body of the detached watchdog process.
pub async fn handle_watchdog_command(watched: &str, target_pid: u32, interval: u64) -> Result<()> {
    let session = WatchdogSession::new(watched, target_pid, Duration::from_secs(interval.max(1)))?;
    match session.run().await.context("Watchdog failed")? {
        WatchdogExit::TargetGone => tracing::info!("Nothing left to watch, exiting"),
        WatchdogExit::TargetTerminated => tracing::info!("Daemon {target_pid} terminated"),
    }
    Ok(())
}
