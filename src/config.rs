//! User settings.
//!
//! Settings are read from an optional TOML file. Every key has a default, so a
//! missing file is the same as an empty one. Only values the supervisor
//! consumes live here (endpoint, commands, timeouts, cache location).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::utils::{Result, SupervisorError};

/// Directory name used under the platform config and cache roots.
pub const APP_DIR: &str = "sublack";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Host the daemon binds to and is reached on.
    pub host: String,

    /// Fixed daemon port. `None` means "pick an ephemeral port".
    pub port: Option<u16>,

    /// Primary daemon executable (`blackd` on PATH by default).
    pub daemon_command: String,

    /// One-shot formatter executable.
    pub black_command: String,

    /// Interpreter used for the vendored daemon fallback.
    pub vendor_python: Option<PathBuf>,

    /// Vendored daemon script, run with `vendor_python`.
    pub vendor_daemon_script: Option<PathBuf>,

    /// Override for the per-installation cache directory.
    pub cache_dir: Option<PathBuf>,

    pub health_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub stop_timeout_ms: u64,

    pub watchdog: WatchdogSettings,
    pub format: FormatSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
            daemon_command: "blackd".to_string(),
            black_command: "black".to_string(),
            vendor_python: None,
            vendor_daemon_script: None,
            cache_dir: None,
            health_timeout_ms: 5_000,
            poll_interval_ms: 100,
            stop_timeout_ms: 10_000,
            watchdog: WatchdogSettings::default(),
            format: FormatSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchdogSettings {
    pub enabled: bool,

    /// Name of the host process to watch. Defaults to our own executable name.
    pub watched_process: Option<String>,

    pub interval_secs: u64,

    /// Executable that understands the `watchdog` subcommand.
    pub program: Option<PathBuf>,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self { enabled: true, watched_process: None, interval_secs: 5, program: None }
    }
}

impl WatchdogSettings {
    /// The process name the watchdog looks for in the process table.
    pub fn watched_name(&self) -> String {
        if let Some(name) = &self.watched_process {
            return name.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.file_stem().map(|s| s.to_string_lossy().into_owned()))
            .unwrap_or_else(|| APP_DIR.to_string())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }

    /// Path of the executable spawned as the watchdog.
    pub fn program(&self) -> Result<PathBuf> {
        match &self.program {
            Some(path) => Ok(path.clone()),
            None => Ok(std::env::current_exe()?),
        }
    }
}

/// Formatting options applied to every request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FormatSettings {
    pub line_length: Option<u32>,
    pub fast: bool,
    pub skip_string_normalization: bool,
    pub target_version: Vec<String>,
    pub use_daemon: bool,
}

impl Settings {
    /// Load settings from `path`, or from the default location when `None`.
    ///
    /// An explicitly given path must exist; the default one may be absent.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match default_config_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && !required => {
                tracing::debug!("No config file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(SupervisorError::Config { path, message: e.to_string() });
            }
        };

        let settings = Self::from_toml(&text)
            .map_err(|message| SupervisorError::Config { path: path.clone(), message })?;
        tracing::debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    pub fn from_toml(text: &str) -> std::result::Result<Self, String> {
        toml::from_str(text).map_err(|e| e.to_string())
    }

    /// Per-installation cache directory holding the pid file, the result
    /// cache and the daemon/watchdog logs.
    pub fn cache_root(&self) -> PathBuf {
        if let Some(dir) = &self.cache_dir {
            return dir.clone();
        }
        dirs::cache_dir().unwrap_or_else(std::env::temp_dir).join(APP_DIR)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.toml"))
}
