//! Formatting front-end: result cache first, then the daemon or a one-shot
//! `black -` subprocess.

use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::cache::ResultCache;
use crate::daemon::client::FormatClient;
use crate::daemon::process::LaunchCommand;
use crate::daemon::protocol::{FormatOptions, FormatOutcome};

/// Where formatting requests go.
#[derive(Debug, Clone)]
pub enum Backend {
    /// HTTP requests to a running daemon.
    Daemon(FormatClient),
    /// One `black -` process per request.
    Subprocess(LaunchCommand),
}

#[derive(Debug, Clone)]
pub struct Formatter {
    backend: Backend,
    black: LaunchCommand,
    options: FormatOptions,
    cache: ResultCache,
}

impl Formatter {
    /// `black` is the one-shot command line; it is also what cache keys are
    /// derived from, whichever backend is used.
    pub fn new(
        backend: Backend,
        black: LaunchCommand,
        options: FormatOptions,
        cache: ResultCache,
    ) -> Self {
        Self { backend, black, options, cache }
    }

    pub fn options(&self) -> &FormatOptions {
        &self.options
    }

    /// Cache key for the current options.
    pub fn cache_key(&self) -> String {
        self.options.command_args(&self.black.label()).join(" ")
    }

    pub async fn format(&self, content: &str) -> FormatOutcome {
        let key = self.cache_key();
        if self.cache.is_cached(content.as_bytes(), &key) {
            tracing::info!("Code already formatted, nothing to do");
            return FormatOutcome::Cached;
        }

        let outcome = match &self.backend {
            Backend::Daemon(client) => client.format(content, &self.options).await,
            Backend::Subprocess(black) => run_black(black, &self.options, content).await,
        };

        let formatted = match &outcome {
            FormatOutcome::Unchanged => Some(content),
            FormatOutcome::Reformatted(new) => Some(new.as_str()),
            FormatOutcome::Cached | FormatOutcome::Failed(_) => None,
        };
        if let Some(formatted) = formatted {
            if let Err(e) = self.cache.add(formatted.as_bytes(), &key) {
                tracing::warn!("Could not update result cache: {e}");
            }
        }
        outcome
    }

    pub fn clear_cache(&self) -> std::io::Result<()> {
        self.cache.clear()
    }
}

/// Pipe `content` through a one-shot `black -` process.
pub async fn run_black(black: &LaunchCommand, options: &FormatOptions, content: &str) -> FormatOutcome {
    let args = options.command_args("-");
    let mut cmd = Command::new(&black.program);
    cmd.args(&black.args)
        .args(&args[1..])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(windows)]
    cmd.creation_flags(crate::daemon::process::CREATE_NO_WINDOW);

    tracing::debug!("run '{} {}'", black.label(), args[1..].join(" "));
    let mut child = match cmd.spawn() {
        Ok(child) => child,
        Err(e) => {
            let msg = format!("could not run '{}': {e}", black.label());
            tracing::error!("{msg}");
            return FormatOutcome::Failed(msg);
        }
    };

    if let Some(mut stdin) = child.stdin.take() {
        let input = content.as_bytes().to_vec();
        tokio::spawn(async move {
            if let Err(e) = stdin.write_all(&input).await {
                tracing::debug!("formatter closed stdin early: {e}");
            }
        });
    }

    let output = match child.wait_with_output().await {
        Ok(output) => output,
        Err(e) => return FormatOutcome::Failed(e.to_string()),
    };
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if !output.status.success() {
        tracing::error!("formatter failed ({}): {stderr}", output.status);
        return FormatOutcome::Failed(stderr);
    }
    if stderr.contains("unchanged") {
        return FormatOutcome::Unchanged;
    }
    FormatOutcome::Reformatted(String::from_utf8_lossy(&output.stdout).into_owned())
}
