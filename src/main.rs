use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::args::{Cli, Commands};
use commands::FormatRequest;
use sublack::config::Settings;

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sublack=warn")),
        1 => EnvFilter::new("sublack=info"),
        _ => EnvFilter::new("sublack=debug"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // The watchdog must not depend on a settings file that may have changed
    // since the daemon was started.
    if let Commands::Watchdog { watched, target_pid, interval } = &cli.command {
        return commands::handle_watchdog_command(watched, *target_pid, *interval).await;
    }

    let settings = Settings::load(cli.config.as_deref()).context("Failed to load settings")?;

    match cli.command {
        Commands::Daemon { command } => commands::handle_daemon_command(command, settings).await?,
        Commands::Format { file, daemon, line_length, fast, skip_string_normalization, stdout } => {
            let request = FormatRequest {
                file: &file,
                daemon,
                line_length,
                fast,
                skip_string_normalization,
                stdout,
            };
            commands::handle_format_command(request, &settings).await?;
        }
        Commands::Cache { command } => commands::handle_cache_command(command, &settings)?,
        Commands::Watchdog { .. } => {}
    }

    Ok(())
}
