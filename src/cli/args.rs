use clap::builder::styling::{AnsiColor, Styles};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().bold())
    .literal(AnsiColor::Cyan.on_default().bold())
    .placeholder(AnsiColor::Cyan.on_default())
    .error(AnsiColor::Red.on_default().bold());

const AFTER_HELP: &str = "\x1b[1;32mQuick Reference:\x1b[0m
  \x1b[1;36mRun the daemon\x1b[0m (stopped automatically when the watched program exits):
    sublack daemon start                 Start blackd on an ephemeral port
    sublack daemon start --port 45484    Start blackd on a fixed port
    sublack daemon status                Is it answering?
    sublack daemon stop                  Stop it, even after a restart of the host

  \x1b[1;36mFormat files:\x1b[0m
    sublack format app.py                One-shot black, skipped if already formatted
    sublack format app.py --daemon       Use the running daemon instead
    sublack cache clear                  Forget what was already formatted";

#[derive(Parser)]
#[command(name = "sublack")]
#[command(about = "Run black as a supervised local daemon, with an orphan watchdog and a result cache")]
#[command(version)]
#[command(styles = STYLES)]
#[command(after_help = AFTER_HELP)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Settings file (default: <config dir>/sublack/config.toml)
    #[arg(long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// More logging (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage the background formatting daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommands,
    },

    /// Format a Python file in place
    #[command(
        long_about = "Format a Python file in place. Content already known to be well \
        formatted with the same options is skipped without running black.\n\n\
        Examples:\n  \
        sublack format app.py\n  \
        sublack format app.py -l 100 --fast\n  \
        sublack format app.py --daemon --stdout"
    )]
    Format {
        file: PathBuf,

        /// Send the request to the running daemon
        #[arg(long)]
        daemon: bool,

        /// Maximum line length
        #[arg(short = 'l', long, value_name = "N")]
        line_length: Option<u32>,

        /// Skip the AST safety check
        #[arg(long)]
        fast: bool,

        /// Leave string quotes alone
        #[arg(long)]
        skip_string_normalization: bool,

        /// Print the result instead of writing the file
        #[arg(long)]
        stdout: bool,
    },

    /// Manage the result cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Kill TARGET_PID once no process matching WATCHED is left
    #[command(hide = true)]
    Watchdog {
        watched: String,
        target_pid: u32,
        /// Seconds between process table scans
        #[arg(default_value_t = 5)]
        interval: u64,
    },
}

#[derive(Subcommand)]
pub enum DaemonCommands {
    /// Start the daemon and return once it answers
    Start {
        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        host: Option<String>,

        /// Process name whose exit stops the daemon
        #[arg(long, value_name = "NAME")]
        watch: Option<String>,

        /// Don't spawn a watchdog
        #[arg(long)]
        no_watchdog: bool,
    },
    /// Stop the daemon recorded in the pid cache
    Stop,
    /// Show whether the daemon answers
    Status {
        #[arg(long)]
        port: Option<u16>,

        #[arg(long, value_enum, default_value_t = OutputFormat::Human)]
        format: OutputFormat,
    },
    /// Start the daemon, keep it up until Ctrl-C, then stop it
    Serve {
        #[arg(long)]
        port: Option<u16>,

        #[arg(long)]
        host: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum CacheCommands {
    /// Forget every cached result
    Clear,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}
