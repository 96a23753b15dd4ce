use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("daemon executable could not be started (tried: {})", tried.join(", "))]
    ExecutableNotFound { tried: Vec<String> },

    #[error("port {port} is already in use by another program")]
    PortOccupied { port: u16 },

    #[error("no free local port could be allocated: {0}")]
    NoFreePort(std::io::Error),

    #[error("invalid configuration in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },

    #[error("process inspection is not supported on {platform}")]
    UnsupportedPlatform { platform: &'static str },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T, E = SupervisorError> = std::result::Result<T, E>;
