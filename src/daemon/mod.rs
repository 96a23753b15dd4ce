//! Local formatting daemon supervision.
//!
//! This module launches the daemon on a local port, waits until it answers,
//! remembers its PID across host restarts and stops it again. Formatting
//! requests then go straight to its HTTP endpoint.

pub mod client;
pub mod controller;
pub mod health;
pub mod pid_cache;
pub mod port;
pub mod process;
pub mod protocol;

// Re-export main types for convenience
pub use client::FormatClient;
pub use controller::{DaemonController, StartOutcome};
pub use health::{HealthChecker, PortState};
pub use pid_cache::PidCache;
pub use port::PortAllocator;
pub use process::{KillOutcome, LaunchCommand, LaunchPlan, ProcessHandle};
pub use protocol::{FormatOptions, FormatOutcome};
