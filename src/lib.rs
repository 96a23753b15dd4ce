//! Supervision of a local `blackd` formatting daemon.
//!
//! - [`daemon`]: port allocation, process ownership, health checks, pid
//!   persistence and the [`daemon::DaemonController`] tying them together.
//! - [`watchdog`]: a detached helper process that stops the daemon once the
//!   host that launched it is gone.
//! - [`cache`]: bounded record of content already known to be well formatted.
//! - [`format`]: the front-end combining the cache with a daemon or a one-shot
//!   `black` subprocess.

pub mod cache;
pub mod config;
pub mod daemon;
pub mod format;
pub mod utils;
pub mod watchdog;
