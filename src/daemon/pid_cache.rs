//! Persisted daemon PID.
//!
//! The file outlives the host process so that a `stop` issued after an editor
//! restart can still find the daemon it started earlier. An empty file means
//! "no daemon recorded".

use std::path::{Path, PathBuf};

/// File name of the pid cache inside the cache root.
pub const PID_FILE: &str = "pid";

#[derive(Debug, Clone)]
pub struct PidCache {
    path: PathBuf,
}

impl PidCache {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Pid cache stored under the given cache root.
    pub fn in_dir(cache_root: &Path) -> Self {
        Self::new(cache_root.join(PID_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the cached PID.
    ///
    /// A missing, unreadable, empty or non-numeric file all mean "no PID".
    pub fn read(&self) -> Option<u32> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) => {
                tracing::debug!("No pid cache at {}: {e}", self.path.display());
                return None;
            }
        };

        match content.trim().parse::<u32>() {
            Ok(pid) if pid > 0 => Some(pid),
            _ => {
                tracing::debug!("No pid in cache");
                None
            }
        }
    }

    pub fn write(&self, pid: u32) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, pid.to_string())?;
        tracing::debug!("pid cache updated to: {pid}");
        Ok(())
    }

    /// Forget the cached PID (the file is kept, emptied).
    pub fn clear(&self) -> std::io::Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        std::fs::write(&self.path, "")?;
        tracing::debug!("pid cache cleared");
        Ok(())
    }

    /// Forget the cached PID only if it is still `pid`.
    ///
    /// Controllers sharing a cache root each record their own daemon here;
    /// stopping one must not drop the entry another one wrote since.
    pub fn clear_if(&self, pid: u32) -> std::io::Result<bool> {
        match self.read() {
            Some(cached) if cached == pid => {
                self.clear()?;
                Ok(true)
            }
            Some(cached) => {
                tracing::debug!("pid cache holds {cached}, not {pid}; left alone");
                Ok(false)
            }
            None => Ok(false),
        }
    }
}
