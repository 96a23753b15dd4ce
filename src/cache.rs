//! Cache of content already known to be well formatted.
//!
//! One line per entry, `<fingerprint>|||<command>`, newest first. The command
//! part is the exact formatter command line, so the same content formatted
//! with other options is a different entry. Only the newest
//! [`MAX_ENTRIES`] lines are kept.

use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

/// File name inside the cache directory.
pub const CACHE_FILE: &str = "formatted";

pub const MAX_ENTRIES: usize = 251;

const SEPARATOR: &str = "|||";

/// Hex SHA-256 of `content`.
pub fn fingerprint(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

#[derive(Debug, Clone)]
pub struct ResultCache {
    path: PathBuf,
}

impl ResultCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(CACHE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current entries as `(fingerprint, command)` pairs, newest first.
    ///
    /// A missing or unreadable file is an empty cache. Lines without the
    /// separator are skipped.
    pub fn entries(&self) -> Vec<(String, String)> {
        let Ok(text) = std::fs::read_to_string(&self.path) else {
            return Vec::new();
        };
        text.lines()
            .filter_map(|line| line.split_once(SEPARATOR))
            .map(|(fp, cmd)| (fp.to_string(), cmd.to_string()))
            .collect()
    }

    pub fn is_cached(&self, content: &[u8], command: &str) -> bool {
        let fp = fingerprint(content);
        let hit = self.entries().iter().any(|(f, c)| *f == fp && c == command);
        tracing::debug!("cache {} for {command}", if hit { "hit" } else { "miss" });
        hit
    }

    /// Record `content` as well formatted under `command`.
    ///
    /// Returns false without touching the file when the exact entry is
    /// already present. The file is replaced atomically, so a crash leaves
    /// either the old or the new list.
    pub fn add(&self, content: &[u8], command: &str) -> std::io::Result<bool> {
        let fp = fingerprint(content);
        let mut entries = self.entries();
        if entries.iter().any(|(f, c)| *f == fp && c == command) {
            return Ok(false);
        }

        entries.insert(0, (fp, command.to_string()));
        entries.truncate(MAX_ENTRIES);
        self.write_entries(&entries)?;
        Ok(true)
    }

    /// Empty the cache. A missing file is fine.
    pub fn clear(&self) -> std::io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!("Cache cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn write_entries(&self, entries: &[(String, String)]) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("tmp");
        {
            let mut file = std::io::BufWriter::new(std::fs::File::create(&tmp)?);
            for (fp, cmd) in entries {
                writeln!(file, "{fp}{SEPARATOR}{cmd}")?;
            }
            file.flush()?;
        }
        std::fs::rename(&tmp, &self.path)
    }
}
