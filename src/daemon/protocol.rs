//! HTTP protocol spoken by the formatting daemon.
//!
//! The daemon takes the source as a POST body on `/` and formatting options as
//! `X-*` headers. The status code carries the result:
//!
//! | status | meaning                                   |
//! |--------|-------------------------------------------|
//! | 200    | reformatted, body is the new content      |
//! | 204    | input already well formatted              |
//! | 400    | invalid input, body is the error          |
//! | 500    | formatter failure, body is the error      |

use serde::Serialize;

use crate::config::FormatSettings;

/// Body sent when probing whether a port is served by the daemon itself.
pub const PROBE_BODY: &str = "a=1";

/// What the daemon answers to [`PROBE_BODY`].
pub const PROBE_EXPECTED: &str = "a = 1\n";

pub const HEADER_LINE_LENGTH: &str = "X-Line-Length";
pub const HEADER_FAST_OR_SAFE: &str = "X-Fast-Or-Safe";
pub const HEADER_SKIP_STRING_NORMALIZATION: &str = "X-Skip-String-Normalization";
pub const HEADER_PYTHON_VARIANT: &str = "X-Python-Variant";
pub const CONTENT_TYPE: &str = "application/octet-stream; charset=utf-8";

/// Formatting options shared by the daemon and the one-shot subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FormatOptions {
    pub line_length: Option<u32>,
    pub fast: bool,
    pub skip_string_normalization: bool,
    /// Format as a stub file (`.pyi`).
    pub pyi: bool,
    pub target_versions: Vec<String>,
}

impl FormatOptions {
    pub fn from_settings(settings: &FormatSettings) -> Self {
        Self {
            line_length: settings.line_length,
            fast: settings.fast,
            skip_string_normalization: settings.skip_string_normalization,
            pyi: false,
            target_versions: settings.target_version.clone(),
        }
    }

    /// Command line for a one-shot run reading stdin (`black - ...`).
    ///
    /// This exact argument list is also the command half of a result-cache
    /// key, so anything that changes the output must show up here.
    pub fn command_args(&self, black_command: &str) -> Vec<String> {
        let mut args = vec![black_command.to_string(), "-".to_string()];

        if let Some(length) = self.line_length {
            args.push("-l".to_string());
            args.push(length.to_string());
        }
        if self.fast {
            args.push("--fast".to_string());
        }
        if self.skip_string_normalization {
            args.push("--skip-string-normalization".to_string());
        }
        if self.pyi {
            args.push("--pyi".to_string());
        }
        for version in &self.target_versions {
            args.push("--target-version".to_string());
            args.push(version.clone());
        }
        args
    }

    /// The same options expressed as daemon request headers.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();

        if let Some(length) = self.line_length {
            headers.push((HEADER_LINE_LENGTH, length.to_string()));
        }
        if self.fast {
            headers.push((HEADER_FAST_OR_SAFE, "fast".to_string()));
        }
        if self.skip_string_normalization {
            headers.push((HEADER_SKIP_STRING_NORMALIZATION, "1".to_string()));
        }
        if self.pyi {
            headers.push((HEADER_PYTHON_VARIANT, "pyi".to_string()));
        } else if !self.target_versions.is_empty() {
            headers.push((HEADER_PYTHON_VARIANT, self.target_versions.join(",")));
        }
        headers
    }
}

/// Result of one formatting request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum FormatOutcome {
    /// Skipped: the result cache says this input is already formatted.
    Cached,
    Unchanged,
    Reformatted(String),
    Failed(String),
}

impl FormatOutcome {
    /// Map a daemon HTTP response onto an outcome.
    pub fn from_response(status: u16, body: String) -> Self {
        match status {
            200 => Self::Reformatted(body),
            204 => Self::Unchanged,
            400 | 500 => Self::Failed(body),
            other => Self::Failed(format!("unexpected daemon status {other}: {body}")),
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Status line for the editor.
    pub fn message(&self) -> &str {
        match self {
            Self::Cached => "already well formatted (cache)",
            Self::Unchanged => "already well formatted",
            Self::Reformatted(_) => "reformatted",
            Self::Failed(_) => "reformatting error, check logs",
        }
    }
}
