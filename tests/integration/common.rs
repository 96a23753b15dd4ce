#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process;

/// Whether `python3` can be run; daemon tests are skipped without it.
pub fn python3_available() -> bool {
    process::Command::new("python3")
        .arg("--version")
        .stdout(process::Stdio::null())
        .stderr(process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// A tiny stand-in for blackd: binds `--bind-host`/`--bind-port`, answers the
/// `a=1` request like black would and reports everything else as unchanged.
/// A `STARTUP_DELAY` global, when defined, postpones the bind.
pub const FAKE_DAEMON: &str = r#"
import sys
import time
from http.server import BaseHTTPRequestHandler, HTTPServer

args = sys.argv[1:]
host = args[args.index("--bind-host") + 1]
port = int(args[args.index("--bind-port") + 1])


class Handler(BaseHTTPRequestHandler):
    def do_POST(self):
        length = int(self.headers.get("Content-Length") or 0)
        body = self.rfile.read(length).decode()
        if body == "a=1":
            out = b"a = 1\n"
            self.send_response(200)
            self.send_header("Content-Length", str(len(out)))
            self.end_headers()
            self.wfile.write(out)
        else:
            self.send_response(204)
            self.end_headers()

    def log_message(self, *args):
        pass


time.sleep(globals().get("STARTUP_DELAY", 0))
print("fake daemon on", host, port, flush=True)
HTTPServer((host, port), Handler).serve_forever()
"#;

/// Write the fake daemon into `dir` and return its path.
pub fn write_fake_daemon(dir: &Path) -> PathBuf {
    let path = dir.join("fake_blackd.py");
    std::fs::write(&path, FAKE_DAEMON).expect("failed to write fake daemon");
    path
}

/// Like [`write_fake_daemon`], but the daemon only binds after `delay_secs`.
pub fn write_fake_daemon_with_delay(dir: &Path, delay_secs: f64) -> PathBuf {
    let path = dir.join("fake_blackd.py");
    std::fs::write(&path, format!("STARTUP_DELAY = {delay_secs}\n{FAKE_DAEMON}"))
        .expect("failed to write fake daemon");
    path
}

/// Write a settings file into `dir` keeping every runtime file in `dir`.
pub fn write_config(dir: &Path, extra: &str) -> PathBuf {
    let path = dir.join("config.toml");
    let cache = dir.join("cache");
    let text = format!(
        "host = \"127.0.0.1\"\ncache_dir = {:?}\n{extra}\n",
        cache.to_string_lossy()
    );
    std::fs::write(&path, text).expect("failed to write config");
    path
}

/// A port nothing listens on right now.
pub fn free_port() -> u16 {
    std::net::TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .expect("no free port")
}

/// Unique token for process table matching.
pub fn unique_token(prefix: &str) -> String {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    format!("{prefix}{}x{nanos}", process::id())
}
