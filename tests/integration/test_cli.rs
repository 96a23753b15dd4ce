#[path = "common.rs"]
mod common;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn test_help_lists_commands() {
    cargo_bin_cmd!("sublack")
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("daemon"))
        .stdout(predicate::str::contains("format"))
        .stdout(predicate::str::contains("cache"));
}

#[test]
fn test_missing_config_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    cargo_bin_cmd!("sublack")
        .arg("--config")
        .arg(dir.path().join("nope.toml"))
        .args(["cache", "clear"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load settings"));
}

#[test]
fn test_malformed_config_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::write_config(dir.path(), "port = \"many\"");
    cargo_bin_cmd!("sublack")
        .arg("--config")
        .arg(&config)
        .args(["cache", "clear"])
        .assert()
        .failure();
}

#[test]
fn test_stop_with_nothing_cached() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::write_config(dir.path(), "");
    cargo_bin_cmd!("sublack")
        .arg("--config")
        .arg(&config)
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Daemon is not running"));
}

#[test]
fn test_status_json_when_nothing_runs() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::write_config(dir.path(), "");
    let output = cargo_bin_cmd!("sublack")
        .arg("--config")
        .arg(&config)
        .args(["daemon", "status", "--format", "json", "--port"])
        .arg(common::free_port().to_string())
        .output()
        .unwrap();
    assert!(output.status.success());

    let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(value["running"], false);
    assert_eq!(value["port_state"], "free");
    assert!(value["pid"].is_null());
}

#[test]
fn test_start_without_any_executable_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::write_config(dir.path(), "daemon_command = \"/nope/blackd\"");
    cargo_bin_cmd!("sublack")
        .arg("--config")
        .arg(&config)
        .args(["daemon", "start", "--no-watchdog", "--port"])
        .arg(common::free_port().to_string())
        .assert()
        .failure()
        .stderr(predicate::str::contains("/nope/blackd"));
}

/// `cat -` stands in for `black -`: output equals input, so the first run
/// reports a reformat and records it, the second is a cache hit.
#[cfg(unix)]
#[test]
fn test_format_uses_and_clears_cache() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::write_config(dir.path(), "black_command = \"cat\"");
    let file = dir.path().join("module.py");
    std::fs::write(&file, "x = 1\n").unwrap();

    let format = || {
        let mut cmd = cargo_bin_cmd!("sublack");
        cmd.arg("--config").arg(&config).arg("format").arg(&file);
        cmd
    };

    format().assert().success().stderr(predicate::str::contains("reformatted"));
    format().assert().success().stderr(predicate::str::contains("(cache)"));
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "x = 1\n");

    cargo_bin_cmd!("sublack")
        .arg("--config")
        .arg(&config)
        .args(["cache", "clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Cache cleared"));

    format().assert().success().stderr(predicate::str::contains("reformatted"));
}

#[test]
fn test_format_failure_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let config = common::write_config(dir.path(), "black_command = \"/nope/black\"");
    let file = dir.path().join("module.py");
    std::fs::write(&file, "x=1\n").unwrap();

    cargo_bin_cmd!("sublack")
        .arg("--config")
        .arg(&config)
        .arg("format")
        .arg(&file)
        .assert()
        .failure()
        .stderr(predicate::str::contains("could not run"));
    assert_eq!(std::fs::read_to_string(&file).unwrap(), "x=1\n");
}
