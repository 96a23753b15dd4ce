//! End-to-end daemon lifecycle against a fake `blackd` written in Python.
#![cfg(unix)]

#[path = "common.rs"]
mod common;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::path::Path;
use std::time::Duration;

use sublack::config::Settings;
use sublack::daemon::process::pid_alive;
use sublack::daemon::{
    DaemonController, FormatClient, FormatOptions, FormatOutcome, HealthChecker, PidCache,
    PortAllocator, PortState, StartOutcome,
};

/// Settings whose primary command is missing, so the vendored fallback
/// (`python3 fake_blackd.py`) is what actually runs.
fn fake_daemon_config(dir: &Path) -> std::path::PathBuf {
    fallback_config(dir, &common::write_fake_daemon(dir))
}

fn fallback_config(dir: &Path, script: &Path) -> std::path::PathBuf {
    common::write_config(
        dir,
        &format!(
            "daemon_command = \"/nope/blackd\"\n\
             vendor_python = \"python3\"\n\
             vendor_daemon_script = {:?}\n\
             stop_timeout_ms = 3000\n",
            script.to_string_lossy()
        ),
    )
}

async fn probe(port: u16) -> PortState {
    HealthChecker::new()
        .unwrap()
        .probe_port("127.0.0.1", port, Duration::from_secs(1))
        .await
}

#[tokio::test]
async fn test_cli_start_format_stop() {
    if !common::python3_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let config = fake_daemon_config(dir.path());
    let port = common::free_port();
    let pid_cache = PidCache::in_dir(&dir.path().join("cache"));

    cargo_bin_cmd!("sublack")
        .arg("--config")
        .arg(&config)
        .args(["daemon", "start", "--no-watchdog", "--port"])
        .arg(port.to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("Daemon started"));

    let pid = pid_cache.read().expect("pid should be cached after start");
    assert_eq!(probe(port).await, PortState::Daemon);

    let client = FormatClient::new("127.0.0.1", port).unwrap();
    assert_eq!(client.format("x = 1\n", &FormatOptions::default()).await, FormatOutcome::Unchanged);

    // A second start adopts the running daemon.
    cargo_bin_cmd!("sublack")
        .arg("--config")
        .arg(&config)
        .args(["daemon", "start", "--no-watchdog", "--port"])
        .arg(port.to_string())
        .assert()
        .success()
        .stdout(predicate::str::contains("already running"))
        .stdout(predicate::str::contains(pid.to_string()));

    cargo_bin_cmd!("sublack")
        .arg("--config")
        .arg(&config)
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Daemon stopped successfully"));

    assert_eq!(pid_cache.read(), None);
    assert_eq!(probe(port).await, PortState::Free);

    cargo_bin_cmd!("sublack")
        .arg("--config")
        .arg(&config)
        .args(["daemon", "stop"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Daemon is not running"));
}

#[tokio::test]
async fn test_controller_start_then_stop() {
    if !common::python3_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let config = fake_daemon_config(dir.path());
    let mut settings = Settings::load(Some(&config)).unwrap();
    settings.watchdog.enabled = false;

    let ports = PortAllocator::new();
    let controller = DaemonController::new(&settings, &ports).unwrap();

    let outcome = controller.start().await.unwrap();
    let StartOutcome::Started { pid, port } = outcome else {
        panic!("expected a fresh start, got {outcome:?}");
    };
    assert_eq!(port, controller.port());
    assert!(controller.is_running().await);
    assert_eq!(controller.pid_cache().read(), Some(pid));
    assert!(std::fs::read_to_string(dir.path().join(format!("cache/daemon-{port}.log")))
        .unwrap()
        .contains("fake daemon"));

    // Starting again while it runs is a no-op.
    let again = controller.start().await.unwrap();
    assert_eq!(again, StartOutcome::AlreadyRunning { pid: Some(pid), port });

    assert!(controller.stop().await);
    assert!(!controller.is_running().await);
    assert_eq!(controller.pid_cache().read(), None);
    assert!(!controller.stop().await);
}

#[tokio::test]
async fn test_concurrent_starts_spawn_one_daemon() {
    if !common::python3_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let config = fake_daemon_config(dir.path());
    let mut settings = Settings::load(Some(&config)).unwrap();
    settings.watchdog.enabled = false;

    let controller = DaemonController::new(&settings, &PortAllocator::new()).unwrap();
    let (a, b) = tokio::join!(controller.start(), controller.start());
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.is_success() && b.is_success());
    let fresh = [&a, &b].iter().filter(|o| matches!(o, StartOutcome::Started { .. })).count();
    assert_eq!(fresh, 1, "exactly one start should spawn: {a:?} / {b:?}");
    assert_eq!(a.pid(), b.pid());

    assert!(controller.stop().await);
}

#[tokio::test]
async fn test_stop_during_start_leaves_nothing_running() {
    if !common::python3_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let script = common::write_fake_daemon_with_delay(dir.path(), 0.5);
    let config = fallback_config(dir.path(), &script);
    let mut settings = Settings::load(Some(&config)).unwrap();
    settings.watchdog.enabled = false;

    let controller = DaemonController::new(&settings, &PortAllocator::new()).unwrap();
    let (started, stopped) = tokio::join!(controller.start(), async {
        // Issued while the daemon is still binding.
        tokio::time::sleep(Duration::from_millis(100)).await;
        controller.stop().await
    });

    let started = started.unwrap();
    let pid = started.pid().expect("start should have spawned a daemon");
    assert!(stopped, "stop issued mid-start should stop what start produced");
    assert!(!pid_alive(pid), "daemon pid {pid} survived the stop");
    assert_eq!(controller.pid_cache().read(), None);
    assert_eq!(probe(controller.port()).await, PortState::Free);
    assert!(!controller.stop().await);
}

#[tokio::test]
async fn test_controllers_sharing_cache_dir_keep_each_others_pid() {
    if !common::python3_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let config = fake_daemon_config(dir.path());
    let mut settings = Settings::load(Some(&config)).unwrap();
    settings.watchdog.enabled = false;

    let ports = PortAllocator::new();
    let first = DaemonController::new(&settings, &ports).unwrap();
    let second = DaemonController::new(&settings, &ports).unwrap();
    let pid_cache = PidCache::in_dir(&dir.path().join("cache"));

    let first_pid = first.start().await.unwrap().pid().unwrap();
    let second_pid = second.start().await.unwrap().pid().unwrap();
    assert_ne!(first_pid, second_pid);
    assert_eq!(pid_cache.read(), Some(second_pid));

    assert!(first.stop().await);
    assert_eq!(pid_cache.read(), Some(second_pid), "stopping one daemon forgot the other");
    assert!(second.is_running().await);

    for port in [first.port(), second.port()] {
        let log = std::fs::read_to_string(dir.path().join(format!("cache/daemon-{port}.log"))).unwrap();
        assert!(log.contains(&format!("fake daemon on 127.0.0.1 {port}")));
    }

    assert!(second.stop().await);
    assert_eq!(pid_cache.read(), None);
}

#[tokio::test]
async fn test_watchdog_stops_daemon_of_dead_host() {
    if !common::python3_available() {
        eprintln!("python3 not available, skipping");
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let config = fake_daemon_config(dir.path());
    let token = common::unique_token("sublack-editor-");
    let mut host = std::process::Command::new("sh")
        .arg("-c")
        .arg("while :; do sleep 1; done")
        .arg(&token)
        .spawn()
        .unwrap();

    let mut settings = Settings::load(Some(&config)).unwrap();
    settings.watchdog.watched_process = Some(token);
    settings.watchdog.interval_secs = 1;
    settings.watchdog.program = Some(assert_cmd::cargo::cargo_bin!("sublack").to_path_buf());

    let controller = DaemonController::new(&settings, &PortAllocator::new()).unwrap();
    let outcome = controller.start().await.unwrap();
    assert!(matches!(outcome, StartOutcome::Started { .. }), "{outcome:?}");

    host.kill().unwrap();
    host.wait().unwrap();

    let mut stopped = false;
    for _ in 0..100 {
        if !controller.is_running().await {
            stopped = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    if !stopped {
        controller.stop().await;
    }
    assert!(stopped, "watchdog did not stop the orphaned daemon");
    assert!(std::fs::read_to_string(dir.path().join("cache/watchdog.log"))
        .unwrap()
        .contains("killing target"));
}
