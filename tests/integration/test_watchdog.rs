//! The watchdog runs as its own process and is driven here through the real
//! binary against real `sh`/`sleep` processes.
#![cfg(unix)]

#[path = "common.rs"]
mod common;

use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

/// Scan interval passed to the watchdog.
const INTERVAL_SECS: u64 = 1;

/// Slack on top of one scan interval for `ps`, signalling and exit.
const SLACK: Duration = Duration::from_secs(2);

fn one_scan() -> Duration {
    Duration::from_secs(INTERVAL_SECS) + SLACK
}

/// A long-running process whose command line carries `token`.
fn spawn_watched(token: &str) -> Child {
    Command::new("sh")
        .arg("-c")
        .arg("while :; do sleep 1; done")
        .arg(token)
        .stdout(Stdio::null())
        .spawn()
        .expect("failed to spawn watched process")
}

fn spawn_target() -> Child {
    Command::new("sleep").arg("300").spawn().expect("failed to spawn target")
}

fn spawn_watchdog(token: &str, target: u32) -> Child {
    let bin_path = assert_cmd::cargo::cargo_bin!("sublack");
    Command::new(bin_path)
        .arg("-v")
        .arg("watchdog")
        .arg(token)
        .arg(target.to_string())
        .arg(INTERVAL_SECS.to_string())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to spawn watchdog")
}

/// Poll `child` until it exits or `timeout` passes.
fn wait_exit(child: &mut Child, timeout: Duration) -> Option<std::process::ExitStatus> {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if let Some(status) = child.try_wait().unwrap() {
            return Some(status);
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    None
}

#[test]
fn test_target_is_killed_when_watched_exits() {
    let token = common::unique_token("sublack-host-");
    let mut watched = spawn_watched(&token);
    let mut target = spawn_target();
    let mut watchdog = spawn_watchdog(&token, target.id());

    // Let the watchdog see the watched process at least once.
    std::thread::sleep(Duration::from_millis(1500));
    assert!(target.try_wait().unwrap().is_none(), "target killed while watched was alive");

    watched.kill().unwrap();
    watched.wait().unwrap();

    let status = wait_exit(&mut target, one_scan());
    let watchdog_status = wait_exit(&mut watchdog, one_scan());

    if status.is_none() {
        let _ = target.kill();
        let _ = target.wait();
    }
    if watchdog_status.is_none() {
        let _ = watchdog.kill();
        let _ = watchdog.wait();
    }

    assert!(status.is_some(), "target survived its watched process");
    assert!(watchdog_status.is_some_and(|s| s.success()), "watchdog did not exit cleanly");
}

#[test]
fn test_watchdog_exits_when_target_is_gone() {
    let token = common::unique_token("sublack-host-");
    let mut watched = spawn_watched(&token);
    let mut target = spawn_target();
    let mut watchdog = spawn_watchdog(&token, target.id());

    target.kill().unwrap();
    target.wait().unwrap();

    let watchdog_status = wait_exit(&mut watchdog, one_scan());
    let watched_alive = watched.try_wait().unwrap().is_none();

    let _ = watched.kill();
    let _ = watched.wait();
    if watchdog_status.is_none() {
        let _ = watchdog.kill();
        let _ = watchdog.wait();
    }

    assert!(watchdog_status.is_some_and(|s| s.success()), "watchdog outlived its target");
    assert!(watched_alive, "watchdog touched the watched process");
}

#[test]
fn test_watchdog_ignores_other_watchdogs() {
    // Only watchdog invocations mention the token: nothing is watched, so
    // the target goes at the first scan.
    let token = common::unique_token("sublack-ghost-");
    let mut target = spawn_target();
    let mut watchdog = spawn_watchdog(&token, target.id());

    // The first scan follows one interval after startup.
    let status = wait_exit(&mut target, one_scan());
    let watchdog_status = wait_exit(&mut watchdog, one_scan());
    if status.is_none() {
        let _ = target.kill();
        let _ = target.wait();
    }

    assert!(status.is_some(), "target survived without any watched process");
    assert!(watchdog_status.is_some_and(|s| s.success()));
}
