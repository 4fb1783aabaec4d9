//! Runs that must fail, and must still leave no kernel objects behind.

mod support;

use std::os::unix::process::ExitStatusExt;
use std::process::Stdio;
use std::time::Duration;

use support::{Scratch, find_child, pattern, wait_for, wait_timeout};

#[test]
fn test_zero_capacity_creates_nothing() {
    let scratch = Scratch::new();
    let source = scratch.write("source", b"data");
    let dest = scratch.path("dest");

    for flag in ["--buffer-capacity", "--buffer-number"] {
        for value in ["0", "-1"] {
            let output = scratch.copy(&[flag, value], &source, &dest);
            assert_eq!(output.status.code(), Some(1), "{flag} {value}");
            let err = String::from_utf8_lossy(&output.stderr);
            assert!(err.contains("must be greater than 0"), "{err}");
            scratch.assert_resources_removed();
            assert!(!dest.exists());
        }
    }
}

#[test]
fn test_unreadable_source() {
    let scratch = Scratch::new();
    let output = scratch.copy(&[], &scratch.path("missing"), &scratch.path("dest"));
    assert_eq!(output.status.code(), Some(1));
    let err = String::from_utf8_lossy(&output.stderr);
    assert!(err.contains("cannot access source file"), "{err}");
    scratch.assert_resources_removed();
}

#[test]
fn test_usage_error_exit_code() {
    let scratch = Scratch::new();
    let output = scratch.ringcp().arg("only-one-path").output().unwrap();
    assert_eq!(output.status.code(), Some(2));
}

#[test]
fn test_consumer_failure_aborts_producer() {
    let scratch = Scratch::new();
    let source = scratch.write("big", &pattern(4 << 20));
    let dest = scratch.path("no-such-dir").join("dest");

    let mut child = scratch
        .ringcp()
        .args(["--buffer-capacity", "16", "--buffer-number", "2"])
        .arg(&source)
        .arg(&dest)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let status = wait_timeout(&mut child, Duration::from_secs(20))
        .expect("coordinator did not finish after the consumer failed");
    assert_eq!(status.code(), Some(1));

    let output = child.wait_with_output().unwrap();
    let err = String::from_utf8_lossy(&output.stderr);
    let line = err.lines().find(|l| l.contains("get process terminated abnormally"));
    assert!(line.is_some_and(|l| l.contains("ERROR")), "{err}");
    scratch.assert_resources_removed();
}

#[test]
fn test_private_key_rejected() {
    let scratch = Scratch::new();
    let source = scratch.write("source", &pattern(10_000));
    let dest = scratch.path("dest");

    let mut child = std::process::Command::new(env!("CARGO_BIN_EXE_ringcp"))
        .args(["--key=0", "--no-progress"])
        .arg(&source)
        .arg(&dest)
        .env_remove("RUST_LOG")
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let status = wait_timeout(&mut child, Duration::from_secs(10));
    if status.is_none() {
        let _ = child.kill();
        let _ = child.wait();
        panic!("ringcp --key=0 did not exit");
    }
    assert_eq!(status.unwrap().code(), Some(1));

    let output = child.wait_with_output().unwrap();
    let err = String::from_utf8_lossy(&output.stderr);
    assert!(err.contains("reserved"), "{err}");
    assert!(!dest.exists());
}

/// Start a long blocking transfer and SIGKILL one endpoint once it runs.
fn kill_endpoint_mid_transfer(endpoint: &str) {
    let scratch = Scratch::new();
    let source = scratch.write("big", &pattern(16 << 20));
    let dest = scratch.path("dest");

    let mut child = scratch
        .ringcp()
        .args(["--buffer-capacity", "1", "--buffer-number", "2"])
        .arg(&source)
        .arg(&dest)
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let coordinator = child.id();

    let mut target = None;
    assert!(
        wait_for(Duration::from_secs(10), || {
            target = find_child(coordinator, endpoint);
            target.is_some()
        }),
        "{endpoint} never started"
    );
    // Let some slots move first.
    std::thread::sleep(Duration::from_millis(300));
    assert_eq!(unsafe { libc::kill(target.unwrap(), libc::SIGKILL) }, 0);

    let status = wait_timeout(&mut child, Duration::from_secs(20))
        .unwrap_or_else(|| panic!("coordinator hung after {endpoint} was killed"));
    assert_eq!(status.code(), Some(1));

    let output = child.wait_with_output().unwrap();
    let err = String::from_utf8_lossy(&output.stderr);
    let role = endpoint.trim_start_matches("ringcp-");
    let message = format!("{role} process terminated abnormally");
    let line = err.lines().find(|l| l.contains(&message));
    assert!(line.is_some_and(|l| l.contains("ERROR")), "{err}");
    let copied = std::fs::metadata(&dest).map(|m| m.len()).unwrap_or(0);
    assert!(copied < 16 << 20, "{copied} bytes copied");
    scratch.assert_resources_removed();
}

#[test]
fn test_consumer_killed_mid_transfer() {
    kill_endpoint_mid_transfer("ringcp-get");
}

#[test]
fn test_producer_killed_mid_transfer() {
    kill_endpoint_mid_transfer("ringcp-put");
}

fn interrupt_blocked_transfer(signal: i32) {
    let scratch = Scratch::new();

    // Nobody ever writes to this FIFO, so the producer blocks opening it.
    let fifo = scratch.path("fifo");
    let c_path = std::ffi::CString::new(fifo.to_str().unwrap()).unwrap();
    assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0);

    let mut child = scratch
        .ringcp()
        .arg(&fifo)
        .arg(scratch.path("dest"))
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    assert!(
        wait_for(Duration::from_secs(10), || scratch.semaphores_exist()),
        "coordinator never created its semaphore set"
    );
    // Let both endpoints start and block.
    std::thread::sleep(Duration::from_millis(300));

    assert_eq!(unsafe { libc::kill(child.id() as libc::pid_t, signal) }, 0);

    let status = wait_timeout(&mut child, Duration::from_secs(20))
        .expect("coordinator did not exit after the signal");
    assert_eq!(status.signal(), Some(signal), "{status}");
    scratch.assert_resources_removed();
}

#[test]
fn test_sigterm_tears_down_and_reraises() {
    interrupt_blocked_transfer(libc::SIGTERM);
}

#[test]
fn test_sigint_tears_down_and_reraises() {
    interrupt_blocked_transfer(libc::SIGINT);
}
