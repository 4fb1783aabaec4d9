//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Output};
use std::time::{Duration, Instant};

use sysv_shm::{IpcKey, SemaphoreSet, SharedSegment};

/// A scratch directory plus an IPC key nobody else is using.
pub struct Scratch {
    pub dir: tempfile::TempDir,
    pub key: IpcKey,
}

impl Scratch {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join(".key");
        std::fs::write(&marker, b"").unwrap();
        let key = IpcKey::from_path(&marker, b'c').unwrap();
        Self { dir, key }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, contents: &[u8]) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    /// `ringcp` bound to this scratch key, without a progress bar.
    pub fn ringcp(&self) -> Command {
        let mut command = Command::new(env!("CARGO_BIN_EXE_ringcp"));
        command
            .arg(format!("--key={}", self.key.as_raw()))
            .arg("--no-progress")
            .env_remove("RUST_LOG");
        command
    }

    pub fn copy(&self, extra: &[&str], source: &Path, dest: &Path) -> Output {
        self.ringcp()
            .args(extra)
            .arg(source)
            .arg(dest)
            .output()
            .unwrap()
    }

    pub fn semaphores_exist(&self) -> bool {
        SemaphoreSet::open(self.key, 3).is_ok()
    }

    pub fn assert_resources_removed(&self) {
        assert!(
            SemaphoreSet::open(self.key, 3).is_err(),
            "semaphore set for {} still exists",
            self.key
        );
        assert!(
            SharedSegment::open(self.key, 1).is_err(),
            "ring segment for {} still exists",
            self.key
        );
    }
}

/// Deterministic bytes that are not a short repeating pattern.
pub fn pattern(len: usize) -> Vec<u8> {
    let mut state = 0x2545_f491_u32;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state as u8
        })
        .collect()
}

/// Poll `child` until it exits or `timeout` passes.
pub fn wait_timeout(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(status) = child.try_wait().unwrap() {
            return Some(status);
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    None
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    false
}

/// Pid of the child of `parent` whose command name is `name`, read from
/// `/proc`.
pub fn find_child(parent: u32, name: &str) -> Option<libc::pid_t> {
    for entry in std::fs::read_dir("/proc").ok()?.flatten() {
        let Ok(pid) = entry.file_name().to_string_lossy().parse::<libc::pid_t>() else {
            continue;
        };
        let Ok(stat) = std::fs::read_to_string(entry.path().join("stat")) else {
            continue;
        };
        // "<pid> (<comm>) <state> <ppid> ..."; comm may itself contain ')'.
        let (Some(open), Some(close)) = (stat.find('('), stat.rfind(')')) else {
            continue;
        };
        let comm = &stat[open + 1..close];
        let ppid = stat[close + 1..].split_whitespace().nth(1);
        if comm == name && ppid == Some(parent.to_string().as_str()) {
            return Some(pid);
        }
    }
    None
}
