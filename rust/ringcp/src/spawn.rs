//! Launching the endpoint processes.
//!
//! The coordinator starts `ringcp-put` and `ringcp-get` as separate programs
//! and tells them everything through six positional arguments, in this fixed
//! order:
//!
//! 1. verbosity flag (`0` or `1`)
//! 2. IPC key (decimal)
//! 3. synchronization mode (`1` blocking, `2` spin, other none)
//! 4. slot capacity in bytes
//! 5. slot count
//! 6. file path (source for put, destination for get)
//!
//! Both endpoints share one process group so the coordinator can abort the
//! whole transfer with a single signal, and each is set up to receive
//! SIGKILL if the coordinator dies first.

use std::ffi::OsString;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use sysv_shm::IpcKey;
use tokio::process::{Child, Command};

use crate::config::TransferConfig;
use crate::gate::SyncMode;
use crate::layout::{LayoutError, RingLayout};

/// Environment variable overriding where endpoint executables are found.
pub const LIBEXEC_DIR_ENV: &str = "RINGCP_LIBEXEC_DIR";

/// Which end of the ring a process drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Producer,
    Consumer,
}

impl Role {
    /// Executable implementing this role.
    pub fn program_name(self) -> &'static str {
        match self {
            Role::Producer => "ringcp-put",
            Role::Consumer => "ringcp-get",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Producer => write!(f, "put"),
            Role::Consumer => write!(f, "get"),
        }
    }
}

/// Startup parameters of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointArgs {
    pub config: TransferConfig,
    pub path: PathBuf,
}

const ARG_COUNT: usize = 6;

impl EndpointArgs {
    /// Render the positional argument list.
    pub fn to_args(&self) -> Vec<OsString> {
        let config = &self.config;
        vec![
            OsString::from(if config.verbose { "1" } else { "0" }),
            OsString::from(config.key.to_arg()),
            OsString::from(config.mode.code().to_string()),
            OsString::from(config.layout.capacity().to_string()),
            OsString::from(config.layout.slot_count().to_string()),
            self.path.clone().into_os_string(),
        ]
    }

    /// Parse the positional argument list (without the program name).
    pub fn from_args<I, S>(args: I) -> Result<Self, SpawnArgsError>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let args: Vec<OsString> = args.into_iter().map(Into::into).collect();
        let [verbose, key, mode, capacity, slot_count, path]: [OsString; ARG_COUNT] =
            args.try_into().map_err(|args: Vec<OsString>| SpawnArgsError::WrongCount(args.len()))?;

        let verbose: i64 = parse("verbosity", &verbose)?;
        let key = IpcKey::from_arg(text("key", &key)?)
            .ok()
            .filter(|&parsed| parsed != IpcKey::PRIVATE)
            .ok_or_else(|| invalid("key", &key))?;
        let mode = SyncMode::from_code(parse("type", &mode)?);
        let capacity: u32 = parse("capacity", &capacity)?;
        let slot_count: u32 = parse("number", &slot_count)?;
        let layout = RingLayout::new(capacity, slot_count).map_err(SpawnArgsError::Layout)?;

        Ok(Self {
            config: TransferConfig {
                verbose: verbose != 0,
                key,
                mode,
                layout,
            },
            path: PathBuf::from(path),
        })
    }

    /// Parse from `std::env::args_os()`, skipping the program name.
    pub fn from_env() -> Result<Self, SpawnArgsError> {
        Self::from_args(std::env::args_os().skip(1))
    }
}

fn text<'a>(name: &'static str, value: &'a OsString) -> Result<&'a str, SpawnArgsError> {
    value.to_str().ok_or_else(|| invalid(name, value))
}

fn parse<T: std::str::FromStr>(name: &'static str, value: &OsString) -> Result<T, SpawnArgsError> {
    text(name, value)?
        .trim()
        .parse()
        .map_err(|_| invalid(name, value))
}

fn invalid(name: &'static str, value: &OsString) -> SpawnArgsError {
    SpawnArgsError::Invalid {
        name,
        value: value.to_string_lossy().into_owned(),
    }
}

/// Errors when parsing endpoint arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpawnArgsError {
    /// Not exactly six positional arguments.
    WrongCount(usize),
    /// An argument did not parse.
    Invalid { name: &'static str, value: String },
    /// Capacity and slot count do not form a ring.
    Layout(LayoutError),
}

impl fmt::Display for SpawnArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnArgsError::WrongCount(n) => {
                write!(f, "wrong argument number: expected {ARG_COUNT}, got {n}")
            }
            SpawnArgsError::Invalid { name, value } => write!(f, "invalid {name} argument {value:?}"),
            SpawnArgsError::Layout(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SpawnArgsError {}

/// Everything needed to start one endpoint.
#[derive(Debug, Clone)]
pub struct SpawnRequest {
    pub role: Role,
    pub program: PathBuf,
    pub args: EndpointArgs,
    /// `None` starts a new process group led by the child; `Some(pgid)`
    /// joins an existing one.
    pub process_group: Option<libc::pid_t>,
}

impl SpawnRequest {
    /// Build the command without running it.
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(self.args.to_args())
            .stdin(Stdio::null())
            .process_group(self.process_group.unwrap_or(0))
            .kill_on_drop(false);
        // SAFETY: die_with_parent only calls prctl, which is async-signal-safe.
        unsafe { command.pre_exec(die_with_parent) };
        command
    }

    /// Start the endpoint.
    pub fn spawn(&self) -> io::Result<Child> {
        self.command().spawn()
    }
}

/// Ask the kernel to SIGKILL this process when its parent dies.
#[cfg(target_os = "linux")]
fn die_with_parent() -> io::Result<()> {
    let result = unsafe { libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) };
    if result != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn die_with_parent() -> io::Result<()> {
    Ok(())
}

/// Find the executable for `role`.
///
/// Looks in `$RINGCP_LIBEXEC_DIR` if set, otherwise next to `program`
/// (normally the coordinator's own executable).
pub fn locate_program(role: Role, program: &Path) -> io::Result<PathBuf> {
    let dir = match std::env::var_os(LIBEXEC_DIR_ENV) {
        Some(dir) => PathBuf::from(dir),
        None => program
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| io::Error::other("executable has no parent directory"))?,
    };

    let path = dir.join(role.program_name());
    if !path.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} not found", path.display()),
        ));
    }
    Ok(path)
}
