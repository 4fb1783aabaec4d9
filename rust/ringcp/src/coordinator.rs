//! The `ringcp` process: owns the shared resources and supervises the two
//! endpoints.
//!
//! ```text
//! Init -> Validating -> ResourceSetup -> Spawning -> Running -> Reaping -> Teardown
//!                                \___________\__________\__ signal __/
//! ```
//!
//! A termination signal seen at any point after the listener is installed
//! aborts the endpoint group and jumps straight to teardown; the caller then
//! re-raises the signal.

use std::ffi::CString;
use std::fmt;
use std::io::{self, IsTerminal};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use sysv_shm::{IpcKey, SemaphoreSet};
use tokio::process::Child;

use crate::config::{PROGRESS_INTERVAL, REAP_GRACE, TransferConfig, derive_key};
use crate::error::{Error, Result};
use crate::gate::{SyncMode, initial_values};
use crate::progress::{ProgressBar, ProgressObserver};
use crate::ring::RingSegment;
use crate::signal::{Termination, signal_group};
use crate::spawn::{EndpointArgs, Role, SpawnRequest, locate_program};

/// What the user asked for, before validation.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    pub source: PathBuf,
    pub dest: PathBuf,
    pub mode: SyncMode,
    pub capacity: i64,
    pub slot_count: i64,
    pub verbose: bool,
    /// Use this key instead of deriving one from the executable.
    pub key: Option<IpcKey>,
    /// Draw the progress bar. Ignored in verbose mode and when stdout is not
    /// a terminal.
    pub progress: bool,
}

/// Where a run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Validating,
    ResourceSetup,
    Spawning,
    Running,
    Reaping,
    Teardown,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Init => "init",
            Phase::Validating => "validating",
            Phase::ResourceSetup => "resource-setup",
            Phase::Spawning => "spawning",
            Phase::Running => "running",
            Phase::Reaping => "reaping",
            Phase::Teardown => "teardown",
        };
        f.write_str(name)
    }
}

/// Outcome of a successful copy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferReport {
    /// Size of the source file.
    pub bytes: u64,
    pub elapsed: Duration,
}

impl TransferReport {
    /// Throughput in MiB per second.
    pub fn megabytes_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.bytes as f64 / secs / 1024.0 / 1024.0
    }
}

impl fmt::Display for TransferReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} bytes data transferred in {:.3} seconds, speed is {:.3} MB/s.",
            self.bytes,
            self.elapsed.as_secs_f64(),
            self.megabytes_per_second()
        )
    }
}

/// The semaphore set and ring segment of one transfer.
///
/// Removed exactly once: by [`teardown`](Self::teardown) or, failing that,
/// on drop. Objects somebody else already removed are not an error.
pub struct SharedResources {
    semaphores: SemaphoreSet,
    ring: RingSegment,
    torn_down: AtomicBool,
}

impl SharedResources {
    /// Create the semaphore set, then the ring segment.
    pub fn create(config: &TransferConfig) -> Result<Self> {
        // Layout validation caps slot_count at the semaphore maximum.
        let slot_count = config.layout.slot_count() as u16;

        let semaphores = SemaphoreSet::create(config.key, &initial_values(slot_count))
            .map_err(|e| Error::resource("failed to create semaphore set", e))?;
        debug!(semid = semaphores.id(), "semaphore set created");

        let ring = match RingSegment::create(config.key, config.layout) {
            Ok(ring) => ring,
            Err(e) => {
                remove_semaphores(&semaphores);
                return Err(Error::resource("failed to create ring buffer", e));
            }
        };

        Ok(Self {
            semaphores,
            ring,
            torn_down: AtomicBool::new(false),
        })
    }

    pub fn semaphores(&self) -> SemaphoreSet {
        self.semaphores
    }

    pub fn ring(&self) -> RingSegment {
        self.ring
    }

    /// Remove both kernel objects. Only the first call does anything.
    pub fn teardown(&self) {
        if self.torn_down.swap(true, Ordering::AcqRel) {
            return;
        }
        remove_semaphores(&self.semaphores);
        match self.ring.remove() {
            Ok(true) => debug!(shmid = self.ring.id(), "ring buffer removed"),
            Ok(false) => debug!(shmid = self.ring.id(), "ring buffer was already removed"),
            Err(e) => warn!(shmid = self.ring.id(), error = %e, "failed to remove ring buffer"),
        }
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down.load(Ordering::Acquire)
    }
}

impl Drop for SharedResources {
    fn drop(&mut self) {
        self.teardown();
    }
}

fn remove_semaphores(semaphores: &SemaphoreSet) {
    match semaphores.remove() {
        Ok(true) => debug!(semid = semaphores.id(), "semaphore set removed"),
        Ok(false) => debug!(semid = semaphores.id(), "semaphore set was already removed"),
        Err(e) => warn!(semid = semaphores.id(), error = %e, "failed to remove semaphore set"),
    }
}

/// Validated inputs of a run.
struct Plan {
    config: TransferConfig,
    source_size: u64,
    put_program: PathBuf,
    get_program: PathBuf,
}

/// Drives one copy from validation to teardown.
pub struct Coordinator {
    options: CopyOptions,
    phase: Phase,
}

impl Coordinator {
    pub fn new(options: CopyOptions) -> Self {
        Self {
            options,
            phase: Phase::Init,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    fn enter(&mut self, next: Phase) {
        debug!(from = %self.phase, to = %next, "coordinator phase");
        self.phase = next;
    }

    /// Run the copy to completion.
    ///
    /// Must be called from inside a tokio runtime with IO, time and signal
    /// drivers enabled.
    pub async fn run(mut self) -> Result<TransferReport> {
        self.enter(Phase::Validating);
        let plan = self.validate()?;

        let mut termination = Termination::install()
            .map_err(|e| Error::resource("failed to install signal handlers", e))?;

        self.enter(Phase::ResourceSetup);
        let resources = SharedResources::create(&plan.config)?;

        self.enter(Phase::Spawning);
        let started = Instant::now();
        let mut endpoints = self.spawn_endpoints(&plan).await?;
        let progress = self.start_progress(&plan, &resources);

        self.enter(Phase::Running);
        let outcome = endpoints.supervise(&mut termination).await;

        let signalled = match outcome {
            Outcome::Signalled(signal) => {
                self.enter(Phase::Teardown);
                resources.teardown();
                endpoints.reap(&mut termination).await;
                Some(signal)
            }
            _ => {
                self.enter(Phase::Reaping);
                endpoints.reap(&mut termination).await
            }
        };

        if let Some(progress) = progress {
            progress.finish();
        }
        let elapsed = started.elapsed();

        if self.phase != Phase::Teardown {
            self.enter(Phase::Teardown);
        }
        resources.teardown();
        info!("finished clean process");

        if let Some(signal) = signalled {
            return Err(Error::Interrupted { signal });
        }
        match outcome {
            Outcome::Completed => Ok(TransferReport {
                bytes: plan.source_size,
                elapsed,
            }),
            Outcome::Failed(e) => Err(e),
            Outcome::Signalled(signal) => Err(Error::Interrupted { signal }),
        }
    }

    fn validate(&self) -> Result<Plan> {
        let options = &self.options;
        let mut config = TransferConfig::new(
            options.verbose,
            IpcKey::PRIVATE,
            options.mode,
            options.capacity,
            options.slot_count,
        )?;
        if config.mode == SyncMode::Unsynchronized {
            warn!("running without synchronization; the copy may be corrupted");
        }

        let source_size = readable_size(&options.source)?;

        let exe = std::env::current_exe()
            .map_err(|e| Error::resource("failed to resolve own executable", e))?;
        config.key = match options.key {
            Some(key) => key,
            None => derive_key(&exe)?,
        };
        // Endpoints look the objects up by key; IPC_PRIVATE would hand each
        // of them a fresh private set instead.
        if config.key == IpcKey::PRIVATE {
            return Err(Error::Validation(format!(
                "IPC key {} is reserved for private objects",
                config.key
            )));
        }
        debug!(key = %config.key, "IPC key generated");

        let put_program = locate_program(Role::Producer, &exe)
            .map_err(|e| Error::resource("failed to locate put program", e))?;
        let get_program = locate_program(Role::Consumer, &exe)
            .map_err(|e| Error::resource("failed to locate get program", e))?;

        Ok(Plan {
            config,
            source_size,
            put_program,
            get_program,
        })
    }

    async fn spawn_endpoints(&self, plan: &Plan) -> Result<Endpoints> {
        let producer = SpawnRequest {
            role: Role::Producer,
            program: plan.put_program.clone(),
            args: EndpointArgs {
                config: plan.config,
                path: self.options.source.clone(),
            },
            process_group: None,
        }
        .spawn()
        .map_err(|e| Error::resource("failed to execute put process", e))?;

        let Some(group) = producer.id().map(|pid| pid as libc::pid_t) else {
            return Err(Error::resource(
                "put process exited before it could be tracked",
                io::Error::from_raw_os_error(libc::ESRCH),
            ));
        };
        debug!(pid = group, "put process created");

        let mut endpoints = Endpoints {
            group,
            producer: Some(producer),
            consumer: None,
        };

        let consumer = SpawnRequest {
            role: Role::Consumer,
            program: plan.get_program.clone(),
            args: EndpointArgs {
                config: plan.config,
                path: self.options.dest.clone(),
            },
            process_group: Some(group),
        }
        .spawn();

        match consumer {
            Ok(consumer) => {
                debug!(pid = consumer.id(), "get process created");
                endpoints.consumer = Some(consumer);
                Ok(endpoints)
            }
            Err(e) => {
                endpoints.abort(libc::SIGKILL);
                if let Some(mut producer) = endpoints.producer.take() {
                    let _ = producer.wait().await;
                }
                Err(Error::resource("failed to execute get process", e))
            }
        }
    }

    fn start_progress(&self, plan: &Plan, resources: &SharedResources) -> Option<ProgressObserver> {
        if !self.options.progress || self.options.verbose || !io::stdout().is_terminal() {
            return None;
        }
        let bar = ProgressBar::new(self.options.dest.display().to_string(), plan.source_size);
        match ProgressObserver::spawn(resources.ring(), bar, PROGRESS_INTERVAL) {
            Ok(observer) => Some(observer),
            Err(e) => {
                warn!(error = %e, "failed to start progress observer");
                None
            }
        }
    }
}

/// Size of `path`, if it is something this process can read.
///
/// Checked with access(2) rather than by opening, so a FIFO source does not
/// block here waiting for a writer.
fn readable_size(path: &Path) -> Result<u64> {
    let cannot_access =
        || Error::Validation(format!("cannot access source file {}", path.display()));

    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| cannot_access())?;
    if unsafe { libc::access(c_path.as_ptr(), libc::R_OK) } == -1 {
        return Err(cannot_access());
    }
    let metadata = std::fs::metadata(path).map_err(|_| cannot_access())?;
    if metadata.is_dir() {
        return Err(Error::Validation(format!(
            "source file {} is a directory",
            path.display()
        )));
    }
    Ok(metadata.len())
}

enum Outcome {
    Completed,
    Failed(Error),
    Signalled(i32),
}

enum Event {
    Signal(i32),
    Exit(Role, io::Result<ExitStatus>),
}

/// The two endpoint processes, sharing one process group.
struct Endpoints {
    group: libc::pid_t,
    producer: Option<Child>,
    consumer: Option<Child>,
}

impl Endpoints {
    fn slot(&mut self, role: Role) -> &mut Option<Child> {
        match role {
            Role::Producer => &mut self.producer,
            Role::Consumer => &mut self.consumer,
        }
    }

    fn abort(&self, sig: i32) {
        debug!(pgid = self.group, signal = sig, "signalling endpoint group");
        if let Err(e) = signal_group(self.group, sig) {
            warn!(pgid = self.group, error = %e, "failed to signal endpoint group");
        }
    }

    /// Wait until both endpoints succeed, one fails, or a signal arrives.
    async fn supervise(&mut self, termination: &mut Termination) -> Outcome {
        while self.producer.is_some() || self.consumer.is_some() {
            let event = tokio::select! {
                signal = termination.recv() => Event::Signal(signal),
                status = wait_child(&mut self.producer) => Event::Exit(Role::Producer, status),
                status = wait_child(&mut self.consumer) => Event::Exit(Role::Consumer, status),
            };

            match event {
                Event::Signal(signal) => {
                    warn!(signal, "termination signal received");
                    self.abort(signal);
                    return Outcome::Signalled(signal);
                }
                Event::Exit(role, Ok(status)) => {
                    *self.slot(role) = None;
                    if status.success() {
                        debug!("{role} process has finished");
                        continue;
                    }
                    error!(%status, "{role} process terminated abnormally");
                    self.abort(libc::SIGTERM);
                    return Outcome::Failed(Error::ChildFailed { role, status });
                }
                Event::Exit(role, Err(e)) => {
                    self.abort(libc::SIGKILL);
                    error!(error = %e, "failed to wait for {role} process");
                    return Outcome::Failed(Error::resource("failed to wait for endpoint process", e));
                }
            }
        }
        Outcome::Completed
    }

    /// Collect whatever is still running, SIGKILLing stragglers after
    /// [`REAP_GRACE`]. Returns a termination signal that arrived meanwhile.
    async fn reap(&mut self, termination: &mut Termination) -> Option<i32> {
        let mut signalled = None;

        for role in [Role::Producer, Role::Consumer] {
            let Some(mut child) = self.slot(role).take() else {
                continue;
            };

            let mut killed = false;
            loop {
                let event = if killed {
                    Reaped::Exited(child.wait().await)
                } else {
                    tokio::select! {
                        signal = termination.recv(), if signalled.is_none() => Reaped::Signal(signal),
                        waited = tokio::time::timeout(REAP_GRACE, child.wait()) => match waited {
                            Ok(status) => Reaped::Exited(status),
                            Err(_) => Reaped::TimedOut,
                        },
                    }
                };

                match event {
                    Reaped::Exited(Ok(status)) => {
                        debug!(%status, "{role} process reaped");
                        break;
                    }
                    Reaped::Exited(Err(e)) => {
                        warn!(error = %e, "failed to reap {role} process");
                        break;
                    }
                    Reaped::TimedOut => {
                        warn!("{role} process still running, killing it");
                        let _ = child.start_kill();
                        killed = true;
                    }
                    Reaped::Signal(signal) => {
                        warn!(signal, "termination signal received while reaping");
                        signalled = Some(signal);
                        self.abort(libc::SIGKILL);
                        killed = true;
                    }
                }
            }
        }

        signalled
    }
}

enum Reaped {
    Exited(io::Result<ExitStatus>),
    TimedOut,
    Signal(i32),
}

/// Wait on `child`, or forever if it has already been collected.
async fn wait_child(child: &mut Option<Child>) -> io::Result<ExitStatus> {
    match child {
        Some(child) => child.wait().await,
        None => std::future::pending().await,
    }
}
