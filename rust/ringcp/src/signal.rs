//! Termination signals for the coordinator.
//!
//! Signals are never handled inside a signal handler here: tokio turns each
//! delivery into a wakeup, and the control loop decides what to do with it.

use std::io;

use tokio::signal::unix::{Signal, SignalKind, signal};

/// Listens for SIGINT, SIGTERM and SIGHUP.
///
/// Install this before creating anything that needs cleanup; once installed
/// the default "die immediately" disposition is gone for these signals.
pub struct Termination {
    interrupt: Signal,
    terminate: Signal,
    hangup: Signal,
}

impl Termination {
    /// Must be called from inside a tokio runtime.
    pub fn install() -> io::Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
            hangup: signal(SignalKind::hangup())?,
        })
    }

    /// Wait for the next termination signal and return its number.
    pub async fn recv(&mut self) -> i32 {
        tokio::select! {
            _ = self.interrupt.recv() => libc::SIGINT,
            _ = self.terminate.recv() => libc::SIGTERM,
            _ = self.hangup.recv() => libc::SIGHUP,
        }
    }
}

/// Send `sig` to every process in group `pgid`.
///
/// A group with no members left is not an error.
pub fn signal_group(pgid: libc::pid_t, sig: i32) -> io::Result<()> {
    if pgid <= 0 {
        return Err(io::Error::from_raw_os_error(libc::EINVAL));
    }
    if unsafe { libc::killpg(pgid, sig) } == -1 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

/// Die by `sig` with its default disposition.
///
/// Falls back to exiting with `128 + sig` should the signal not be fatal.
pub fn reraise(sig: i32) -> ! {
    unsafe {
        libc::signal(sig, libc::SIG_DFL);
        libc::raise(sig);
    }
    std::process::exit(128 + sig)
}
