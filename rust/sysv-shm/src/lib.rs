//! System V IPC primitives for cross-process transports.
//!
//! Segments and semaphore sets are kernel-persistent: they outlive the
//! process that created them until someone removes them explicitly. The
//! handles in this crate are therefore plain ids, cheap to copy, and removal
//! is idempotent so several cleanup paths can race without failing.

#![cfg(unix)]

pub mod key;
pub mod region;
pub mod segment;
pub mod semaphore;

pub use key::IpcKey;
pub use region::Region;
pub use segment::{Mapping, SharedSegment};
pub use semaphore::SemaphoreSet;

/// Permission bits used for every object this crate creates (owner rw).
pub const OWNER_RW: libc::c_int = 0o600;

/// True if `err` means the IPC object no longer exists.
///
/// `EINVAL` is what Linux reports for a stale id, `EIDRM` for an object that
/// was removed while we were using it.
pub fn is_removed(err: &std::io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EINVAL) | Some(libc::EIDRM))
}
