//! Parameters shared by the coordinator and both endpoints.

use std::path::Path;
use std::time::Duration;

use sysv_shm::IpcKey;

use crate::error::{Error, Result};
use crate::gate::SyncMode;
use crate::layout::RingLayout;

/// Default payload bytes per slot.
pub const DEFAULT_CAPACITY: u32 = 256;

/// Default number of slots.
pub const DEFAULT_SLOT_COUNT: u32 = 8;

/// Project id mixed into the derived IPC key.
pub const PROJECT_ID: u8 = b'c';

/// How often the progress observer redraws.
pub const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

/// How long an endpoint gets to die after SIGTERM before it is SIGKILLed.
pub const REAP_GRACE: Duration = Duration::from_secs(2);

/// Everything a process needs to join a transfer, minus its file.
///
/// Built once by the coordinator and handed to each endpoint on its command
/// line; nothing here is global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferConfig {
    pub verbose: bool,
    pub key: IpcKey,
    pub mode: SyncMode,
    pub layout: RingLayout,
}

impl TransferConfig {
    /// Validate signed capacity and slot count as they arrive from the CLI.
    pub fn new(
        verbose: bool,
        key: IpcKey,
        mode: SyncMode,
        capacity: i64,
        slot_count: i64,
    ) -> Result<Self> {
        if capacity <= 0 || slot_count <= 0 {
            return Err(Error::Validation(
                "buffer number/capacity must be greater than 0".into(),
            ));
        }
        let capacity = u32::try_from(capacity)
            .map_err(|_| Error::Validation(format!("buffer capacity {capacity} is too large")))?;
        let slot_count = u32::try_from(slot_count)
            .map_err(|_| Error::Validation(format!("buffer number {slot_count} is too large")))?;
        let layout = RingLayout::new(capacity, slot_count)?;

        Ok(Self {
            verbose,
            key,
            mode,
            layout,
        })
    }
}

/// Derive the transfer key from the program's own executable.
///
/// Deterministic per installed binary, which also means two concurrent runs
/// of the same binary pick the same key; the second one fails to create its
/// semaphore set.
pub fn derive_key(program: &Path) -> Result<IpcKey> {
    IpcKey::from_path(program, PROJECT_ID)
        .map_err(|e| Error::resource("failed to generate IPC key", e))
}
