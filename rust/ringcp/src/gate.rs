//! Synchronization strategies around produce/consume.
//!
//! A [`Gate`] answers two questions: may the producer write the next slot,
//! and may the consumer read it. With one producer and one consumer the two
//! sides never touch the same slot while the gate does its job, so no lock
//! around the slot data is needed.

use std::fmt;
use std::io;

use sysv_shm::SemaphoreSet;

use crate::ring::RingBuffer;

/// Semaphore 0: mutual exclusion. Created with value 1 and never used by a
/// single-producer/single-consumer transfer.
pub const MUTEX: u16 = 0;

/// Semaphore 1: filled slots the consumer may take.
pub const FULL_SLOTS: u16 = 1;

/// Semaphore 2: free slots the producer may fill.
pub const EMPTY_SLOTS: u16 = 2;

/// Number of semaphores in a transfer's set.
pub const SEMAPHORE_COUNT: u16 = 3;

/// Initial values `{mutex, full, empty}` for a ring of `slot_count` slots.
pub fn initial_values(slot_count: u16) -> [u16; SEMAPHORE_COUNT as usize] {
    [1, 0, slot_count]
}

/// Which strategy gates the ring for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Kernel semaphores: waiting sleeps in the kernel.
    #[default]
    Blocking,
    /// Busy-polling the shared counters: never sleeps, burns a core per side.
    Spin,
    /// No gating at all.
    ///
    /// **Unsafe for real transfers.** The producer overwrites slots the
    /// consumer has not read and the consumer reads slots that were never
    /// written, so output is corrupted or truncated as soon as one side gets
    /// ahead. Kept as a baseline to show what the other modes prevent.
    Unsynchronized,
}

impl SyncMode {
    /// Decode the numeric `--type` value: 1 blocking, 2 spin, anything else none.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => SyncMode::Blocking,
            2 => SyncMode::Spin,
            _ => SyncMode::Unsynchronized,
        }
    }

    /// Numeric form used on endpoint command lines.
    pub fn code(self) -> i64 {
        match self {
            SyncMode::Blocking => 1,
            SyncMode::Spin => 2,
            SyncMode::Unsynchronized => 0,
        }
    }

    /// Build the gate for this mode. `semaphores` is only used by `Blocking`.
    pub fn gate(self, semaphores: SemaphoreSet) -> Box<dyn Gate> {
        match self {
            SyncMode::Blocking => Box::new(SemaphoreGate::new(semaphores)),
            SyncMode::Spin => Box::new(SpinGate),
            SyncMode::Unsynchronized => Box::new(NoGate),
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncMode::Blocking => write!(f, "blocking"),
            SyncMode::Spin => write!(f, "spin"),
            SyncMode::Unsynchronized => write!(f, "none"),
        }
    }
}

/// Acquire/release contract wrapped around every produce and consume.
///
/// Calls come in pairs: `before_produce`, produce, `after_produce` on the
/// producer side and `before_consume`, consume, `after_consume` on the
/// consumer side.
pub trait Gate: Send {
    /// Wait until the next slot is free.
    fn before_produce(&self, ring: &RingBuffer) -> io::Result<()>;

    /// Announce that a slot was filled.
    fn after_produce(&self) -> io::Result<()>;

    /// Wait until the next slot is filled.
    fn before_consume(&self, ring: &RingBuffer) -> io::Result<()>;

    /// Announce that a slot was freed.
    fn after_consume(&self) -> io::Result<()>;
}

/// Classic bounded buffer: P(empty) / V(full) around produce and
/// P(full) / V(empty) around consume.
pub struct SemaphoreGate {
    semaphores: SemaphoreSet,
}

impl SemaphoreGate {
    pub fn new(semaphores: SemaphoreSet) -> Self {
        Self { semaphores }
    }
}

impl Gate for SemaphoreGate {
    fn before_produce(&self, _ring: &RingBuffer) -> io::Result<()> {
        self.semaphores.acquire(EMPTY_SLOTS)
    }

    fn after_produce(&self) -> io::Result<()> {
        self.semaphores.release(FULL_SLOTS)
    }

    fn before_consume(&self, _ring: &RingBuffer) -> io::Result<()> {
        self.semaphores.acquire(FULL_SLOTS)
    }

    fn after_consume(&self) -> io::Result<()> {
        self.semaphores.release(EMPTY_SLOTS)
    }
}

/// Busy-waits on the ring counters. Nothing to announce afterwards: the
/// counter update inside produce/consume is the announcement.
pub struct SpinGate;

impl Gate for SpinGate {
    fn before_produce(&self, ring: &RingBuffer) -> io::Result<()> {
        while ring.status().is_full() {
            std::hint::spin_loop();
        }
        Ok(())
    }

    fn after_produce(&self) -> io::Result<()> {
        Ok(())
    }

    fn before_consume(&self, ring: &RingBuffer) -> io::Result<()> {
        while ring.status().is_empty() {
            std::hint::spin_loop();
        }
        Ok(())
    }

    fn after_consume(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Lets everything through. See [`SyncMode::Unsynchronized`].
pub struct NoGate;

impl Gate for NoGate {
    fn before_produce(&self, _ring: &RingBuffer) -> io::Result<()> {
        Ok(())
    }

    fn after_produce(&self) -> io::Result<()> {
        Ok(())
    }

    fn before_consume(&self, _ring: &RingBuffer) -> io::Result<()> {
        Ok(())
    }

    fn after_consume(&self) -> io::Result<()> {
        Ok(())
    }
}
