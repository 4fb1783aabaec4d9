//! Byte layout of the shared ring segment.
//!
//! ```text
//! +----------------+----------------+--------+-----------------+--------+---
//! | produced_count | consumed_count | length | payload[cap]    | length | ...
//! +----------------+----------------+--------+-----------------+--------+---
//!  0               4                8        12                12+cap
//! ```
//!
//! All fields are native-endian `u32`. Capacity and slot count are not
//! stored in the segment: every process is told them explicitly and must
//! agree, otherwise offsets disagree.

use std::fmt;

/// Size of one counter in the header.
pub const COUNTER_SIZE: usize = 4;

/// Offset of `produced_count`.
pub const PRODUCED_OFFSET: usize = 0;

/// Offset of `consumed_count`.
pub const CONSUMED_OFFSET: usize = COUNTER_SIZE;

/// Size of the ring header (both counters).
pub const HEADER_SIZE: usize = 2 * COUNTER_SIZE;

/// Size of the per-slot `payload_length` field.
pub const SLOT_HEADER_SIZE: usize = 4;

/// Upper bound on the slot count: it seeds the `empty_slots` semaphore.
pub const MAX_SLOT_COUNT: u32 = sysv_shm::semaphore::MAX_VALUE as u32;

/// Why a capacity/slot count pair cannot describe a ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutError {
    /// Slot capacity is zero.
    ZeroCapacity,
    /// Slot count is zero.
    ZeroSlots,
    /// Slot count exceeds [`MAX_SLOT_COUNT`].
    TooManySlots(u32),
    /// The segment size does not fit in the address space.
    TooLarge,
}

impl fmt::Display for LayoutError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LayoutError::ZeroCapacity => write!(f, "buffer capacity must be greater than 0"),
            LayoutError::ZeroSlots => write!(f, "buffer number must be greater than 0"),
            LayoutError::TooManySlots(n) => {
                write!(f, "buffer number {n} exceeds the maximum of {MAX_SLOT_COUNT}")
            }
            LayoutError::TooLarge => write!(f, "ring buffer size does not fit in memory"),
        }
    }
}

impl std::error::Error for LayoutError {}

/// Capacity and slot count of one ring, with the offsets they imply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLayout {
    capacity: u32,
    slot_count: u32,
    total_size: usize,
}

impl RingLayout {
    /// Validate a capacity/slot count pair.
    pub fn new(capacity: u32, slot_count: u32) -> Result<Self, LayoutError> {
        if capacity == 0 {
            return Err(LayoutError::ZeroCapacity);
        }
        if slot_count == 0 {
            return Err(LayoutError::ZeroSlots);
        }
        if slot_count > MAX_SLOT_COUNT {
            return Err(LayoutError::TooManySlots(slot_count));
        }

        let total_size = (capacity as usize)
            .checked_add(SLOT_HEADER_SIZE)
            .and_then(|stride| stride.checked_mul(slot_count as usize))
            .and_then(|slots| slots.checked_add(HEADER_SIZE))
            .ok_or(LayoutError::TooLarge)?;

        Ok(Self {
            capacity,
            slot_count,
            total_size,
        })
    }

    /// Payload bytes per slot.
    #[inline]
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Number of slots.
    #[inline]
    pub fn slot_count(&self) -> u32 {
        self.slot_count
    }

    /// Distance between consecutive slots.
    #[inline]
    pub fn stride(&self) -> usize {
        SLOT_HEADER_SIZE + self.capacity as usize
    }

    /// `8 + slot_count * (4 + capacity)`.
    #[inline]
    pub fn total_size(&self) -> usize {
        self.total_size
    }

    /// Offset of slot `index`'s `payload_length` field.
    ///
    /// # Panics
    ///
    /// Panics if `index >= slot_count`.
    #[inline]
    pub fn slot_offset(&self, index: u32) -> usize {
        assert!(
            index < self.slot_count,
            "slot index {index} out of range (slot_count={})",
            self.slot_count
        );
        HEADER_SIZE + index as usize * self.stride()
    }

    /// Offset of slot `index`'s payload.
    #[inline]
    pub fn payload_offset(&self, index: u32) -> usize {
        self.slot_offset(index) + SLOT_HEADER_SIZE
    }

    /// Slot that the `sequence`-th item (0-based) occupies.
    #[inline]
    pub fn slot_index(&self, sequence: u64) -> u32 {
        (sequence % self.slot_count as u64) as u32
    }
}
