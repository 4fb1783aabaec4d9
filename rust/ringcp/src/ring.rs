//! The bounded ring of message slots living in a shared segment.
//!
//! The ring itself does no waiting. A producer must know a slot is free
//! before calling [`RingProducer::produce`], and a consumer must know a slot
//! is filled before calling [`RingConsumer::consume`]; see [`crate::gate`]
//! for the strategies that establish this.
//!
//! # Counters and ordering
//!
//! `produced_count` is written only by the producer and `consumed_count`
//! only by the consumer. Both are 32-bit atomics stored with release and
//! loaded with acquire ordering, which publishes a slot's payload before the
//! counter that hands it over. Whether that holds *between processes* rests
//! on the host keeping shared mappings coherent across address spaces; every
//! mainstream OS/CPU pair does, but it is not something Rust can promise.
//!
//! Each side also keeps a private 64-bit cursor. Slot indices are computed
//! from the cursor, not from the 32-bit counter, so they stay in lockstep
//! even after the shared counters wrap.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};

use sysv_shm::{IpcKey, Mapping, Region, SharedSegment};

use crate::layout::{CONSUMED_OFFSET, PRODUCED_OFFSET, RingLayout, SLOT_HEADER_SIZE};

/// Handle to the kernel segment that holds a ring.
///
/// Cheap to copy; owning a handle does not keep the segment alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingSegment {
    segment: SharedSegment,
    layout: RingLayout,
}

impl RingSegment {
    /// Allocate a segment for `layout` under `key` and zero both counters.
    pub fn create(key: IpcKey, layout: RingLayout) -> io::Result<Self> {
        let segment = SharedSegment::create(key, layout.total_size())?;
        let ring = Self { segment, layout };

        let buffer = match ring.attach() {
            Ok(buffer) => buffer,
            Err(e) => {
                let _ = segment.remove();
                return Err(e);
            }
        };
        buffer.reset();
        if let Err(e) = buffer.detach() {
            warn!(error = %e, "failed to detach ring after initialization");
        }

        debug!(
            shmid = segment.id(),
            size = layout.total_size(),
            "ring buffer created"
        );
        Ok(ring)
    }

    /// Find the segment another process created under `key`.
    pub fn open(key: IpcKey, layout: RingLayout) -> io::Result<Self> {
        let segment = SharedSegment::open(key, layout.total_size())?;
        debug!(%key, shmid = segment.id(), "ring buffer retrieved");
        Ok(Self { segment, layout })
    }

    /// Map the ring into this process.
    pub fn attach(&self) -> io::Result<RingBuffer> {
        let mapping = self.segment.attach()?;
        if mapping.len() < self.layout.total_size() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "segment is {} bytes, layout needs {}",
                    mapping.len(),
                    self.layout.total_size()
                ),
            ));
        }
        trace!(shmid = self.segment.id(), "ring buffer attached");
        Ok(RingBuffer {
            mapping,
            layout: self.layout,
        })
    }

    /// Destroy the segment. `Ok(false)` if it was already gone.
    pub fn remove(&self) -> io::Result<bool> {
        self.segment.remove()
    }

    /// Kernel id of the segment.
    pub fn id(&self) -> libc::c_int {
        self.segment.id()
    }

    /// Layout every attachment of this ring uses.
    pub fn layout(&self) -> RingLayout {
        self.layout
    }
}

/// A ring mapped into this process.
pub struct RingBuffer {
    mapping: Mapping,
    layout: RingLayout,
}

impl RingBuffer {
    #[inline]
    fn region(&self) -> Region {
        self.mapping.region()
    }

    #[inline]
    fn counter(&self, offset: usize) -> &AtomicU32 {
        // SAFETY: the counters sit at offsets 0 and 4 of a page-aligned mapping
        // that is at least HEADER_SIZE bytes long (checked in `attach`), and a
        // u32 is always a valid AtomicU32.
        unsafe { self.mapping.get::<AtomicU32>(offset) }
    }

    #[inline]
    fn produced_count(&self) -> &AtomicU32 {
        self.counter(PRODUCED_OFFSET)
    }

    #[inline]
    fn consumed_count(&self) -> &AtomicU32 {
        self.counter(CONSUMED_OFFSET)
    }

    fn reset(&self) {
        self.produced_count().store(0, Ordering::Release);
        self.consumed_count().store(0, Ordering::Release);
    }

    fn slot(&self, index: u32) -> Slot {
        Slot {
            region: self.region(),
            offset: self.layout.slot_offset(index),
            capacity: self.layout.capacity() as usize,
        }
    }

    /// Layout of this ring.
    #[inline]
    pub fn layout(&self) -> RingLayout {
        self.layout
    }

    /// Snapshot both counters.
    pub fn status(&self) -> RingStatus {
        RingStatus {
            produced: self.produced_count().load(Ordering::Acquire),
            consumed: self.consumed_count().load(Ordering::Acquire),
            slot_count: self.layout.slot_count(),
        }
    }

    /// Approximate number of bytes the consumer has taken out so far.
    ///
    /// Every consumed slot counts as a full `capacity`, so the final short
    /// chunk and the sentinel are over-counted. Safe to call from a process
    /// that is neither producer nor consumer.
    pub fn transferred_estimate(&self) -> u64 {
        self.status().consumed as u64 * self.layout.capacity() as u64
    }

    /// Producer handle starting at the current `produced_count`.
    pub fn producer(&self) -> RingProducer<'_> {
        RingProducer {
            ring: self,
            produced: self.status().produced as u64,
        }
    }

    /// Consumer handle starting at the current `consumed_count`.
    pub fn consumer(&self) -> RingConsumer<'_> {
        RingConsumer {
            ring: self,
            consumed: self.status().consumed as u64,
        }
    }

    /// Unmap the ring, reporting failure instead of ignoring it.
    pub fn detach(self) -> io::Result<()> {
        self.mapping.detach()
    }
}

/// One slot: `[payload_length: u32][payload: capacity bytes]`.
///
/// `payload_length` sits at `8 + index * (4 + capacity)`, which is unaligned
/// whenever `capacity` is not a multiple of four, so it is accessed with
/// unaligned plain loads and stores rather than as an atomic.
struct Slot {
    region: Region,
    offset: usize,
    capacity: usize,
}

impl Slot {
    fn payload_len(&self) -> usize {
        (self.region.read_u32(self.offset) as usize).min(self.capacity)
    }

    fn store(&self, bytes: &[u8]) {
        self.region
            .write_bytes(self.offset + SLOT_HEADER_SIZE, bytes);
        self.region.write_u32(self.offset, bytes.len() as u32);
    }

    fn load(&self, out: &mut [u8]) -> usize {
        let len = self.payload_len();
        self.region
            .read_bytes(self.offset + SLOT_HEADER_SIZE, &mut out[..len]);
        len
    }

    fn clear(&self) {
        self.region.write_u32(self.offset, 0);
    }
}

/// Writing side of a ring.
pub struct RingProducer<'a> {
    ring: &'a RingBuffer,
    produced: u64,
}

impl RingProducer<'_> {
    /// Copy `bytes` into the next slot and publish it.
    ///
    /// An empty `bytes` is the end-of-stream sentinel. Returns the slot
    /// index that was written.
    ///
    /// # Panics
    ///
    /// Panics if `bytes` is longer than the slot capacity.
    pub fn produce(&mut self, bytes: &[u8]) -> u32 {
        let layout = self.ring.layout;
        assert!(
            bytes.len() <= layout.capacity() as usize,
            "chunk of {} bytes exceeds slot capacity {}",
            bytes.len(),
            layout.capacity()
        );

        let index = layout.slot_index(self.produced);
        self.ring.slot(index).store(bytes);

        self.produced += 1;
        self.ring
            .produced_count()
            .store(self.produced as u32, Ordering::Release);

        trace!(len = bytes.len(), slot = index, "produced");
        index
    }

    /// Number of slots this handle has produced into since the ring was created.
    pub fn produced(&self) -> u64 {
        self.produced
    }

    /// The ring this handle writes to.
    pub fn ring(&self) -> &RingBuffer {
        self.ring
    }
}

/// Reading side of a ring.
pub struct RingConsumer<'a> {
    ring: &'a RingBuffer,
    consumed: u64,
}

impl RingConsumer<'_> {
    /// Copy the next slot's payload into `out` and release the slot.
    ///
    /// Returns the payload length; 0 means the end-of-stream sentinel. The
    /// slot's length is reset to 0 so a stale read can never replay it.
    ///
    /// # Panics
    ///
    /// Panics if `out` is shorter than the slot capacity.
    pub fn consume(&mut self, out: &mut [u8]) -> usize {
        let layout = self.ring.layout;
        assert!(
            out.len() >= layout.capacity() as usize,
            "output buffer of {} bytes is smaller than slot capacity {}",
            out.len(),
            layout.capacity()
        );

        let index = layout.slot_index(self.consumed);
        let slot = self.ring.slot(index);
        let len = slot.load(out);
        slot.clear();

        self.consumed += 1;
        self.ring
            .consumed_count()
            .store(self.consumed as u32, Ordering::Release);

        trace!(len, slot = index, "consumed");
        len
    }

    /// Number of slots this handle has consumed since the ring was created.
    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    /// The ring this handle reads from.
    pub fn ring(&self) -> &RingBuffer {
        self.ring
    }
}

/// Snapshot of the ring counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingStatus {
    pub produced: u32,
    pub consumed: u32,
    pub slot_count: u32,
}

impl RingStatus {
    /// Slots produced but not yet consumed.
    #[inline]
    pub fn in_flight(&self) -> u32 {
        self.produced.wrapping_sub(self.consumed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.in_flight() == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.in_flight() == self.slot_count
    }

    /// `0 <= produced - consumed <= slot_count`.
    ///
    /// A snapshot taken by a third process reads the two counters at
    /// slightly different instants, so a single `false` there is only a hint;
    /// from the producer or consumer it means a synchronization bug.
    #[inline]
    pub fn holds_invariant(&self) -> bool {
        self.in_flight() <= self.slot_count
    }
}
