use std::mem::{align_of, size_of};
use std::ptr::{self, NonNull};

/// A contiguous span of mapped memory addressed by byte offset.
///
/// Every accessor checks its range against the region length, so a bad
/// offset panics instead of touching memory outside the mapping. What is
/// *not* checked is who else is writing: the region is shared with other
/// processes and callers must arrange exclusion themselves.
#[derive(Clone, Copy)]
pub struct Region {
    base: NonNull<u8>,
    len: usize,
}

impl Region {
    /// Wrap `len` bytes of attached memory starting at `base`.
    ///
    /// # Safety
    ///
    /// - `base` must be non-null and valid for reads and writes of `len` bytes
    /// - the memory must stay mapped for as long as this region (or any copy
    ///   of it) is used
    pub unsafe fn from_raw(base: *mut u8, len: usize) -> Self {
        let base = NonNull::new(base).expect("region base must be non-null");
        Self { base, len }
    }

    /// Address the segment is attached at in this process.
    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.base.as_ptr()
    }

    /// Bytes covered by the region.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    fn check(&self, off: usize, len: usize) {
        let end = off.checked_add(len);
        assert!(
            end.is_some_and(|end| end <= self.len),
            "range {off}..{off}+{len} out of bounds (len={})",
            self.len
        );
    }

    /// Raw pointer to byte `off`. Panics if `off` is past the end.
    #[inline]
    pub fn offset(&self, off: usize) -> *mut u8 {
        assert!(
            off < self.len,
            "offset {off} out of bounds (len={})",
            self.len
        );
        unsafe { self.as_ptr().add(off) }
    }

    /// Borrow the `T` stored at byte `off`.
    ///
    /// # Safety
    ///
    /// The bytes at `off` must hold a valid `T`. `T` should be made of
    /// atomics or plain integers, since other processes may write it.
    #[inline]
    pub unsafe fn get<T>(&self, off: usize) -> &T {
        self.check(off, size_of::<T>());
        let ptr = self.offset(off);
        assert!(
            (ptr as usize).is_multiple_of(align_of::<T>()),
            "offset {off} misaligned for {}",
            std::any::type_name::<T>()
        );
        unsafe { &*(ptr as *const T) }
    }

    /// Read a native-endian `u32` at any offset, aligned or not.
    #[inline]
    pub fn read_u32(&self, off: usize) -> u32 {
        self.check(off, size_of::<u32>());
        unsafe { ptr::read_unaligned(self.offset(off) as *const u32) }
    }

    /// Write a native-endian `u32` at any offset, aligned or not.
    #[inline]
    pub fn write_u32(&self, off: usize, value: u32) {
        self.check(off, size_of::<u32>());
        unsafe { ptr::write_unaligned(self.offset(off) as *mut u32, value) }
    }

    /// Copy `src` into the region starting at `off`.
    #[inline]
    pub fn write_bytes(&self, off: usize, src: &[u8]) {
        if src.is_empty() {
            return;
        }
        self.check(off, src.len());
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), self.offset(off), src.len()) }
    }

    /// Copy `dst.len()` bytes out of the region starting at `off`.
    #[inline]
    pub fn read_bytes(&self, off: usize, dst: &mut [u8]) {
        if dst.is_empty() {
            return;
        }
        self.check(off, dst.len());
        unsafe { ptr::copy_nonoverlapping(self.offset(off), dst.as_mut_ptr(), dst.len()) }
    }
}

unsafe impl Send for Region {}
unsafe impl Sync for Region {}
