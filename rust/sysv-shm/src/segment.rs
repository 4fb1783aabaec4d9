//! System V shared-memory segments.
//!
//! A [`SharedSegment`] is only an id: the kernel owns the memory and keeps it
//! alive until [`SharedSegment::remove`] is called *and* every process has
//! detached. A [`Mapping`] is one process's attachment of that memory.

use std::io;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::{IpcKey, OWNER_RW, Region, is_removed};

/// Handle to a kernel shared-memory segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedSegment {
    id: libc::c_int,
    size: usize,
}

impl SharedSegment {
    /// Create a new segment of `size` bytes under `key`.
    ///
    /// Creation is exclusive: if a segment already exists under `key` this
    /// fails with `EEXIST` instead of silently reusing it. The kernel hands
    /// out zero-filled memory.
    pub fn create(key: IpcKey, size: usize) -> io::Result<Self> {
        if size == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "size must be > 0",
            ));
        }

        let id = unsafe {
            libc::shmget(
                key.as_raw(),
                size,
                libc::IPC_CREAT | libc::IPC_EXCL | OWNER_RW,
            )
        };
        if id == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self { id, size })
    }

    /// Look up an existing segment of at least `size` bytes under `key`.
    pub fn open(key: IpcKey, size: usize) -> io::Result<Self> {
        let id = unsafe { libc::shmget(key.as_raw(), size, 0) };
        if id == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self { id, size })
    }

    /// Kernel id of the segment.
    #[inline]
    pub fn id(&self) -> libc::c_int {
        self.id
    }

    /// Size requested when the handle was created or opened.
    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Map the segment read/write into this process.
    ///
    /// The mapping covers the segment's real size as reported by the kernel,
    /// which is never smaller than the size this handle was opened with.
    pub fn attach(&self) -> io::Result<Mapping> {
        let real_size = self.kernel_size()?;

        let ptr = unsafe { libc::shmat(self.id, std::ptr::null(), 0) };
        if ptr as isize == -1 {
            return Err(io::Error::last_os_error());
        }
        let ptr = NonNull::new(ptr as *mut u8)
            .ok_or_else(|| io::Error::other("shmat returned a null address"))?;

        Ok(Mapping {
            ptr,
            len: real_size,
        })
    }

    fn kernel_size(&self) -> io::Result<usize> {
        let mut stat = MaybeUninit::<libc::shmid_ds>::uninit();
        let ret = unsafe { libc::shmctl(self.id, libc::IPC_STAT, stat.as_mut_ptr()) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        let stat = unsafe { stat.assume_init() };
        Ok(stat.shm_segsz as usize)
    }

    /// Mark the segment for destruction.
    ///
    /// Returns `Ok(true)` if this call removed it and `Ok(false)` if it was
    /// already gone, so racing cleanup paths never see an error for the
    /// loser. Memory stays valid for processes that are still attached.
    pub fn remove(&self) -> io::Result<bool> {
        let ret = unsafe { libc::shmctl(self.id, libc::IPC_RMID, std::ptr::null_mut()) };
        if ret == -1 {
            let err = io::Error::last_os_error();
            if is_removed(&err) {
                return Ok(false);
            }
            return Err(err);
        }
        Ok(true)
    }
}

/// One process's attachment of a [`SharedSegment`].
///
/// Detaches on drop. Use [`Mapping::detach`] to observe the detach result.
pub struct Mapping {
    ptr: NonNull<u8>,
    len: usize,
}

impl Mapping {
    /// Get a `Region` view of this mapping.
    #[inline]
    pub fn region(&self) -> Region {
        // SAFETY: shmat returned a mapping of `len` bytes that lives as long as `self`.
        unsafe { Region::from_raw(self.ptr.as_ptr(), self.len) }
    }

    /// Borrow the `T` stored at byte `off`, for as long as the mapping lives.
    ///
    /// Same checks as [`Region::get`]: panics when `off` is out of bounds or
    /// misaligned for `T`.
    ///
    /// # Safety
    ///
    /// The bytes at `off` must hold a valid `T`. `T` should be made of
    /// atomics or plain integers, since other processes may write it.
    #[inline]
    pub unsafe fn get<T>(&self, off: usize) -> &T {
        let ptr: *const T = unsafe { self.region().get::<T>(off) };
        // SAFETY: the memory stays attached until `self` is dropped or detached.
        unsafe { &*ptr }
    }

    /// Size of the mapping in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the mapping is empty (zero bytes).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Detach explicitly, reporting failure instead of ignoring it.
    pub fn detach(self) -> io::Result<()> {
        let ptr = self.ptr;
        std::mem::forget(self);
        shmdt(ptr)
    }
}

fn shmdt(ptr: NonNull<u8>) -> io::Result<()> {
    let ret = unsafe { libc::shmdt(ptr.as_ptr() as *const libc::c_void) };
    if ret == -1 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

impl Drop for Mapping {
    fn drop(&mut self) {
        let _ = shmdt(self.ptr);
    }
}

// SAFETY: the mapping is plain shared memory; synchronization of its contents
// is the caller's business, as it is across processes.
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}
