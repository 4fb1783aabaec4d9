//! System V counting semaphore sets.

use std::io;

use crate::{IpcKey, OWNER_RW, is_removed};

/// Largest value a System V semaphore may hold (`SEMVMX` on Linux).
pub const MAX_VALUE: u16 = 32767;

/// Handle to a kernel semaphore set.
///
/// `acquire` and `release` are the classic P and V: an atomic decrement that
/// sleeps in the kernel while the value is zero, and an atomic increment that
/// wakes one sleeper. They work between unrelated processes that agree on the
/// set's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreSet {
    id: libc::c_int,
    len: u16,
}

impl SemaphoreSet {
    /// Create a new set holding one semaphore per entry of `initial`.
    ///
    /// Creation is exclusive: an existing set under `key` is an error
    /// (`EEXIST`), never silently reused. If the initial values cannot be
    /// stored the half-built set is removed again.
    pub fn create(key: IpcKey, initial: &[u16]) -> io::Result<Self> {
        let len = u16::try_from(initial.len())
            .ok()
            .filter(|&len| len > 0)
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "semaphore count out of range")
            })?;
        if initial.iter().any(|&v| v > MAX_VALUE) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "initial semaphore value exceeds SEMVMX",
            ));
        }

        let id = unsafe {
            libc::semget(
                key.as_raw(),
                len as libc::c_int,
                libc::IPC_CREAT | libc::IPC_EXCL | OWNER_RW,
            )
        };
        if id == -1 {
            return Err(io::Error::last_os_error());
        }

        let set = Self { id, len };
        let mut values = initial.to_vec();
        // semun is passed by value; for SETALL its active member is the array pointer.
        let ret = unsafe { libc::semctl(id, 0, libc::SETALL, values.as_mut_ptr()) };
        if ret == -1 {
            let err = io::Error::last_os_error();
            let _ = set.remove();
            return Err(err);
        }

        Ok(set)
    }

    /// Look up an existing set with at least `len` semaphores under `key`.
    pub fn open(key: IpcKey, len: u16) -> io::Result<Self> {
        let id = unsafe { libc::semget(key.as_raw(), len as libc::c_int, 0) };
        if id == -1 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self { id, len })
    }

    /// Kernel id of the set.
    #[inline]
    pub fn id(&self) -> libc::c_int {
        self.id
    }

    /// Number of semaphores in the set.
    #[inline]
    pub fn len(&self) -> u16 {
        self.len
    }

    /// Returns true if the set holds no semaphores.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// P: decrement semaphore `index`, sleeping while it is zero.
    ///
    /// Fails with `EIDRM` if the set is removed while we sleep.
    pub fn acquire(&self, index: u16) -> io::Result<()> {
        self.op(index, -1)
    }

    /// V: increment semaphore `index`, waking one sleeper.
    pub fn release(&self, index: u16) -> io::Result<()> {
        self.op(index, 1)
    }

    fn op(&self, index: u16, delta: libc::c_short) -> io::Result<()> {
        self.check_index(index)?;
        let mut op = libc::sembuf {
            sem_num: index,
            sem_op: delta,
            sem_flg: 0,
        };
        loop {
            let ret = unsafe { libc::semop(self.id, &mut op, 1) };
            if ret == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Current value of semaphore `index`.
    pub fn value(&self, index: u16) -> io::Result<u16> {
        self.check_index(index)?;
        let ret = unsafe { libc::semctl(self.id, index as libc::c_int, libc::GETVAL) };
        if ret == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(ret as u16)
    }

    fn check_index(&self, index: u16) -> io::Result<()> {
        if index >= self.len {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("semaphore index {index} out of range (len={})", self.len),
            ));
        }
        Ok(())
    }

    /// Destroy the set, waking every sleeper with `EIDRM`.
    ///
    /// Returns `Ok(false)` when the set was already gone.
    pub fn remove(&self) -> io::Result<bool> {
        let ret = unsafe { libc::semctl(self.id, 0, libc::IPC_RMID) };
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Cleanup(SemaphoreSet);

    impl Drop for Cleanup {
        fn drop(&mut self) {
            let _ = self.0.remove();
        }
    }

    #[test]
    fn test_initial_values() {
        let set = SemaphoreSet::create(IpcKey::PRIVATE, &[1, 0, 8]).unwrap();
        let _cleanup = Cleanup(set);

        assert_eq!(set.len(), 3);
        assert_eq!(set.value(0).unwrap(), 1);
        assert_eq!(set.value(1).unwrap(), 0);
        assert_eq!(set.value(2).unwrap(), 8);
    }

    #[test]
    fn test_acquire_release() {
        let set = SemaphoreSet::create(IpcKey::PRIVATE, &[2]).unwrap();
        let _cleanup = Cleanup(set);

        set.acquire(0).unwrap();
        set.acquire(0).unwrap();
        assert_eq!(set.value(0).unwrap(), 0);
        set.release(0).unwrap();
        assert_eq!(set.value(0).unwrap(), 1);
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let set = SemaphoreSet::create(IpcKey::PRIVATE, &[0]).unwrap();
        let _cleanup = Cleanup(set);

        let (tx, rx) = mpsc::channel();
        let waiter = std::thread::spawn(move || {
            set.acquire(0).unwrap();
            tx.send(()).unwrap();
        });

        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        set.release(0).unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
    }

    #[test]
    fn test_remove_wakes_sleeper() {
        let set = SemaphoreSet::create(IpcKey::PRIVATE, &[0]).unwrap();

        let waiter = std::thread::spawn(move || set.acquire(0));
        std::thread::sleep(Duration::from_millis(50));
        assert!(set.remove().unwrap());

        let err = waiter.join().unwrap().unwrap_err();
        assert!(is_removed(&err));
    }

    #[test]
    fn test_exclusive_create_and_open() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let key = IpcKey::from_path(file.path(), b'e').unwrap();

        let set = SemaphoreSet::create(key, &[1, 0, 4]).unwrap();
        let _cleanup = Cleanup(set);

        let err = SemaphoreSet::create(key, &[1, 0, 4]).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::EEXIST));

        let opened = SemaphoreSet::open(key, 3).unwrap();
        assert_eq!(opened.id(), set.id());
        assert_eq!(opened.value(2).unwrap(), 4);
    }

    #[test]
    fn test_open_missing_key() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let key = IpcKey::from_path(file.path(), b'n').unwrap();
        let err = SemaphoreSet::open(key, 3).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(libc::ENOENT));
    }

    #[test]
    fn test_remove_twice_is_quiet() {
        let set = SemaphoreSet::create(IpcKey::PRIVATE, &[1, 0, 2]).unwrap();
        assert!(set.remove().unwrap());
        assert!(!set.remove().unwrap());
    }

    #[test]
    fn test_rejects_bad_input() {
        assert!(SemaphoreSet::create(IpcKey::PRIVATE, &[]).is_err());
        assert!(SemaphoreSet::create(IpcKey::PRIVATE, &[MAX_VALUE + 1]).is_err());

        let set = SemaphoreSet::create(IpcKey::PRIVATE, &[0]).unwrap();
        let _cleanup = Cleanup(set);
        assert!(set.release(1).is_err());
    }
}
