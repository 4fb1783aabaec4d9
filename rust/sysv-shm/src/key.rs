//! Keys naming System V IPC objects.

use std::ffi::CString;
use std::fmt;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

/// Key under which a segment or semaphore set is registered with the kernel.
///
/// Two processes that agree on a key agree on the object. Keys derived with
/// [`IpcKey::from_path`] are only as unique as the (inode, device, project)
/// triple they hash, so unrelated runs of the same program collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IpcKey(libc::key_t);

impl IpcKey {
    /// Key that always names a fresh, anonymous object.
    pub const PRIVATE: IpcKey = IpcKey(libc::IPC_PRIVATE);

    /// Wrap a raw key.
    #[inline]
    pub const fn from_raw(raw: libc::key_t) -> Self {
        Self(raw)
    }

    /// Get the raw key.
    #[inline]
    pub const fn as_raw(self) -> libc::key_t {
        self.0
    }

    /// Derive a key from an existing file and a project id, like `ftok(3)`.
    ///
    /// The file must exist; its identity (not its name) feeds the key.
    pub fn from_path(path: &Path, project: u8) -> io::Result<Self> {
        let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|_| {
            io::Error::new(io::ErrorKind::InvalidInput, "path contains a NUL byte")
        })?;
        let key = unsafe { libc::ftok(c_path.as_ptr(), project as libc::c_int) };
        if key == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self(key))
    }

    /// Format as a command-line argument value (decimal).
    pub fn to_arg(self) -> String {
        self.0.to_string()
    }

    /// Parse from a command-line argument value.
    pub fn from_arg(s: &str) -> Result<Self, std::num::ParseIntError> {
        s.trim().parse().map(Self)
    }
}

impl fmt::Display for IpcKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08x}", self.0 as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_path_is_deterministic() {
        let file = tempfile::NamedTempFile::new().unwrap();

        let a = IpcKey::from_path(file.path(), b'c').unwrap();
        let b = IpcKey::from_path(file.path(), b'c').unwrap();
        assert_eq!(a, b);

        let other_project = IpcKey::from_path(file.path(), b'd').unwrap();
        assert_ne!(a, other_project);
    }

    #[test]
    fn test_from_path_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = IpcKey::from_path(&dir.path().join("nope"), b'c');
        assert!(result.is_err());
    }

    #[test]
    fn test_arg_roundtrip_keeps_negative_keys() {
        let key = IpcKey::from_raw(-123_456);
        assert_eq!(key.to_arg(), "-123456");
        assert_eq!(IpcKey::from_arg(&key.to_arg()).unwrap(), key);
        assert!(IpcKey::from_arg("0x12").is_err());
    }

    #[test]
    fn test_display_is_hex() {
        assert_eq!(IpcKey::from_raw(0x63_01_02_03).to_string(), "0x63010203");
        assert_eq!(IpcKey::from_raw(-1).to_string(), "0xffffffff");
    }
}
