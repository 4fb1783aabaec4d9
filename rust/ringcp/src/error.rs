//! Errors for every ringcp process.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use crate::layout::LayoutError;
use crate::spawn::{Role, SpawnArgsError};

/// Result alias used throughout ringcp.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can end a transfer.
#[derive(Debug)]
pub enum Error {
    /// Bad parameters or an unreadable source; nothing was created.
    Validation(String),
    /// Creating, finding, attaching or using a shared segment or semaphore
    /// set failed, or an endpoint could not be launched.
    Resource {
        context: &'static str,
        source: io::Error,
    },
    /// Opening, reading or writing a transfer file failed.
    Io {
        context: &'static str,
        path: PathBuf,
        source: io::Error,
    },
    /// A termination signal arrived; resources have been torn down.
    Interrupted { signal: i32 },
    /// An endpoint process ended with anything but exit code 0.
    ChildFailed { role: Role, status: ExitStatus },
}

impl Error {
    pub fn resource(context: &'static str, source: io::Error) -> Self {
        Error::Resource { context, source }
    }

    pub fn io(context: &'static str, path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            context,
            path: path.into(),
            source,
        }
    }

    /// Process exit code to report this error with.
    ///
    /// `Interrupted` is not meant to exit normally at all: re-raise the
    /// signal instead (see [`crate::signal::reraise`]).
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Interrupted { signal } => 128 + signal,
            _ => 1,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Validation(msg) => write!(f, "{msg}"),
            Error::Resource { context, source } => write!(f, "{context}: {source}"),
            Error::Io {
                context,
                path,
                source,
            } => write!(f, "{context} {}: {source}", path.display()),
            Error::Interrupted { signal } => write!(f, "interrupted by signal {signal}"),
            Error::ChildFailed { role, status } => {
                write!(f, "{role} process terminated abnormally ({status})")
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Resource { source, .. } | Error::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<LayoutError> for Error {
    fn from(e: LayoutError) -> Self {
        Error::Validation(e.to_string())
    }
}

impl From<SpawnArgsError> for Error {
    fn from(e: SpawnArgsError) -> Self {
        Error::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_display_and_source() {
        let err = Error::io(
            "failed to open",
            "/tmp/missing",
            io::Error::from(io::ErrorKind::NotFound),
        );
        assert!(err.to_string().starts_with("failed to open /tmp/missing: "));
        assert!(err.source().is_some());
        assert_eq!(err.exit_code(), 1);

        let err: Error = LayoutError::ZeroSlots.into();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.source().is_none());
    }

    #[test]
    fn test_interrupted_exit_code() {
        let err = Error::Interrupted {
            signal: libc::SIGINT,
        };
        assert_eq!(err.exit_code(), 130);
    }
}
